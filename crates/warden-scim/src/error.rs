// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum ScimError {
	#[error("Invalid filter: {0}")]
	InvalidFilter(String),

	#[error("Invalid syntax: {0}")]
	InvalidSyntax(String),

	#[error("Invalid path: {0}")]
	InvalidPath(String),

	#[error("Invalid value: {0}")]
	InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ScimError>;
