// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	/// A uniqueness or optimistic-concurrency violation surfaced to callers.
	#[error("Conflict: {0}")]
	Conflict(String),

	/// A conditional write was rejected by the store. Store operations map
	/// this to [`DbError::Conflict`] or feed it to the retry loop; it never
	/// escapes the crate.
	#[error("Conditional check failed")]
	ConditionFailed,

	/// A read item is missing a required attribute or carries the wrong type.
	#[error("Schema error: {0}")]
	Schema(String),

	/// The filter cannot be expressed against the table's capabilities.
	#[error("Unsupported query: {0}")]
	UnsupportedQuery(String),

	/// The plan needs more partition queries than the planner permits.
	#[error("Query requires too many operations: {0}")]
	TooManyOperations(usize),

	/// A table scan was required while `allow_table_scans` is off.
	#[error("Query requires a table scan")]
	ScanNotAllowed,

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Anything else the store client reports, propagated unchanged.
	#[error("Store error: {0}")]
	Store(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
