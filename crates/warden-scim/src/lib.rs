// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SCIM 2.0 filter grammar and patch primitives for Warden.
//!
//! This crate is pure: no I/O, no store knowledge. The data-access layer
//! consumes the parsed [`Filter`] tree; [`evaluate_filter`] is the reference
//! in-memory semantics that any storage-side rewrite of a filter must agree
//! with.

pub mod error;
pub mod filter;
pub mod patch;

pub use error::ScimError;
pub use filter::{evaluate_filter, CompareOp, Filter, FilterParser, FilterValue, LogicalOp};
pub use patch::{PatchOp, PatchOperation, PatchRequest};
