// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed attribute descriptors.
//!
//! A [`AttributeDescriptor`] ties a physical column name to its value kind,
//! its placeholder names in store expressions, an ordering for sortable
//! attributes, and, for unique attributes, the prefix that turns a value
//! into a partition key (`un#alice`). Descriptors are `'static` and compared
//! by value; each table declares its descriptors once as statics.

use crate::error::{DbError, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use warden_scim::FilterValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
	Str,
	Number,
	Bool,
}

/// A decoded attribute value, the common currency between the planner, the
/// expression builder and the residual filter.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
	Str(String),
	Number(i64),
	Bool(bool),
}

impl AttrValue {
	pub fn kind(&self) -> AttributeKind {
		match self {
			AttrValue::Str(_) => AttributeKind::Str,
			AttrValue::Number(_) => AttributeKind::Number,
			AttrValue::Bool(_) => AttributeKind::Bool,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			AttrValue::Str(s) => Some(s.as_str()),
			_ => None,
		}
	}

	pub fn to_filter_value(&self) -> FilterValue {
		match self {
			AttrValue::Str(s) => FilterValue::Str(s.clone()),
			AttrValue::Number(n) => FilterValue::Number(*n),
			AttrValue::Bool(b) => FilterValue::Bool(*b),
		}
	}

	pub fn to_attribute_value(&self) -> AttributeValue {
		match self {
			AttrValue::Str(s) => AttributeValue::S(s.clone()),
			AttrValue::Number(n) => AttributeValue::N(n.to_string()),
			AttrValue::Bool(b) => AttributeValue::Bool(*b),
		}
	}

	pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
		match (self, other) {
			// Bytewise, matching the store's string key ordering.
			(AttrValue::Str(a), AttrValue::Str(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
			(AttrValue::Number(a), AttrValue::Number(b)) => Some(a.cmp(b)),
			(AttrValue::Bool(a), AttrValue::Bool(b)) => Some(a.cmp(b)),
			_ => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq)]
pub struct AttributeDescriptor {
	pub name: &'static str,
	pub kind: AttributeKind,
	/// Set on unique attributes; `prefix + value` is the partition key of
	/// the attribute's uniqueness item.
	pub uniqueness_prefix: Option<&'static str>,
	/// Whether results may be sorted by this attribute.
	pub sortable: bool,
}

impl AttributeDescriptor {
	pub const fn string(name: &'static str) -> Self {
		Self {
			name,
			kind: AttributeKind::Str,
			uniqueness_prefix: None,
			sortable: false,
		}
	}

	pub const fn number(name: &'static str) -> Self {
		Self {
			name,
			kind: AttributeKind::Number,
			uniqueness_prefix: None,
			sortable: false,
		}
	}

	pub const fn boolean(name: &'static str) -> Self {
		Self {
			name,
			kind: AttributeKind::Bool,
			uniqueness_prefix: None,
			sortable: false,
		}
	}

	pub const fn unique(self, prefix: &'static str) -> Self {
		Self {
			name: self.name,
			kind: self.kind,
			uniqueness_prefix: Some(prefix),
			sortable: self.sortable,
		}
	}

	pub const fn sortable(self) -> Self {
		Self {
			name: self.name,
			kind: self.kind,
			uniqueness_prefix: self.uniqueness_prefix,
			sortable: true,
		}
	}

	pub fn hash_name(&self) -> String {
		format!("#{}", self.name)
	}

	pub fn colon_name(&self) -> String {
		format!(":{}", self.name)
	}

	/// The partition key value for a unique attribute value, e.g.
	/// `un#alice`. Injective as long as prefixes are distinct.
	pub fn uniqueness_value(&self, value: &str) -> String {
		format!("{}{}", self.uniqueness_prefix.unwrap_or(""), value)
	}

	pub fn encode(&self, value: &AttrValue) -> AttributeValue {
		value.to_attribute_value()
	}

	/// Decodes a store value, returning `None` on a kind mismatch.
	pub fn decode(&self, value: &AttributeValue) -> Option<AttrValue> {
		match (self.kind, value) {
			(AttributeKind::Str, AttributeValue::S(s)) => Some(AttrValue::Str(s.clone())),
			(AttributeKind::Number, AttributeValue::N(n)) => {
				n.parse::<i64>().ok().map(AttrValue::Number)
			}
			(AttributeKind::Bool, AttributeValue::Bool(b)) => Some(AttrValue::Bool(*b)),
			_ => None,
		}
	}

	/// Validates a filter literal against this attribute's kind. Numbers in
	/// quoted positions are accepted for numeric attributes; everything else
	/// must match exactly.
	pub fn coerce(&self, value: &FilterValue) -> Result<AttrValue> {
		match (self.kind, value) {
			(AttributeKind::Str, FilterValue::Str(s)) => Ok(AttrValue::Str(s.clone())),
			(AttributeKind::Str, FilterValue::Number(n)) => Ok(AttrValue::Str(n.to_string())),
			(AttributeKind::Number, FilterValue::Number(n)) => Ok(AttrValue::Number(*n)),
			(AttributeKind::Number, FilterValue::Str(s)) => {
				s.parse::<i64>().map(AttrValue::Number).map_err(|_| {
					DbError::UnsupportedQuery(format!(
						"Value for {} must be numeric, got \"{}\"",
						self.name, s
					))
				})
			}
			(AttributeKind::Bool, FilterValue::Bool(b)) => Ok(AttrValue::Bool(*b)),
			(kind, other) => Err(DbError::UnsupportedQuery(format!(
				"Value {:?} does not match the {:?} attribute {}",
				other, kind, self.name
			))),
		}
	}
}
