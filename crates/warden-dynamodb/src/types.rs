// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user account as the data-access layer sees it.
///
/// `account_id`, `version`, `created` and `updated` are server-assigned;
/// callers leave them unset on create. `password` is write-only: every read
/// path strips it, only [`crate::accounts::AccountStore::verify_password`]
/// exposes the stored hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountAttributes {
	pub account_id: Option<String>,
	pub user_name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
	pub active: bool,
	/// Open bag of additional SCIM attributes, persisted as one JSON blob.
	#[serde(default)]
	pub attributes: Map<String, Value>,
	pub created: Option<i64>,
	pub updated: Option<i64>,
	pub version: Option<i64>,
}

/// The subject attributes returned for credential verification. The stored
/// hash is handed to the caller; this layer never verifies passwords.
#[derive(Debug, Clone)]
pub struct PasswordVerificationData {
	pub account_id: String,
	pub user_name: String,
	pub password: Option<String>,
	pub active: bool,
}

/// A link between a local account and an account at a foreign domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLink {
	pub linked_account_id: String,
	pub linked_account_domain_name: String,
	pub local_account_id: String,
	pub linking_account_manager: String,
	pub created: Option<i64>,
}

/// An OAuth delegation. The authentication, consent and claims documents are
/// opaque JSON carried through unparsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delegation {
	pub id: String,
	pub status: String,
	pub owner: String,
	pub client_id: String,
	pub redirect_uri: Option<String>,
	pub authorization_code_hash: Option<String>,
	pub expires: i64,
	#[serde(default)]
	pub authentication_attributes: Value,
	#[serde(default)]
	pub consent: Value,
	#[serde(default)]
	pub claims: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
	#[default]
	Ascending,
	Descending,
}

/// A listing request: optional filter, sorting and drop/take pagination.
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
	pub filter: Option<String>,
	/// 1-based index of the first result to return.
	pub start_index: Option<usize>,
	pub count: Option<usize>,
	pub sort_by: Option<String>,
	pub sort_order: SortOrder,
	/// When set, results carry only the requested optional attributes.
	pub attributes: Option<Vec<String>>,
}
