// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account persistence over a multi-item fan-out.
//!
//! The store offers exactly one unique key per item, so an account with four
//! unique attributes becomes up to four items sharing one payload and one
//! version counter:
//!
//! ```text
//! ai#<accountId>   main item
//! un#<userName>    always present
//! em#<email>       present iff email set
//! pn#<phone>       present iff phone set
//! ```
//!
//! Every mutation is one multi-item transaction: creations guard each item
//! with non-existence, updates and deletes with the observed version. Losing
//! a race means the transaction cancels and the bounded retry loop re-reads
//! and tries again. Reads by any unique attribute are single
//! strongly-consistent point reads, because every item carries the full
//! payload.

use crate::attributes::{AttrValue, AttributeDescriptor};
use crate::client::{DynamoClient, Item, TransactWriteOp};
use crate::config::DynamoDbConfig;
use crate::error::{DbError, Result};
use crate::expressions::{attribute_not_exists, equals_guard};
use crate::planner::{run_plan, QueryPlan, QueryPlanner};
use crate::retry::{with_transaction_retries, TransactionAttempt};
use crate::table::{Index, TableDescriptor};
use crate::types::{AccountAttributes, PasswordVerificationData, ResourceQuery, SortOrder};
use crate::update::UpdateBuilder;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use warden_scim::{FilterParser, PatchRequest};

const MAIN_PREFIX: &str = "ai#";

pub static PK: AttributeDescriptor = AttributeDescriptor::string("pk");
pub static ACCOUNT_ID: AttributeDescriptor = AttributeDescriptor::string("accountId")
	.unique(MAIN_PREFIX)
	.sortable();
pub static USER_NAME: AttributeDescriptor = AttributeDescriptor::string("userName")
	.unique("un#")
	.sortable();
pub static EMAIL: AttributeDescriptor =
	AttributeDescriptor::string("email").unique("em#").sortable();
pub static PHONE: AttributeDescriptor =
	AttributeDescriptor::string("phone").unique("pn#").sortable();
pub static PASSWORD: AttributeDescriptor = AttributeDescriptor::string("password");
pub static ACTIVE: AttributeDescriptor = AttributeDescriptor::boolean("active");
pub static VERSION: AttributeDescriptor = AttributeDescriptor::number("version");
pub static CREATED: AttributeDescriptor = AttributeDescriptor::number("created").sortable();
pub static UPDATED: AttributeDescriptor = AttributeDescriptor::number("updated").sortable();
pub static ATTRIBUTES: AttributeDescriptor = AttributeDescriptor::string("attributes");

// One primary-key access path per unique attribute: any `attr eq literal`
// over a unique attribute is an indexable point lookup.
static ACCOUNTS_INDEXES: [Index; 4] = [
	Index::PrimaryKey {
		key: &PK,
		source: &ACCOUNT_ID,
	},
	Index::PrimaryKey {
		key: &PK,
		source: &USER_NAME,
	},
	Index::PrimaryKey {
		key: &PK,
		source: &EMAIL,
	},
	Index::PrimaryKey {
		key: &PK,
		source: &PHONE,
	},
];

pub static ACCOUNTS_TABLE: TableDescriptor = TableDescriptor {
	base_name: "curity-accounts",
	indexes: &ACCOUNTS_INDEXES,
	attributes: &[
		("id", &ACCOUNT_ID),
		("userName", &USER_NAME),
		("emails", &EMAIL),
		("emails.value", &EMAIL),
		("phoneNumbers", &PHONE),
		("phoneNumbers.value", &PHONE),
		("active", &ACTIVE),
		("meta.created", &CREATED),
		("meta.lastModified", &UPDATED),
	],
};

pub(crate) fn key_item(pk: &str) -> Item {
	Item::from([(PK.name.to_string(), AttributeValue::S(pk.to_string()))])
}

fn require_str(item: &Item, attr: &'static AttributeDescriptor) -> Result<String> {
	match optional_str(item, attr)? {
		Some(value) => Ok(value),
		None => Err(DbError::Schema(format!("Item is missing {}", attr.name))),
	}
}

fn optional_str(item: &Item, attr: &'static AttributeDescriptor) -> Result<Option<String>> {
	match item.get(attr.name) {
		None => Ok(None),
		Some(value) => match attr.decode(value) {
			Some(AttrValue::Str(value)) => Ok(Some(value)),
			_ => Err(DbError::Schema(format!("{} must be a string", attr.name))),
		},
	}
}

fn require_number(item: &Item, attr: &'static AttributeDescriptor) -> Result<i64> {
	match item.get(attr.name).and_then(|value| attr.decode(value)) {
		Some(AttrValue::Number(value)) => Ok(value),
		_ => Err(DbError::Schema(format!("Item is missing {}", attr.name))),
	}
}

fn require_bool(item: &Item, attr: &'static AttributeDescriptor) -> Result<bool> {
	match item.get(attr.name).and_then(|value| attr.decode(value)) {
		Some(AttrValue::Bool(value)) => Ok(value),
		_ => Err(DbError::Schema(format!("Item is missing {}", attr.name))),
	}
}

/// The shared payload written to every fan-out item, without its `pk`.
fn to_common_item(attrs: &AccountAttributes) -> Result<Item> {
	let account_id = attrs
		.account_id
		.as_deref()
		.ok_or_else(|| DbError::Schema("accountId is required".to_string()))?;
	let mut item = Item::new();
	item.insert(
		ACCOUNT_ID.name.to_string(),
		AttributeValue::S(account_id.to_string()),
	);
	item.insert(
		USER_NAME.name.to_string(),
		AttributeValue::S(attrs.user_name.clone()),
	);
	if let Some(email) = &attrs.email {
		item.insert(EMAIL.name.to_string(), AttributeValue::S(email.clone()));
	}
	if let Some(phone) = &attrs.phone {
		item.insert(PHONE.name.to_string(), AttributeValue::S(phone.clone()));
	}
	if let Some(password) = &attrs.password {
		item.insert(
			PASSWORD.name.to_string(),
			AttributeValue::S(password.clone()),
		);
	}
	item.insert(ACTIVE.name.to_string(), AttributeValue::Bool(attrs.active));
	for (attr, value) in [
		(&VERSION, attrs.version),
		(&CREATED, attrs.created),
		(&UPDATED, attrs.updated),
	] {
		let value =
			value.ok_or_else(|| DbError::Schema(format!("{} is required", attr.name)))?;
		item.insert(attr.name.to_string(), AttributeValue::N(value.to_string()));
	}
	item.insert(
		ATTRIBUTES.name.to_string(),
		AttributeValue::S(serde_json::to_string(&attrs.attributes)?),
	);
	Ok(item)
}

fn from_item(item: &Item) -> Result<AccountAttributes> {
	let attributes = match item.get(ATTRIBUTES.name) {
		None => Map::new(),
		Some(AttributeValue::S(blob)) => serde_json::from_str(blob)?,
		Some(_) => {
			return Err(DbError::Schema(format!(
				"{} must be a string",
				ATTRIBUTES.name
			)))
		}
	};
	Ok(AccountAttributes {
		account_id: Some(require_str(item, &ACCOUNT_ID)?),
		user_name: require_str(item, &USER_NAME)?,
		email: optional_str(item, &EMAIL)?,
		phone: optional_str(item, &PHONE)?,
		password: optional_str(item, &PASSWORD)?,
		active: require_bool(item, &ACTIVE)?,
		attributes,
		created: Some(require_number(item, &CREATED)?),
		updated: Some(require_number(item, &UPDATED)?),
		version: Some(require_number(item, &VERSION)?),
	})
}

/// Account repository over the fan-out protocol.
pub struct AccountStore {
	client: Arc<dyn DynamoClient>,
	table_name: String,
	allow_table_scans: bool,
}

impl AccountStore {
	pub fn new(client: Arc<dyn DynamoClient>, config: &DynamoDbConfig) -> Self {
		Self {
			client,
			table_name: config.table_name(ACCOUNTS_TABLE.base_name),
			allow_table_scans: config.allow_table_scans,
		}
	}

	fn now() -> i64 {
		Utc::now().timestamp()
	}

	/// Creates the account and all of its uniqueness items in one
	/// transaction. Any taken userName, email or phone cancels the whole
	/// transaction and surfaces as a conflict.
	#[tracing::instrument(skip(self, attrs), fields(user_name = %attrs.user_name))]
	pub async fn create(&self, mut attrs: AccountAttributes) -> Result<AccountAttributes> {
		if attrs.user_name.is_empty() {
			return Err(DbError::Schema("userName is required".to_string()));
		}
		let account_id = Uuid::new_v4().to_string();
		let now = Self::now();
		attrs.account_id = Some(account_id.clone());
		attrs.version = Some(0);
		attrs.created = Some(now);
		attrs.updated = Some(now);

		let common = to_common_item(&attrs)?;
		let mut keys = vec![
			ACCOUNT_ID.uniqueness_value(&account_id),
			USER_NAME.uniqueness_value(&attrs.user_name),
		];
		if let Some(email) = &attrs.email {
			keys.push(EMAIL.uniqueness_value(email));
		}
		if let Some(phone) = &attrs.phone {
			keys.push(PHONE.uniqueness_value(phone));
		}
		let operations = keys
			.into_iter()
			.map(|pk| {
				let mut item = common.clone();
				item.insert(PK.name.to_string(), AttributeValue::S(pk));
				TransactWriteOp::Put {
					table: self.table_name.clone(),
					item,
					condition: Some(attribute_not_exists(&PK)),
				}
			})
			.collect();

		match self.client.transact_write(operations).await {
			Ok(()) => {}
			Err(DbError::ConditionFailed) => {
				return Err(DbError::Conflict("uniqueness check failed".to_string()))
			}
			Err(err) => return Err(err),
		}
		info!(account_id = %account_id, "created account");
		attrs.password = None;
		Ok(attrs)
	}

	async fn get_by_key(&self, pk: String) -> Result<Option<AccountAttributes>> {
		let item = self
			.client
			.get_item(&self.table_name, key_item(&pk), true, None)
			.await?;
		match item {
			None => Ok(None),
			Some(item) => {
				let mut attrs = from_item(&item)?;
				attrs.password = None;
				Ok(Some(attrs))
			}
		}
	}

	pub async fn get_by_id(&self, account_id: &str) -> Result<Option<AccountAttributes>> {
		self.get_by_key(ACCOUNT_ID.uniqueness_value(account_id)).await
	}

	pub async fn get_by_user_name(&self, user_name: &str) -> Result<Option<AccountAttributes>> {
		self.get_by_key(USER_NAME.uniqueness_value(user_name)).await
	}

	pub async fn get_by_email(&self, email: &str) -> Result<Option<AccountAttributes>> {
		self.get_by_key(EMAIL.uniqueness_value(email)).await
	}

	pub async fn get_by_phone(&self, phone: &str) -> Result<Option<AccountAttributes>> {
		self.get_by_key(PHONE.uniqueness_value(phone)).await
	}

	/// Removes the account and every uniqueness item. Deleting an absent
	/// account succeeds.
	#[tracing::instrument(skip(self))]
	pub async fn delete(&self, account_id: &str) -> Result<()> {
		with_transaction_retries(|| self.try_delete(account_id)).await
	}

	async fn try_delete(&self, account_id: &str) -> Result<TransactionAttempt<()>> {
		let pk = ACCOUNT_ID.uniqueness_value(account_id);
		let Some(item) = self
			.client
			.get_item(&self.table_name, key_item(&pk), true, None)
			.await?
		else {
			return Ok(TransactionAttempt::Success(()));
		};
		let current = from_item(&item)?;
		let observed_version = require_number(&item, &VERSION)?;

		let guard = || {
			equals_guard(&[
				(&VERSION, AttrValue::Number(observed_version)),
				(&ACCOUNT_ID, AttrValue::Str(account_id.to_string())),
			])
		};
		let mut keys = vec![pk, USER_NAME.uniqueness_value(&current.user_name)];
		if let Some(email) = &current.email {
			keys.push(EMAIL.uniqueness_value(email));
		}
		if let Some(phone) = &current.phone {
			keys.push(PHONE.uniqueness_value(phone));
		}
		let operations = keys
			.into_iter()
			.map(|pk| TransactWriteOp::Delete {
				table: self.table_name.clone(),
				key: key_item(&pk),
				condition: Some(guard()),
			})
			.collect();

		match self.client.transact_write(operations).await {
			Ok(()) => {
				info!(account_id = %account_id, "deleted account");
				Ok(TransactionAttempt::Success(()))
			}
			Err(DbError::ConditionFailed) => Ok(TransactionAttempt::Failure(DbError::Conflict(
				"unable to delete account".to_string(),
			))),
			Err(err) => Err(err),
		}
	}

	/// Replaces the account's attributes. `created` and `password` are
	/// preserved; the version is bumped on every fan-out item. Returns
	/// `None` when the account does not exist.
	#[tracing::instrument(skip(self, new_attrs))]
	pub async fn update(
		&self,
		account_id: &str,
		new_attrs: AccountAttributes,
	) -> Result<Option<AccountAttributes>> {
		let rewrite = |_: &AccountAttributes| Ok(new_attrs.clone());
		with_transaction_retries(|| self.try_apply_update(account_id, &rewrite)).await
	}

	/// Applies a SCIM patch onto the current attributes. Password edits are
	/// silently ignored; `update_password` owns that field.
	#[tracing::instrument(skip(self, patch))]
	pub async fn patch(
		&self,
		account_id: &str,
		patch: &PatchRequest,
	) -> Result<Option<AccountAttributes>> {
		let rewrite = |current: &AccountAttributes| {
			let mut document = attributes_document(current);
			patch
				.apply_to(&mut document)
				.map_err(|err| DbError::Schema(format!("Invalid patch: {}", err)))?;
			document_to_attributes(document, current)
		};
		with_transaction_retries(|| self.try_apply_update(account_id, &rewrite)).await
	}

	async fn try_apply_update<F>(
		&self,
		account_id: &str,
		rewrite: &F,
	) -> Result<TransactionAttempt<Option<AccountAttributes>>>
	where
		F: Fn(&AccountAttributes) -> Result<AccountAttributes>,
	{
		let pk = ACCOUNT_ID.uniqueness_value(account_id);
		let Some(item) = self
			.client
			.get_item(&self.table_name, key_item(&pk), true, None)
			.await?
		else {
			return Ok(TransactionAttempt::Success(None));
		};
		let current = from_item(&item)?;
		let observed_version = require_number(&item, &VERSION)?;

		let mut next = rewrite(&current)?;
		if next.user_name.is_empty() {
			return Err(DbError::Schema("userName is required".to_string()));
		}
		next.account_id = current.account_id.clone();
		next.created = current.created;
		next.password = current.password.clone();
		next.version = Some(observed_version + 1);
		next.updated = Some(Self::now());

		let common = to_common_item(&next)?;
		let mut builder =
			UpdateBuilder::new(&self.table_name, common, observed_version, account_id);
		builder.handle_unique_attribute(
			&USER_NAME,
			Some(&current.user_name),
			Some(&next.user_name),
		);
		builder.handle_unique_attribute(&EMAIL, current.email.as_deref(), next.email.as_deref());
		builder.handle_unique_attribute(&PHONE, current.phone.as_deref(), next.phone.as_deref());
		builder.replace_main_item();
		let operations = builder.build()?;

		match self.client.transact_write(operations).await {
			Ok(()) => {
				debug!(account_id = %account_id, version = observed_version + 1, "updated account");
				next.password = None;
				Ok(TransactionAttempt::Success(Some(next)))
			}
			Err(DbError::ConditionFailed) => Ok(TransactionAttempt::Failure(DbError::Conflict(
				"unable to update account".to_string(),
			))),
			Err(err) => Err(err),
		}
	}

	/// Sets a new password hash on every fan-out item of the account that
	/// owns `user_name`. Succeeds as a no-op when no such account exists.
	#[tracing::instrument(skip(self, new_password))]
	pub async fn update_password(&self, user_name: &str, new_password: &str) -> Result<()> {
		with_transaction_retries(|| self.try_update_password(user_name, new_password)).await
	}

	async fn try_update_password(
		&self,
		user_name: &str,
		new_password: &str,
	) -> Result<TransactionAttempt<()>> {
		let pk = USER_NAME.uniqueness_value(user_name);
		let Some(item) = self
			.client
			.get_item(&self.table_name, key_item(&pk), true, None)
			.await?
		else {
			return Ok(TransactionAttempt::Success(()));
		};
		let current = from_item(&item)?;
		let account_id = require_str(&item, &ACCOUNT_ID)?;
		let observed_version = require_number(&item, &VERSION)?;

		let mut next = current.clone();
		next.password = Some(new_password.to_string());
		next.version = Some(observed_version + 1);
		next.updated = Some(Self::now());

		let common = to_common_item(&next)?;
		let mut builder =
			UpdateBuilder::new(&self.table_name, common, observed_version, &account_id);
		builder.handle_unique_attribute(&USER_NAME, Some(user_name), Some(user_name));
		builder.handle_unique_attribute(&EMAIL, current.email.as_deref(), current.email.as_deref());
		builder.handle_unique_attribute(&PHONE, current.phone.as_deref(), current.phone.as_deref());
		builder.replace_main_item();
		let operations = builder.build()?;

		match self.client.transact_write(operations).await {
			Ok(()) => {
				info!(account_id = %account_id, "updated password");
				Ok(TransactionAttempt::Success(()))
			}
			Err(DbError::ConditionFailed) => Ok(TransactionAttempt::Failure(DbError::Conflict(
				"unable to update password".to_string(),
			))),
			Err(err) => Err(err),
		}
	}

	/// Fetches the stored credential material for a subject. Returns `None`
	/// for unknown or inactive accounts. Verification itself is the
	/// caller's job.
	pub async fn verify_password(
		&self,
		user_name: &str,
	) -> Result<Option<PasswordVerificationData>> {
		let pk = USER_NAME.uniqueness_value(user_name);
		let projection = [ACCOUNT_ID.name, USER_NAME.name, PASSWORD.name, ACTIVE.name];
		let Some(item) = self
			.client
			.get_item(&self.table_name, key_item(&pk), true, Some(&projection))
			.await?
		else {
			return Ok(None);
		};
		let active = require_bool(&item, &ACTIVE)?;
		if !active {
			return Ok(None);
		}
		Ok(Some(PasswordVerificationData {
			account_id: require_str(&item, &ACCOUNT_ID)?,
			user_name: require_str(&item, &USER_NAME)?,
			password: optional_str(&item, &PASSWORD)?,
			active,
		}))
	}

	/// Lists accounts: plan the filter, run the queries (or the gated
	/// scan), sort, page, project.
	#[tracing::instrument(skip(self, query), fields(filter = ?query.filter))]
	pub async fn get_all(&self, query: &ResourceQuery) -> Result<Vec<AccountAttributes>> {
		let plan = match &query.filter {
			None => QueryPlan::Scan {
				products: Vec::new(),
			},
			Some(filter) => {
				let parsed = FilterParser::parse(filter)
					.map_err(|err| DbError::UnsupportedQuery(err.to_string()))?;
				QueryPlanner::new(&ACCOUNTS_TABLE).plan(&parsed)?
			}
		};
		if let QueryPlan::Queries(queries) = &plan {
			debug!(queries = queries.len(), "planned account filter");
		}
		let mut items = run_plan(
			&self.client,
			&self.table_name,
			&plan,
			Some((&PK, MAIN_PREFIX)),
			&ACCOUNT_ID,
			self.allow_table_scans,
		)
		.await?;

		if let Some(sort_by) = &query.sort_by {
			let attr = ACCOUNTS_TABLE.attribute(sort_by).ok_or_else(|| {
				DbError::UnsupportedQuery(format!("Cannot sort by {}", sort_by))
			})?;
			if !attr.sortable {
				return Err(DbError::UnsupportedQuery(format!(
					"Cannot sort by {}",
					sort_by
				)));
			}
			sort_items(&mut items, attr, query.sort_order);
		}

		let start = query.start_index.unwrap_or(1).saturating_sub(1);
		let paged = items.into_iter().skip(start);
		let paged: Vec<Item> = match query.count {
			Some(count) => paged.take(count).collect(),
			None => paged.collect(),
		};

		let mut results = Vec::with_capacity(paged.len());
		for item in &paged {
			let mut attrs = from_item(item)?;
			attrs.password = None;
			if let Some(requested) = &query.attributes {
				project(&mut attrs, requested);
			}
			results.push(attrs);
		}
		Ok(results)
	}
}

fn sort_items(items: &mut [Item], attr: &'static AttributeDescriptor, order: SortOrder) {
	items.sort_by(|left, right| {
		let left = left.get(attr.name).and_then(|value| attr.decode(value));
		let right = right.get(attr.name).and_then(|value| attr.decode(value));
		let ordering = match (left, right) {
			(Some(left), Some(right)) => left.compare(&right).unwrap_or(Ordering::Equal),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => Ordering::Equal,
		};
		match order {
			SortOrder::Ascending => ordering,
			SortOrder::Descending => ordering.reverse(),
		}
	});
}

fn project(attrs: &mut AccountAttributes, requested: &[String]) {
	let requested: HashSet<String> = requested
		.iter()
		.map(|path| path.to_ascii_lowercase())
		.collect();
	let wants = |candidates: &[&str]| candidates.iter().any(|c| requested.contains(*c));
	if !wants(&["email", "emails", "emails.value"]) {
		attrs.email = None;
	}
	if !wants(&["phone", "phonenumbers", "phonenumbers.value"]) {
		attrs.phone = None;
	}
	attrs
		.attributes
		.retain(|key, _| requested.contains(&key.to_ascii_lowercase()));
}

/// Flattens the account into the document a SCIM patch operates on.
/// Server-assigned fields are withheld; the password never appears, so
/// patching it is a silent no-op.
fn attributes_document(attrs: &AccountAttributes) -> Map<String, Value> {
	let mut document = attrs.attributes.clone();
	document.insert(
		"userName".to_string(),
		Value::String(attrs.user_name.clone()),
	);
	if let Some(email) = &attrs.email {
		document.insert("email".to_string(), Value::String(email.clone()));
	}
	if let Some(phone) = &attrs.phone {
		document.insert("phone".to_string(), Value::String(phone.clone()));
	}
	document.insert("active".to_string(), Value::Bool(attrs.active));
	document
}

fn document_to_attributes(
	mut document: Map<String, Value>,
	current: &AccountAttributes,
) -> Result<AccountAttributes> {
	// Server-assigned and write-only fields are not patchable.
	for ignored in ["id", "meta", "created", "updated", "version", "password"] {
		document.remove(ignored);
	}
	let user_name = match document.remove("userName") {
		Some(Value::String(user_name)) => user_name,
		Some(_) => return Err(DbError::Schema("userName must be a string".to_string())),
		None => return Err(DbError::Schema("userName is required".to_string())),
	};
	let email = take_optional_string(&mut document, "email")?;
	let phone = take_optional_string(&mut document, "phone")?;
	let active = match document.remove("active") {
		Some(Value::Bool(active)) => active,
		Some(_) => return Err(DbError::Schema("active must be a boolean".to_string())),
		None => current.active,
	};
	Ok(AccountAttributes {
		account_id: None,
		user_name,
		email,
		phone,
		password: None,
		active,
		attributes: document,
		created: None,
		updated: None,
		version: None,
	})
}

fn take_optional_string(document: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
	match document.remove(key) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(value)) => Ok(Some(value)),
		Some(_) => Err(DbError::Schema(format!("{} must be a string", key))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::InMemoryDynamoClient;
	use serde_json::json;
	use warden_scim::{PatchOp, PatchOperation};

	fn setup(allow_table_scans: bool) -> (Arc<InMemoryDynamoClient>, AccountStore) {
		let client = Arc::new(InMemoryDynamoClient::with_page_size(2));
		client.create_table(ACCOUNTS_TABLE.base_name, PK.name, Vec::new());
		let config = DynamoDbConfig {
			allow_table_scans,
			..Default::default()
		};
		(client.clone(), AccountStore::new(client, &config))
	}

	fn alice() -> AccountAttributes {
		AccountAttributes {
			user_name: "alice".to_string(),
			email: Some("alice@example.com".to_string()),
			phone: Some("+15551234".to_string()),
			password: Some("hash-1".to_string()),
			active: true,
			attributes: json!({"displayName": "Alice"}).as_object().unwrap().clone(),
			..Default::default()
		}
	}

	fn versions(client: &InMemoryDynamoClient) -> Vec<i64> {
		client
			.items(ACCOUNTS_TABLE.base_name)
			.iter()
			.map(|item| require_number(item, &VERSION).unwrap())
			.collect()
	}

	fn patch_request(operations: Vec<PatchOperation>) -> PatchRequest {
		PatchRequest {
			schemas: vec!["urn:ietf:params:scim:api:messages:2.0:PatchOp".to_string()],
			operations,
		}
	}

	#[tokio::test]
	async fn create_then_read_by_every_unique_attribute() {
		let (client, store) = setup(false);
		let created = store.create(alice()).await.unwrap();
		let account_id = created.account_id.clone().unwrap();
		assert_eq!(created.version, Some(0));
		assert!(created.password.is_none());
		// Main item plus userName, email and phone fan-out items.
		assert_eq!(client.items(ACCOUNTS_TABLE.base_name).len(), 4);

		let by_email = store
			.get_by_email("alice@example.com")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(by_email.user_name, "alice");
		assert_eq!(by_email.account_id.as_deref(), Some(account_id.as_str()));

		for fetched in [
			store.get_by_id(&account_id).await.unwrap().unwrap(),
			store.get_by_user_name("alice").await.unwrap().unwrap(),
			store.get_by_phone("+15551234").await.unwrap().unwrap(),
		] {
			assert_eq!(fetched.version, Some(0));
			assert_eq!(fetched.user_name, "alice");
			assert_eq!(fetched.attributes.get("displayName"), Some(&json!("Alice")));
			assert!(fetched.password.is_none());
		}
	}

	#[tokio::test]
	async fn create_conflicts_on_each_unique_attribute() {
		let (client, store) = setup(false);
		store.create(alice()).await.unwrap();

		for (user_name, email, phone) in [
			("alice", "other@example.com", "+10000000"),
			("carol", "alice@example.com", "+10000001"),
			("dave", "dave@example.com", "+15551234"),
		] {
			let duplicate = AccountAttributes {
				user_name: user_name.to_string(),
				email: Some(email.to_string()),
				phone: Some(phone.to_string()),
				active: true,
				..Default::default()
			};
			match store.create(duplicate).await {
				Err(DbError::Conflict(message)) => {
					assert_eq!(message, "uniqueness check failed")
				}
				other => panic!("expected a conflict, got {:?}", other),
			}
		}
		// The cancelled transactions wrote nothing.
		assert_eq!(client.items(ACCOUNTS_TABLE.base_name).len(), 4);
	}

	#[tokio::test]
	async fn update_renames_user_name_and_bumps_every_item() {
		let (client, store) = setup(false);
		let created = store
			.create(AccountAttributes {
				user_name: "bob".to_string(),
				email: Some("bob@example.com".to_string()),
				active: true,
				..Default::default()
			})
			.await
			.unwrap();
		let account_id = created.account_id.clone().unwrap();

		let mut next = created.clone();
		next.user_name = "bobby".to_string();
		let updated = store.update(&account_id, next).await.unwrap().unwrap();
		assert_eq!(updated.version, Some(1));

		assert!(store.get_by_user_name("bob").await.unwrap().is_none());
		let renamed = store.get_by_user_name("bobby").await.unwrap().unwrap();
		assert_eq!(renamed.account_id.as_deref(), Some(account_id.as_str()));
		assert_eq!(renamed.version, Some(1));

		// Fan-out consistency: every surviving item carries the new version.
		assert_eq!(versions(&client), vec![1, 1, 1]);
		let by_id = store.get_by_id(&account_id).await.unwrap().unwrap();
		assert_eq!(by_id.user_name, "bobby");
		assert_eq!(by_id.created, created.created);
	}

	#[tokio::test]
	async fn update_missing_account_is_a_noop() {
		let (_, store) = setup(false);
		let result = store.update("nope", alice()).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn update_to_taken_user_name_conflicts_after_retries() {
		let (_, store) = setup(false);
		store.create(alice()).await.unwrap();
		let bob = store
			.create(AccountAttributes {
				user_name: "bob".to_string(),
				active: true,
				..Default::default()
			})
			.await
			.unwrap();
		let account_id = bob.account_id.clone().unwrap();

		let mut hijack = bob.clone();
		hijack.user_name = "alice".to_string();
		match store.update(&account_id, hijack).await {
			Err(DbError::Conflict(message)) => assert_eq!(message, "unable to update account"),
			other => panic!("expected a conflict, got {:?}", other),
		}
		// Bob is untouched.
		let unchanged = store.get_by_user_name("bob").await.unwrap().unwrap();
		assert_eq!(unchanged.version, Some(0));
	}

	#[tokio::test]
	async fn delete_is_idempotent_and_removes_the_fan_out() {
		let (client, store) = setup(false);
		store.delete("never-existed").await.unwrap();

		let created = store.create(alice()).await.unwrap();
		let account_id = created.account_id.clone().unwrap();
		store.delete(&account_id).await.unwrap();
		assert!(client.items(ACCOUNTS_TABLE.base_name).is_empty());
		assert!(store.get_by_id(&account_id).await.unwrap().is_none());
		assert!(store.get_by_email("alice@example.com").await.unwrap().is_none());

		store.delete(&account_id).await.unwrap();
	}

	#[tokio::test]
	async fn update_password_rewrites_every_item() {
		let (client, store) = setup(false);
		store.create(alice()).await.unwrap();

		store.update_password("alice", "hash-2").await.unwrap();
		assert_eq!(versions(&client), vec![1, 1, 1, 1]);

		let credentials = store.verify_password("alice").await.unwrap().unwrap();
		assert_eq!(credentials.password.as_deref(), Some("hash-2"));
		assert!(credentials.active);

		// Reads still never expose the hash.
		let fetched = store.get_by_user_name("alice").await.unwrap().unwrap();
		assert!(fetched.password.is_none());

		// Unknown subject: a silent no-op.
		store.update_password("nobody", "hash-3").await.unwrap();
	}

	#[tokio::test]
	async fn verify_password_hides_missing_and_inactive_accounts() {
		let (_, store) = setup(false);
		assert!(store.verify_password("ghost").await.unwrap().is_none());

		store
			.create(AccountAttributes {
				user_name: "mallory".to_string(),
				password: Some("hash-m".to_string()),
				active: false,
				..Default::default()
			})
			.await
			.unwrap();
		assert!(store.verify_password("mallory").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn patch_edits_attributes_but_never_the_password() {
		let (_, store) = setup(false);
		let created = store.create(alice()).await.unwrap();
		let account_id = created.account_id.clone().unwrap();

		let patch = patch_request(vec![
			PatchOperation {
				op: PatchOp::Replace,
				path: Some("email".to_string()),
				value: Some(json!("new@example.com")),
			},
			PatchOperation {
				op: PatchOp::Replace,
				path: Some("password".to_string()),
				value: Some(json!("stolen")),
			},
			PatchOperation {
				op: PatchOp::Add,
				path: Some("locale".to_string()),
				value: Some(json!("en")),
			},
		]);
		let patched = store.patch(&account_id, &patch).await.unwrap().unwrap();
		assert_eq!(patched.email.as_deref(), Some("new@example.com"));
		assert_eq!(patched.version, Some(1));
		assert_eq!(patched.attributes.get("locale"), Some(&json!("en")));

		// The email uniqueness item moved with the patch.
		assert!(store.get_by_email("alice@example.com").await.unwrap().is_none());
		assert!(store.get_by_email("new@example.com").await.unwrap().is_some());

		// The password patch was ignored.
		let credentials = store.verify_password("alice").await.unwrap().unwrap();
		assert_eq!(credentials.password.as_deref(), Some("hash-1"));
	}

	#[tokio::test]
	async fn get_all_uses_point_lookups_without_scans() {
		let (_, store) = setup(false);
		store.create(alice()).await.unwrap();
		store
			.create(AccountAttributes {
				user_name: "bob".to_string(),
				active: false,
				..Default::default()
			})
			.await
			.unwrap();

		let query = ResourceQuery {
			filter: Some(r#"userName eq "alice""#.to_string()),
			..Default::default()
		};
		let results = store.get_all(&query).await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].user_name, "alice");

		// Residual tightening on top of the point lookup.
		let query = ResourceQuery {
			filter: Some(r#"userName eq "bob" and active eq true"#.to_string()),
			..Default::default()
		};
		assert!(store.get_all(&query).await.unwrap().is_empty());

		// A disjunction over unique attributes fans out but stays indexed,
		// and the same account reached twice is returned once.
		let query = ResourceQuery {
			filter: Some(
				r#"userName eq "alice" or emails.value eq "alice@example.com""#.to_string(),
			),
			..Default::default()
		};
		let results = store.get_all(&query).await.unwrap();
		assert_eq!(results.len(), 1);
	}

	#[tokio::test]
	async fn negated_filters_respect_missing_attributes() {
		let (_, store) = setup(true);
		store.create(alice()).await.unwrap();
		store
			.create(AccountAttributes {
				user_name: "bob".to_string(),
				active: true,
				..Default::default()
			})
			.await
			.unwrap();
		store
			.create(AccountAttributes {
				user_name: "carol".to_string(),
				email: Some("carol@example.com".to_string()),
				active: true,
				..Default::default()
			})
			.await
			.unwrap();

		// `not (email eq v)` only accepts accounts holding a different
		// email. Bob has none at all, so neither the store-side filter nor
		// the in-process recheck admits him.
		let query = ResourceQuery {
			filter: Some(r#"not (emails.value eq "alice@example.com")"#.to_string()),
			..Default::default()
		};
		let results = store.get_all(&query).await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].user_name, "carol");

		// Only a presence test selects on absence.
		let query = ResourceQuery {
			filter: Some("not (emails.value pr)".to_string()),
			..Default::default()
		};
		let results = store.get_all(&query).await.unwrap();
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].user_name, "bob");
	}

	#[tokio::test]
	async fn get_all_scans_are_gated() {
		let (_, store) = setup(false);
		store.create(alice()).await.unwrap();

		// Unfiltered listing needs a scan.
		assert!(matches!(
			store.get_all(&ResourceQuery::default()).await,
			Err(DbError::ScanNotAllowed)
		));
		// So does a filter over a non-unique attribute.
		let query = ResourceQuery {
			filter: Some("active eq true".to_string()),
			..Default::default()
		};
		assert!(matches!(
			store.get_all(&query).await,
			Err(DbError::ScanNotAllowed)
		));
	}

	#[tokio::test]
	async fn get_all_scan_sorts_pages_and_projects() {
		let (_, store) = setup(true);
		for (user_name, email) in [
			("carol", "carol@example.com"),
			("alice", "alice@example.com"),
			("bob", "bob@example.com"),
		] {
			store
				.create(AccountAttributes {
					user_name: user_name.to_string(),
					email: Some(email.to_string()),
					phone: Some(format!("+1-{}", user_name)),
					active: true,
					attributes: json!({"displayName": user_name}).as_object().unwrap().clone(),
					..Default::default()
				})
				.await
				.unwrap();
		}

		// Scan sees only main items, never the uniqueness fan-out.
		let all = store.get_all(&ResourceQuery::default()).await.unwrap();
		assert_eq!(all.len(), 3);

		let query = ResourceQuery {
			sort_by: Some("userName".to_string()),
			sort_order: SortOrder::Descending,
			start_index: Some(2),
			count: Some(1),
			attributes: Some(vec!["emails".to_string()]),
			..Default::default()
		};
		let page = store.get_all(&query).await.unwrap();
		assert_eq!(page.len(), 1);
		// Descending by userName: carol, bob, alice. Page starts at bob.
		assert_eq!(page[0].user_name, "bob");
		assert_eq!(page[0].email.as_deref(), Some("bob@example.com"));
		// Unrequested attributes are projected away.
		assert!(page[0].phone.is_none());
		assert!(page[0].attributes.is_empty());

		let unsortable = ResourceQuery {
			sort_by: Some("mystery".to_string()),
			..Default::default()
		};
		assert!(matches!(
			store.get_all(&unsortable).await,
			Err(DbError::UnsupportedQuery(_))
		));
	}
}
