// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OAuth delegation persistence.
//!
//! Delegations are plain single-key items; the interesting surface is the
//! filtered listing, which runs through the query planner against three
//! secondary indexes. Status transitions are single-attribute updates.

use crate::attributes::{AttrValue, AttributeDescriptor};
use crate::client::{DynamoClient, Item};
use crate::config::DynamoDbConfig;
use crate::error::{DbError, Result};
use crate::expressions::{attribute_not_exists, set_update, ExpressionBuilder};
use crate::planner::{run_plan, QueryPlanner};
use crate::table::{Index, TableDescriptor};
use crate::types::Delegation;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use warden_scim::FilterParser;

pub const STATUS_ISSUED: &str = "issued";
pub const STATUS_REVOKED: &str = "revoked";

pub static DELEGATION_ID: AttributeDescriptor = AttributeDescriptor::string("id");
pub static OWNER: AttributeDescriptor = AttributeDescriptor::string("owner").sortable();
pub static STATUS: AttributeDescriptor = AttributeDescriptor::string("status");
pub static CLIENT_ID: AttributeDescriptor = AttributeDescriptor::string("clientId");
pub static REDIRECT_URI: AttributeDescriptor = AttributeDescriptor::string("redirectUri");
pub static AUTHORIZATION_CODE_HASH: AttributeDescriptor =
	AttributeDescriptor::string("authorizationCodeHash");
pub static EXPIRES: AttributeDescriptor = AttributeDescriptor::number("expires").sortable();
pub static AUTHENTICATION_ATTRIBUTES: AttributeDescriptor =
	AttributeDescriptor::string("authenticationAttributes");
pub static CONSENT: AttributeDescriptor = AttributeDescriptor::string("consent");
pub static CLAIMS: AttributeDescriptor = AttributeDescriptor::string("claims");

static DELEGATIONS_INDEXES: [Index; 4] = [
	Index::PrimaryKey {
		key: &DELEGATION_ID,
		source: &DELEGATION_ID,
	},
	Index::PartitionSort {
		name: "owner-status-index",
		partition: &OWNER,
		sort: &STATUS,
	},
	Index::PartitionSort {
		name: "clientId-status-index",
		partition: &CLIENT_ID,
		sort: &STATUS,
	},
	Index::Partition {
		name: "authorization-hash-index",
		partition: &AUTHORIZATION_CODE_HASH,
	},
];

pub static DELEGATIONS_TABLE: TableDescriptor = TableDescriptor {
	base_name: "curity-delegations",
	indexes: &DELEGATIONS_INDEXES,
	attributes: &[
		("id", &DELEGATION_ID),
		("owner", &OWNER),
		("status", &STATUS),
		("client_id", &CLIENT_ID),
		("clientId", &CLIENT_ID),
		("redirect_uri", &REDIRECT_URI),
		("redirectUri", &REDIRECT_URI),
		("authorization_code_hash", &AUTHORIZATION_CODE_HASH),
		("expires", &EXPIRES),
	],
};

fn key_item(id: &str) -> Item {
	Item::from([(
		DELEGATION_ID.name.to_string(),
		AttributeValue::S(id.to_string()),
	)])
}

fn require_str(item: &Item, attr: &'static AttributeDescriptor) -> Result<String> {
	match item.get(attr.name) {
		Some(AttributeValue::S(value)) => Ok(value.clone()),
		_ => Err(DbError::Schema(format!("Item is missing {}", attr.name))),
	}
}

fn optional_str(item: &Item, attr: &'static AttributeDescriptor) -> Option<String> {
	match item.get(attr.name) {
		Some(AttributeValue::S(value)) => Some(value.clone()),
		_ => None,
	}
}

fn json_blob(item: &Item, attr: &'static AttributeDescriptor) -> Result<Value> {
	match item.get(attr.name) {
		None => Ok(Value::Null),
		Some(AttributeValue::S(blob)) => Ok(serde_json::from_str(blob)?),
		Some(_) => Err(DbError::Schema(format!("{} must be a string", attr.name))),
	}
}

fn to_item(delegation: &Delegation) -> Result<Item> {
	let mut item = Item::new();
	item.insert(
		DELEGATION_ID.name.to_string(),
		AttributeValue::S(delegation.id.clone()),
	);
	item.insert(
		STATUS.name.to_string(),
		AttributeValue::S(delegation.status.clone()),
	);
	item.insert(
		OWNER.name.to_string(),
		AttributeValue::S(delegation.owner.clone()),
	);
	item.insert(
		CLIENT_ID.name.to_string(),
		AttributeValue::S(delegation.client_id.clone()),
	);
	if let Some(redirect_uri) = &delegation.redirect_uri {
		item.insert(
			REDIRECT_URI.name.to_string(),
			AttributeValue::S(redirect_uri.clone()),
		);
	}
	if let Some(hash) = &delegation.authorization_code_hash {
		item.insert(
			AUTHORIZATION_CODE_HASH.name.to_string(),
			AttributeValue::S(hash.clone()),
		);
	}
	item.insert(
		EXPIRES.name.to_string(),
		AttributeValue::N(delegation.expires.to_string()),
	);
	for (attr, value) in [
		(&AUTHENTICATION_ATTRIBUTES, &delegation.authentication_attributes),
		(&CONSENT, &delegation.consent),
		(&CLAIMS, &delegation.claims),
	] {
		if !value.is_null() {
			item.insert(
				attr.name.to_string(),
				AttributeValue::S(serde_json::to_string(value)?),
			);
		}
	}
	Ok(item)
}

fn from_item(item: &Item) -> Result<Delegation> {
	Ok(Delegation {
		id: require_str(item, &DELEGATION_ID)?,
		status: require_str(item, &STATUS)?,
		owner: require_str(item, &OWNER)?,
		client_id: require_str(item, &CLIENT_ID)?,
		redirect_uri: optional_str(item, &REDIRECT_URI),
		authorization_code_hash: optional_str(item, &AUTHORIZATION_CODE_HASH),
		expires: match item.get(EXPIRES.name) {
			Some(AttributeValue::N(value)) => value
				.parse::<i64>()
				.map_err(|_| DbError::Schema("expires must be numeric".to_string()))?,
			_ => return Err(DbError::Schema("Item is missing expires".to_string())),
		},
		authentication_attributes: json_blob(item, &AUTHENTICATION_ATTRIBUTES)?,
		consent: json_blob(item, &CONSENT)?,
		claims: json_blob(item, &CLAIMS)?,
	})
}

pub struct DelegationStore {
	client: Arc<dyn DynamoClient>,
	table_name: String,
	allow_table_scans: bool,
}

impl DelegationStore {
	pub fn new(client: Arc<dyn DynamoClient>, config: &DynamoDbConfig) -> Self {
		Self {
			client,
			table_name: config.table_name(DELEGATIONS_TABLE.base_name),
			allow_table_scans: config.allow_table_scans,
		}
	}

	#[tracing::instrument(skip(self, delegation), fields(id = %delegation.id))]
	pub async fn create(&self, delegation: &Delegation) -> Result<()> {
		let item = to_item(delegation)?;
		match self
			.client
			.put_item(
				&self.table_name,
				item,
				Some(attribute_not_exists(&DELEGATION_ID)),
			)
			.await
		{
			Ok(()) => {
				info!(id = %delegation.id, "created delegation");
				Ok(())
			}
			Err(DbError::ConditionFailed) => Err(DbError::Conflict(format!(
				"delegation {} already exists",
				delegation.id
			))),
			Err(err) => Err(err),
		}
	}

	pub async fn get_by_id(&self, id: &str) -> Result<Option<Delegation>> {
		let item = self
			.client
			.get_item(&self.table_name, key_item(id), true, None)
			.await?;
		item.as_ref().map(from_item).transpose()
	}

	/// Point lookup through the authorization-code hash index.
	pub async fn get_by_authorization_code_hash(
		&self,
		hash: &str,
	) -> Result<Option<Delegation>> {
		let mut builder = ExpressionBuilder::new();
		let name = builder.name(&AUTHORIZATION_CODE_HASH);
		let value = builder.value(
			&AUTHORIZATION_CODE_HASH,
			&AttrValue::Str(hash.to_string()),
		);
		let rendered = builder.build(format!("{} = {}", name, value));
		let page = self
			.client
			.query(
				&self.table_name,
				Some("authorization-hash-index"),
				&crate::client::QueryExpression {
					key_condition: rendered.text,
					filter: None,
					names: rendered.names,
					values: rendered.values,
				},
				None,
				None,
			)
			.await?;
		page.items.first().map(from_item).transpose()
	}

	/// Flips the status attribute in place. Returns false when the
	/// delegation does not exist (nothing is created).
	#[tracing::instrument(skip(self))]
	pub async fn set_status(&self, id: &str, status: &str) -> Result<bool> {
		let update = set_update(&[(&STATUS, AttrValue::Str(status.to_string()))]);
		let mut builder = ExpressionBuilder::new();
		let name = builder.name(&DELEGATION_ID);
		let guard = builder.build(format!("attribute_exists({})", name));
		match self
			.client
			.update_item(&self.table_name, key_item(id), update, Some(guard))
			.await
		{
			Ok(()) => {
				info!(id = %id, status = %status, "updated delegation status");
				Ok(true)
			}
			Err(DbError::ConditionFailed) => Ok(false),
			Err(err) => Err(err),
		}
	}

	/// Filtered listing through the planner: index-backed queries when the
	/// filter allows, a gated scan otherwise.
	#[tracing::instrument(skip(self))]
	pub async fn get_all(&self, filter: &str) -> Result<Vec<Delegation>> {
		let parsed = FilterParser::parse(filter)
			.map_err(|err| DbError::UnsupportedQuery(err.to_string()))?;
		let plan = QueryPlanner::new(&DELEGATIONS_TABLE).plan(&parsed)?;
		debug!(?plan, "planned delegation filter");
		let items = run_plan(
			&self.client,
			&self.table_name,
			&plan,
			None,
			&DELEGATION_ID,
			self.allow_table_scans,
		)
		.await?;
		items.iter().map(from_item).collect()
	}
}
