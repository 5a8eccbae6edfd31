// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account links: which foreign account, at which domain, maps onto which
//! local account. One item per link, keyed by the foreign identity; a
//! secondary index answers "all links of this local account under this
//! account manager".

use crate::attributes::{AttrValue, AttributeDescriptor};
use crate::client::{DynamoClient, Item, QueryExpression};
use crate::config::DynamoDbConfig;
use crate::error::{DbError, Result};
use crate::expressions::ExpressionBuilder;
use crate::pagination;
use crate::table::{Index, TableDescriptor};
use crate::types::AccountLink;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::info;

pub static LINK_PK: AttributeDescriptor = AttributeDescriptor::string("pk");
pub static LINKED_ACCOUNT_ID: AttributeDescriptor =
	AttributeDescriptor::string("linkedAccountId");
pub static LINKED_ACCOUNT_DOMAIN: AttributeDescriptor =
	AttributeDescriptor::string("linkedAccountDomainName");
pub static LOCAL_ACCOUNT_ID: AttributeDescriptor =
	AttributeDescriptor::string("localAccountId");
pub static LINKING_ACCOUNT_MANAGER: AttributeDescriptor =
	AttributeDescriptor::string("linkingAccountManager");
pub static LINK_CREATED: AttributeDescriptor = AttributeDescriptor::number("created");

pub const LIST_LINKS_INDEX: &str = "list-links-index";

static LINKS_INDEXES: [Index; 1] = [Index::PartitionSort {
	name: LIST_LINKS_INDEX,
	partition: &LOCAL_ACCOUNT_ID,
	sort: &LINKING_ACCOUNT_MANAGER,
}];

pub static LINKS_TABLE: TableDescriptor = TableDescriptor {
	base_name: "curity-links",
	indexes: &LINKS_INDEXES,
	attributes: &[
		("linkedAccountId", &LINKED_ACCOUNT_ID),
		("linkedAccountDomainName", &LINKED_ACCOUNT_DOMAIN),
		("localAccountId", &LOCAL_ACCOUNT_ID),
		("linkingAccountManager", &LINKING_ACCOUNT_MANAGER),
	],
};

fn link_key(linked_account_id: &str, domain: &str) -> String {
	format!("{}@{}", linked_account_id, domain)
}

fn to_item(link: &AccountLink) -> Item {
	let mut item = Item::new();
	item.insert(
		LINK_PK.name.to_string(),
		AttributeValue::S(link_key(
			&link.linked_account_id,
			&link.linked_account_domain_name,
		)),
	);
	item.insert(
		LINKED_ACCOUNT_ID.name.to_string(),
		AttributeValue::S(link.linked_account_id.clone()),
	);
	item.insert(
		LINKED_ACCOUNT_DOMAIN.name.to_string(),
		AttributeValue::S(link.linked_account_domain_name.clone()),
	);
	item.insert(
		LOCAL_ACCOUNT_ID.name.to_string(),
		AttributeValue::S(link.local_account_id.clone()),
	);
	item.insert(
		LINKING_ACCOUNT_MANAGER.name.to_string(),
		AttributeValue::S(link.linking_account_manager.clone()),
	);
	if let Some(created) = link.created {
		item.insert(
			LINK_CREATED.name.to_string(),
			AttributeValue::N(created.to_string()),
		);
	}
	item
}

fn from_item(item: &Item) -> Result<AccountLink> {
	let get = |attr: &'static AttributeDescriptor| -> Result<String> {
		match item.get(attr.name) {
			Some(AttributeValue::S(value)) => Ok(value.clone()),
			_ => Err(DbError::Schema(format!("Item is missing {}", attr.name))),
		}
	};
	let created = match item.get(LINK_CREATED.name) {
		Some(AttributeValue::N(value)) => value.parse::<i64>().ok(),
		_ => None,
	};
	Ok(AccountLink {
		linked_account_id: get(&LINKED_ACCOUNT_ID)?,
		linked_account_domain_name: get(&LINKED_ACCOUNT_DOMAIN)?,
		local_account_id: get(&LOCAL_ACCOUNT_ID)?,
		linking_account_manager: get(&LINKING_ACCOUNT_MANAGER)?,
		created,
	})
}

pub struct LinkStore {
	client: Arc<dyn DynamoClient>,
	table_name: String,
}

impl LinkStore {
	pub fn new(client: Arc<dyn DynamoClient>, config: &DynamoDbConfig) -> Self {
		Self {
			client,
			table_name: config.table_name(LINKS_TABLE.base_name),
		}
	}

	/// Creates or refreshes a link. Re-linking the same foreign identity
	/// overwrites the previous row, last write wins.
	#[tracing::instrument(skip(self, link), fields(local_account_id = %link.local_account_id))]
	pub async fn create_link(&self, mut link: AccountLink) -> Result<AccountLink> {
		if link.created.is_none() {
			link.created = Some(Utc::now().timestamp());
		}
		self.client
			.put_item(&self.table_name, to_item(&link), None)
			.await?;
		info!(
			linked_account_id = %link.linked_account_id,
			domain = %link.linked_account_domain_name,
			"created account link"
		);
		Ok(link)
	}

	pub async fn get_link(
		&self,
		linked_account_id: &str,
		linked_account_domain_name: &str,
	) -> Result<Option<AccountLink>> {
		let key = Item::from([(
			LINK_PK.name.to_string(),
			AttributeValue::S(link_key(linked_account_id, linked_account_domain_name)),
		)]);
		let item = self
			.client
			.get_item(&self.table_name, key, true, None)
			.await?;
		item.as_ref().map(from_item).transpose()
	}

	/// All links of a local account created through the given account
	/// manager, via the listing index.
	pub async fn list_links(
		&self,
		linking_account_manager: &str,
		local_account_id: &str,
	) -> Result<Vec<AccountLink>> {
		let mut builder = ExpressionBuilder::new();
		let partition_name = builder.name(&LOCAL_ACCOUNT_ID);
		let partition_value = builder.value(
			&LOCAL_ACCOUNT_ID,
			&AttrValue::Str(local_account_id.to_string()),
		);
		let sort_name = builder.name(&LINKING_ACCOUNT_MANAGER);
		let sort_value = builder.value(
			&LINKING_ACCOUNT_MANAGER,
			&AttrValue::Str(linking_account_manager.to_string()),
		);
		let rendered = builder.build(format!(
			"{} = {} AND {} = {}",
			partition_name, partition_value, sort_name, sort_value
		));
		let expression = QueryExpression {
			key_condition: rendered.text,
			filter: None,
			names: rendered.names,
			values: rendered.values,
		};

		let stream = pagination::query_sequence(
			self.client.clone(),
			self.table_name.clone(),
			Some(LIST_LINKS_INDEX.to_string()),
			expression,
			None,
		);
		futures::pin_mut!(stream);
		let mut links = Vec::new();
		while let Some(item) = stream.try_next().await? {
			links.push(from_item(&item)?);
		}
		Ok(links)
	}

	/// Idempotent: deleting an absent link succeeds.
	#[tracing::instrument(skip(self))]
	pub async fn delete_link(
		&self,
		linked_account_id: &str,
		linked_account_domain_name: &str,
	) -> Result<()> {
		let key = Item::from([(
			LINK_PK.name.to_string(),
			AttributeValue::S(link_key(linked_account_id, linked_account_domain_name)),
		)]);
		self.client
			.delete_item(&self.table_name, key, None)
			.await
	}

	/// Removes every link of a local account under one account manager,
	/// e.g. when the account itself is deleted. Returns how many were
	/// removed.
	#[tracing::instrument(skip(self))]
	pub async fn delete_links_for_account(
		&self,
		linking_account_manager: &str,
		local_account_id: &str,
	) -> Result<usize> {
		let links = self
			.list_links(linking_account_manager, local_account_id)
			.await?;
		let count = links.len();
		for link in links {
			self.delete_link(&link.linked_account_id, &link.linked_account_domain_name)
				.await?;
		}
		Ok(count)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{FakeIndex, InMemoryDynamoClient};

	fn link(linked: &str, domain: &str, local: &str, manager: &str) -> AccountLink {
		AccountLink {
			linked_account_id: linked.to_string(),
			linked_account_domain_name: domain.to_string(),
			local_account_id: local.to_string(),
			linking_account_manager: manager.to_string(),
			created: None,
		}
	}

	fn setup() -> (Arc<InMemoryDynamoClient>, LinkStore) {
		let client = Arc::new(InMemoryDynamoClient::with_page_size(2));
		client.create_table(
			"curity-links",
			"pk",
			vec![FakeIndex {
				name: LIST_LINKS_INDEX.to_string(),
				partition: LOCAL_ACCOUNT_ID.name.to_string(),
				sort: Some(LINKING_ACCOUNT_MANAGER.name.to_string()),
			}],
		);
		let store = LinkStore::new(client.clone(), &DynamoDbConfig::default());
		(client, store)
	}

	#[tokio::test]
	async fn create_get_delete_round_trip() {
		let (_, store) = setup();
		let created = store
			.create_link(link("ext-1", "github", "local-1", "default"))
			.await
			.unwrap();
		assert!(created.created.is_some());

		let fetched = store.get_link("ext-1", "github").await.unwrap().unwrap();
		assert_eq!(fetched.local_account_id, "local-1");

		store.delete_link("ext-1", "github").await.unwrap();
		assert!(store.get_link("ext-1", "github").await.unwrap().is_none());
		// Deleting again is a no-op.
		store.delete_link("ext-1", "github").await.unwrap();
	}

	#[tokio::test]
	async fn list_links_filters_by_account_and_manager() {
		let (_, store) = setup();
		for (linked, domain, local, manager) in [
			("e1", "github", "local-1", "default"),
			("e2", "google", "local-1", "default"),
			("e3", "github", "local-1", "other"),
			("e4", "github", "local-2", "default"),
		] {
			store
				.create_link(link(linked, domain, local, manager))
				.await
				.unwrap();
		}

		let links = store.list_links("default", "local-1").await.unwrap();
		let mut linked: Vec<String> =
			links.iter().map(|l| l.linked_account_id.clone()).collect();
		linked.sort();
		assert_eq!(linked, vec!["e1".to_string(), "e2".to_string()]);
	}

	#[tokio::test]
	async fn delete_links_for_account_sweeps() {
		let (_, store) = setup();
		for n in 1..=3 {
			store
				.create_link(link(&format!("e{}", n), "github", "local-1", "default"))
				.await
				.unwrap();
		}
		let removed = store
			.delete_links_for_account("default", "local-1")
			.await
			.unwrap();
		assert_eq!(removed, 3);
		assert!(store
			.list_links("default", "local-1")
			.await
			.unwrap()
			.is_empty());
	}
}
