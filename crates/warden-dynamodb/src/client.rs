// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The store client contract and its AWS SDK implementation.
//!
//! Everything above this module speaks [`DynamoClient`]: a thin, narrow
//! surface over the seven store operations the data-access layer needs.
//! [`SdkDynamoClient`] is the production implementation; the `testing`
//! module provides a deterministic in-memory one.

use crate::config::DynamoDbConfig;
use crate::error::{DbError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use std::collections::HashMap;

pub type Item = HashMap<String, AttributeValue>;

/// An expression string plus its `#name` and `:value` substitution maps.
#[derive(Debug, Clone, Default)]
pub struct Expression {
	pub text: String,
	pub names: HashMap<String, String>,
	pub values: HashMap<String, AttributeValue>,
}

/// A key condition and optional filter sharing one placeholder namespace,
/// the way a store query request carries exactly one name map and one value
/// map.
#[derive(Debug, Clone)]
pub struct QueryExpression {
	pub key_condition: String,
	pub filter: Option<String>,
	pub names: HashMap<String, String>,
	pub values: HashMap<String, AttributeValue>,
}

/// One page of a query or scan.
#[derive(Debug, Clone)]
pub struct Page {
	pub items: Vec<Item>,
	pub last_evaluated_key: Option<Item>,
}

/// One entry of a multi-item transactional write.
#[derive(Debug, Clone)]
pub enum TransactWriteOp {
	Put {
		table: String,
		item: Item,
		condition: Option<Expression>,
	},
	Delete {
		table: String,
		key: Item,
		condition: Option<Expression>,
	},
	Update {
		table: String,
		key: Item,
		update: Expression,
		condition: Option<Expression>,
	},
}

#[async_trait]
pub trait DynamoClient: Send + Sync {
	async fn get_item(
		&self,
		table: &str,
		key: Item,
		consistent: bool,
		projection: Option<&[&str]>,
	) -> Result<Option<Item>>;

	async fn put_item(&self, table: &str, item: Item, condition: Option<Expression>)
		-> Result<()>;

	async fn delete_item(
		&self,
		table: &str,
		key: Item,
		condition: Option<Expression>,
	) -> Result<()>;

	async fn update_item(
		&self,
		table: &str,
		key: Item,
		update: Expression,
		condition: Option<Expression>,
	) -> Result<()>;

	async fn query(
		&self,
		table: &str,
		index: Option<&str>,
		expression: &QueryExpression,
		limit: Option<i32>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page>;

	async fn scan(
		&self,
		table: &str,
		index: Option<&str>,
		filter: Option<&Expression>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page>;

	/// Submits every operation as one all-or-nothing transaction. A
	/// transaction cancelled because any item's condition failed surfaces as
	/// [`DbError::ConditionFailed`].
	async fn transact_write(&self, operations: Vec<TransactWriteOp>) -> Result<()>;
}

/// Production client over the AWS SDK.
#[derive(Clone)]
pub struct SdkDynamoClient {
	client: Client,
}

impl SdkDynamoClient {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	pub async fn connect(config: &DynamoDbConfig) -> Self {
		let mut loader = aws_config::defaults(BehaviorVersion::latest());
		if let Some(region) = &config.region {
			loader = loader.region(Region::new(region.clone()));
		}
		if let (Some(access_key_id), Some(secret_access_key)) =
			(&config.access_key_id, &config.secret_access_key)
		{
			loader = loader.credentials_provider(SharedCredentialsProvider::new(
				Credentials::new(
					access_key_id.clone(),
					secret_access_key.clone(),
					config.session_token.clone(),
					None,
					"warden_dynamodb_config",
				),
			));
		}
		let sdk_config = loader.load().await;
		let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
		if let Some(endpoint) = &config.endpoint_override {
			builder = builder.endpoint_url(endpoint);
		}
		Self {
			client: Client::from_conf(builder.build()),
		}
	}
}

fn store_error<E>(err: E) -> DbError
where
	E: std::error::Error,
{
	DbError::Store(DisplayErrorContext(&err).to_string())
}

fn optional(map: HashMap<String, String>) -> Option<HashMap<String, String>> {
	(!map.is_empty()).then_some(map)
}

fn optional_values(
	map: HashMap<String, AttributeValue>,
) -> Option<HashMap<String, AttributeValue>> {
	(!map.is_empty()).then_some(map)
}

/// Builds a projection expression through `#name` placeholders so that
/// reserved words never leak into the expression text.
fn projection(attributes: &[&str]) -> (String, HashMap<String, String>) {
	let mut names = HashMap::new();
	let mut parts = Vec::with_capacity(attributes.len());
	for attribute in attributes {
		let placeholder = format!("#{}", attribute);
		parts.push(placeholder.clone());
		names.insert(placeholder, attribute.to_string());
	}
	(parts.join(", "), names)
}

#[async_trait]
impl DynamoClient for SdkDynamoClient {
	async fn get_item(
		&self,
		table: &str,
		key: Item,
		consistent: bool,
		projection_attrs: Option<&[&str]>,
	) -> Result<Option<Item>> {
		let mut request = self
			.client
			.get_item()
			.table_name(table)
			.set_key(Some(key))
			.consistent_read(consistent);
		if let Some(attributes) = projection_attrs {
			let (expression, names) = projection(attributes);
			request = request
				.projection_expression(expression)
				.set_expression_attribute_names(optional(names));
		}
		let output = request.send().await.map_err(store_error)?;
		Ok(output.item)
	}

	async fn put_item(
		&self,
		table: &str,
		item: Item,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut request = self.client.put_item().table_name(table).set_item(Some(item));
		if let Some(condition) = condition {
			request = request
				.condition_expression(condition.text)
				.set_expression_attribute_names(optional(condition.names))
				.set_expression_attribute_values(optional_values(condition.values));
		}
		request.send().await.map_err(|err| {
			let service = err.into_service_error();
			if service.is_conditional_check_failed_exception() {
				DbError::ConditionFailed
			} else {
				store_error(service)
			}
		})?;
		Ok(())
	}

	async fn delete_item(
		&self,
		table: &str,
		key: Item,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut request = self
			.client
			.delete_item()
			.table_name(table)
			.set_key(Some(key));
		if let Some(condition) = condition {
			request = request
				.condition_expression(condition.text)
				.set_expression_attribute_names(optional(condition.names))
				.set_expression_attribute_values(optional_values(condition.values));
		}
		request.send().await.map_err(|err| {
			let service = err.into_service_error();
			if service.is_conditional_check_failed_exception() {
				DbError::ConditionFailed
			} else {
				store_error(service)
			}
		})?;
		Ok(())
	}

	async fn update_item(
		&self,
		table: &str,
		key: Item,
		update: Expression,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut names = update.names;
		let mut values = update.values;
		let mut request = self
			.client
			.update_item()
			.table_name(table)
			.set_key(Some(key))
			.update_expression(update.text);
		if let Some(condition) = condition {
			request = request.condition_expression(condition.text);
			names.extend(condition.names);
			values.extend(condition.values);
		}
		request
			.set_expression_attribute_names(optional(names))
			.set_expression_attribute_values(optional_values(values))
			.send()
			.await
			.map_err(|err| {
				let service = err.into_service_error();
				if service.is_conditional_check_failed_exception() {
					DbError::ConditionFailed
				} else {
					store_error(service)
				}
			})?;
		Ok(())
	}

	async fn query(
		&self,
		table: &str,
		index: Option<&str>,
		expression: &QueryExpression,
		limit: Option<i32>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page> {
		let output = self
			.client
			.query()
			.table_name(table)
			.set_index_name(index.map(str::to_string))
			.key_condition_expression(expression.key_condition.clone())
			.set_filter_expression(expression.filter.clone())
			.set_expression_attribute_names(optional(expression.names.clone()))
			.set_expression_attribute_values(optional_values(expression.values.clone()))
			.set_limit(limit)
			.set_exclusive_start_key(exclusive_start_key)
			.send()
			.await
			.map_err(store_error)?;
		Ok(Page {
			items: output.items.unwrap_or_default(),
			last_evaluated_key: output.last_evaluated_key,
		})
	}

	async fn scan(
		&self,
		table: &str,
		index: Option<&str>,
		filter: Option<&Expression>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page> {
		let mut request = self
			.client
			.scan()
			.table_name(table)
			.set_index_name(index.map(str::to_string))
			.set_exclusive_start_key(exclusive_start_key);
		if let Some(filter) = filter {
			request = request
				.filter_expression(filter.text.clone())
				.set_expression_attribute_names(optional(filter.names.clone()))
				.set_expression_attribute_values(optional_values(filter.values.clone()));
		}
		let output = request.send().await.map_err(store_error)?;
		Ok(Page {
			items: output.items.unwrap_or_default(),
			last_evaluated_key: output.last_evaluated_key,
		})
	}

	async fn transact_write(&self, operations: Vec<TransactWriteOp>) -> Result<()> {
		let mut items = Vec::with_capacity(operations.len());
		for operation in operations {
			let item = match operation {
				TransactWriteOp::Put {
					table,
					item,
					condition,
				} => {
					let mut put = Put::builder().table_name(table).set_item(Some(item));
					if let Some(condition) = condition {
						put = put
							.condition_expression(condition.text)
							.set_expression_attribute_names(optional(condition.names))
							.set_expression_attribute_values(optional_values(condition.values));
					}
					TransactWriteItem::builder()
						.put(put.build().map_err(store_error)?)
						.build()
				}
				TransactWriteOp::Delete {
					table,
					key,
					condition,
				} => {
					let mut delete = Delete::builder().table_name(table).set_key(Some(key));
					if let Some(condition) = condition {
						delete = delete
							.condition_expression(condition.text)
							.set_expression_attribute_names(optional(condition.names))
							.set_expression_attribute_values(optional_values(condition.values));
					}
					TransactWriteItem::builder()
						.delete(delete.build().map_err(store_error)?)
						.build()
				}
				TransactWriteOp::Update {
					table,
					key,
					update,
					condition,
				} => {
					let mut names = update.names;
					let mut values = update.values;
					let mut builder = Update::builder()
						.table_name(table)
						.set_key(Some(key))
						.update_expression(update.text);
					if let Some(condition) = condition {
						builder = builder.condition_expression(condition.text);
						names.extend(condition.names);
						values.extend(condition.values);
					}
					builder = builder
						.set_expression_attribute_names(optional(names))
						.set_expression_attribute_values(optional_values(values));
					TransactWriteItem::builder()
						.update(builder.build().map_err(store_error)?)
						.build()
				}
			};
			items.push(item);
		}

		self.client
			.transact_write_items()
			.set_transact_items(Some(items))
			.send()
			.await
			.map_err(|err| match err.into_service_error() {
				TransactWriteItemsError::TransactionCanceledException(cancelled) => {
					let condition_failed = cancelled
						.cancellation_reasons()
						.iter()
						.any(|reason| reason.code() == Some("ConditionalCheckFailed"));
					if condition_failed {
						DbError::ConditionFailed
					} else {
						store_error(cancelled)
					}
				}
				other => store_error(other),
			})?;
		Ok(())
	}
}
