// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic in-memory store for tests.
//!
//! [`InMemoryDynamoClient`] simulates the store surface the data-access
//! layer depends on: registered tables with a partition key and named
//! secondary indexes, conditional single-item writes, all-or-nothing
//! transactions, and paginated queries and scans. Condition, key-condition
//! and filter strings are actually parsed and evaluated against items, so
//! the expressions the emitter produces are exercised end to end.

use crate::client::{
	DynamoClient, Expression, Item, Page, QueryExpression, TransactWriteOp,
};
use crate::error::{DbError, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use winnow::ascii::{space0, space1};
use winnow::combinator::alt;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

/// A secondary index of a registered table.
#[derive(Debug, Clone)]
pub struct FakeIndex {
	pub name: String,
	pub partition: String,
	pub sort: Option<String>,
}

struct FakeTable {
	partition_attr: String,
	indexes: Vec<FakeIndex>,
	items: BTreeMap<String, Item>,
}

/// In-memory [`DynamoClient`]. Queries and scans return pages of at most
/// `page_size` items with a continuation key, so pagination paths run for
/// real in tests.
pub struct InMemoryDynamoClient {
	tables: Mutex<HashMap<String, FakeTable>>,
	page_size: usize,
}

impl InMemoryDynamoClient {
	pub fn new() -> Self {
		Self::with_page_size(100)
	}

	pub fn with_page_size(page_size: usize) -> Self {
		Self {
			tables: Mutex::new(HashMap::new()),
			page_size,
		}
	}

	pub fn create_table(
		&self,
		name: impl Into<String>,
		partition_attr: impl Into<String>,
		indexes: Vec<FakeIndex>,
	) {
		self.tables.lock().unwrap().insert(
			name.into(),
			FakeTable {
				partition_attr: partition_attr.into(),
				indexes,
				items: BTreeMap::new(),
			},
		);
	}

	/// Snapshot of a table's items, in partition-key order.
	pub fn items(&self, table: &str) -> Vec<Item> {
		self.tables
			.lock()
			.unwrap()
			.get(table)
			.map(|table| table.items.values().cloned().collect())
			.unwrap_or_default()
	}

	fn partition_of(table: &FakeTable, item: &Item) -> Result<String> {
		match item.get(&table.partition_attr) {
			Some(AttributeValue::S(value)) => Ok(value.clone()),
			_ => Err(DbError::Store(format!(
				"item is missing its partition key {}",
				table.partition_attr
			))),
		}
	}

	fn key_of(table: &FakeTable, key: &Item) -> Result<String> {
		match key.get(&table.partition_attr) {
			Some(AttributeValue::S(value)) => Ok(value.clone()),
			_ => Err(DbError::Store(format!(
				"key is missing {}",
				table.partition_attr
			))),
		}
	}

	fn paginate(&self, table: &FakeTable, candidates: Vec<Item>, start: Option<Item>) -> Result<Page> {
		let skip = match start {
			None => 0,
			Some(start) => {
				let resume_after = Self::key_of(table, &start)?;
				candidates
					.iter()
					.position(|item| {
						Self::partition_of(table, item)
							.map(|pk| pk == resume_after)
							.unwrap_or(false)
					})
					.map(|position| position + 1)
					.unwrap_or(candidates.len())
			}
		};
		let remaining = &candidates[skip.min(candidates.len())..];
		let page: Vec<Item> = remaining.iter().take(self.page_size).cloned().collect();
		let last_evaluated_key = if remaining.len() > self.page_size {
			let last = page.last().expect("page_size is non-zero");
			Some(Item::from([(
				table.partition_attr.clone(),
				AttributeValue::S(Self::partition_of(table, last)?),
			)]))
		} else {
			None
		};
		Ok(Page {
			items: page,
			last_evaluated_key,
		})
	}
}

impl Default for InMemoryDynamoClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl DynamoClient for InMemoryDynamoClient {
	async fn get_item(
		&self,
		table: &str,
		key: Item,
		_consistent: bool,
		projection: Option<&[&str]>,
	) -> Result<Option<Item>> {
		let tables = self.tables.lock().unwrap();
		let table = lookup(&tables, table)?;
		let pk = Self::key_of(table, &key)?;
		let item = table.items.get(&pk).cloned();
		Ok(item.map(|item| match projection {
			None => item,
			Some(attributes) => item
				.into_iter()
				.filter(|(name, _)| attributes.contains(&name.as_str()))
				.collect(),
		}))
	}

	async fn put_item(
		&self,
		table: &str,
		item: Item,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut tables = self.tables.lock().unwrap();
		let table = lookup_mut(&mut tables, table)?;
		let pk = Self::partition_of(table, &item)?;
		if let Some(condition) = &condition {
			if !evaluate_expression(condition, table.items.get(&pk))? {
				return Err(DbError::ConditionFailed);
			}
		}
		table.items.insert(pk, item);
		Ok(())
	}

	async fn delete_item(
		&self,
		table: &str,
		key: Item,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut tables = self.tables.lock().unwrap();
		let table = lookup_mut(&mut tables, table)?;
		let pk = Self::key_of(table, &key)?;
		if let Some(condition) = &condition {
			if !evaluate_expression(condition, table.items.get(&pk))? {
				return Err(DbError::ConditionFailed);
			}
		}
		table.items.remove(&pk);
		Ok(())
	}

	async fn update_item(
		&self,
		table: &str,
		key: Item,
		update: Expression,
		condition: Option<Expression>,
	) -> Result<()> {
		let mut tables = self.tables.lock().unwrap();
		let table = lookup_mut(&mut tables, table)?;
		let pk = Self::key_of(table, &key)?;
		if let Some(condition) = &condition {
			if !evaluate_expression(condition, table.items.get(&pk))? {
				return Err(DbError::ConditionFailed);
			}
		}
		let mut item = table.items.get(&pk).cloned().unwrap_or_else(|| key.clone());
		apply_update(&update, &mut item)?;
		table.items.insert(pk, item);
		Ok(())
	}

	async fn query(
		&self,
		table: &str,
		index: Option<&str>,
		expression: &QueryExpression,
		_limit: Option<i32>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page> {
		let tables = self.tables.lock().unwrap();
		let table = lookup(&tables, table)?;
		let mut candidates: Vec<Item> = table.items.values().cloned().collect();
		if let Some(index_name) = index {
			let index = table
				.indexes
				.iter()
				.find(|candidate| candidate.name == index_name)
				.ok_or_else(|| DbError::Store(format!("unknown index {}", index_name)))?;
			// Items missing an index key attribute do not appear in it.
			candidates.retain(|item| {
				item.contains_key(&index.partition)
					&& index
						.sort
						.as_ref()
						.map(|sort| item.contains_key(sort))
						.unwrap_or(true)
			});
			let sort_attr = index.sort.clone();
			let partition_attr = index.partition.clone();
			candidates.sort_by(|left, right| {
				compare_attribute(left, right, &partition_attr)
					.then_with(|| match &sort_attr {
						Some(sort) => compare_attribute(left, right, sort),
						None => Ordering::Equal,
					})
			});
		}

		let key_condition = Expression {
			text: expression.key_condition.clone(),
			names: expression.names.clone(),
			values: expression.values.clone(),
		};
		let mut matching = Vec::new();
		for item in candidates {
			if !evaluate_expression(&key_condition, Some(&item))? {
				continue;
			}
			if let Some(filter) = &expression.filter {
				let filter = Expression {
					text: filter.clone(),
					names: expression.names.clone(),
					values: expression.values.clone(),
				};
				if !evaluate_expression(&filter, Some(&item))? {
					continue;
				}
			}
			matching.push(item);
		}
		self.paginate(table, matching, exclusive_start_key)
	}

	async fn scan(
		&self,
		table: &str,
		_index: Option<&str>,
		filter: Option<&Expression>,
		exclusive_start_key: Option<Item>,
	) -> Result<Page> {
		let tables = self.tables.lock().unwrap();
		let table = lookup(&tables, table)?;
		let mut matching = Vec::new();
		for item in table.items.values() {
			if let Some(filter) = filter {
				if !evaluate_expression(filter, Some(item))? {
					continue;
				}
			}
			matching.push(item.clone());
		}
		self.paginate(table, matching, exclusive_start_key)
	}

	async fn transact_write(&self, operations: Vec<TransactWriteOp>) -> Result<()> {
		let mut tables = self.tables.lock().unwrap();
		// Validate every condition against the committed state before any
		// write lands: all or nothing.
		for operation in &operations {
			let (existing, condition) = match operation {
				TransactWriteOp::Put {
					table,
					item,
					condition,
				} => {
					let table_ref = lookup(&tables, table)?;
					let pk = Self::partition_of(table_ref, item)?;
					(table_ref.items.get(&pk), condition)
				}
				TransactWriteOp::Delete {
					table,
					key,
					condition,
				} => {
					let table_ref = lookup(&tables, table)?;
					let pk = Self::key_of(table_ref, key)?;
					(table_ref.items.get(&pk), condition)
				}
				TransactWriteOp::Update {
					table,
					key,
					condition,
					..
				} => {
					let table_ref = lookup(&tables, table)?;
					let pk = Self::key_of(table_ref, key)?;
					(table_ref.items.get(&pk), condition)
				}
			};
			if let Some(condition) = condition {
				if !evaluate_expression(condition, existing)? {
					return Err(DbError::ConditionFailed);
				}
			}
		}

		for operation in operations {
			match operation {
				TransactWriteOp::Put { table, item, .. } => {
					let table = lookup_mut(&mut tables, &table)?;
					let pk = Self::partition_of(table, &item)?;
					table.items.insert(pk, item);
				}
				TransactWriteOp::Delete { table, key, .. } => {
					let table = lookup_mut(&mut tables, &table)?;
					let pk = Self::key_of(table, &key)?;
					table.items.remove(&pk);
				}
				TransactWriteOp::Update {
					table, key, update, ..
				} => {
					let table = lookup_mut(&mut tables, &table)?;
					let pk = Self::key_of(table, &key)?;
					let mut item =
						table.items.get(&pk).cloned().unwrap_or_else(|| key.clone());
					apply_update(&update, &mut item)?;
					table.items.insert(pk, item);
				}
			}
		}
		Ok(())
	}
}

fn lookup<'a>(tables: &'a HashMap<String, FakeTable>, name: &str) -> Result<&'a FakeTable> {
	tables
		.get(name)
		.ok_or_else(|| DbError::Store(format!("unknown table {}", name)))
}

fn lookup_mut<'a>(
	tables: &'a mut HashMap<String, FakeTable>,
	name: &str,
) -> Result<&'a mut FakeTable> {
	tables
		.get_mut(name)
		.ok_or_else(|| DbError::Store(format!("unknown table {}", name)))
}

fn compare_attribute(left: &Item, right: &Item, attr: &str) -> Ordering {
	match (left.get(attr), right.get(attr)) {
		(Some(left), Some(right)) => compare_values(left, right).unwrap_or(Ordering::Equal),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

fn compare_values(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
	match (left, right) {
		(AttributeValue::S(left), AttributeValue::S(right)) => {
			Some(left.as_bytes().cmp(right.as_bytes()))
		}
		(AttributeValue::N(left), AttributeValue::N(right)) => {
			match (left.parse::<i64>(), right.parse::<i64>()) {
				(Ok(left), Ok(right)) => Some(left.cmp(&right)),
				_ => None,
			}
		}
		(AttributeValue::Bool(left), AttributeValue::Bool(right)) => Some(left.cmp(right)),
		_ => None,
	}
}

// ============================================================================
// Expression evaluation
// ============================================================================

/// The subset of the store expression grammar the emitter produces.
#[derive(Debug, Clone, PartialEq)]
enum Condition {
	Or(Box<Condition>, Box<Condition>),
	And(Box<Condition>, Box<Condition>),
	Compare {
		name: String,
		operator: CompareOperator,
		value: String,
	},
	Between {
		name: String,
		lower: String,
		upper: String,
	},
	BeginsWith {
		name: String,
		value: String,
	},
	Exists(String),
	NotExists(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOperator {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

fn evaluate_expression(expression: &Expression, item: Option<&Item>) -> Result<bool> {
	let condition = parse_condition
		.parse(expression.text.trim())
		.map_err(|err| {
			DbError::Store(format!("bad expression {:?}: {}", expression.text, err))
		})?;
	evaluate_condition(&condition, expression, item)
}

fn evaluate_condition(
	condition: &Condition,
	expression: &Expression,
	item: Option<&Item>,
) -> Result<bool> {
	match condition {
		Condition::Or(left, right) => Ok(evaluate_condition(left, expression, item)?
			|| evaluate_condition(right, expression, item)?),
		Condition::And(left, right) => Ok(evaluate_condition(left, expression, item)?
			&& evaluate_condition(right, expression, item)?),
		Condition::Exists(name) => Ok(attribute(expression, item, name)?.is_some()),
		Condition::NotExists(name) => Ok(attribute(expression, item, name)?.is_none()),
		Condition::BeginsWith { name, value } => {
			let stored = attribute(expression, item, name)?;
			let value = placeholder_value(expression, value)?;
			match (stored, value) {
				(Some(AttributeValue::S(stored)), AttributeValue::S(prefix)) => {
					Ok(stored.starts_with(prefix.as_str()))
				}
				_ => Ok(false),
			}
		}
		Condition::Between { name, lower, upper } => {
			let Some(stored) = attribute(expression, item, name)? else {
				return Ok(false);
			};
			let lower = placeholder_value(expression, lower)?;
			let upper = placeholder_value(expression, upper)?;
			Ok(compare_values(stored, lower).is_some_and(Ordering::is_ge)
				&& compare_values(stored, upper).is_some_and(Ordering::is_le))
		}
		Condition::Compare {
			name,
			operator,
			value,
		} => {
			let Some(stored) = attribute(expression, item, name)? else {
				return Ok(false);
			};
			let value = placeholder_value(expression, value)?;
			let Some(ordering) = compare_values(stored, value) else {
				return Ok(false);
			};
			Ok(match operator {
				CompareOperator::Eq => ordering == Ordering::Equal,
				CompareOperator::Ne => ordering != Ordering::Equal,
				CompareOperator::Lt => ordering == Ordering::Less,
				CompareOperator::Le => ordering != Ordering::Greater,
				CompareOperator::Gt => ordering == Ordering::Greater,
				CompareOperator::Ge => ordering != Ordering::Less,
			})
		}
	}
}

fn attribute<'a>(
	expression: &Expression,
	item: Option<&'a Item>,
	name: &str,
) -> Result<Option<&'a AttributeValue>> {
	let attr_name = expression
		.names
		.get(name)
		.ok_or_else(|| DbError::Store(format!("unknown name placeholder {}", name)))?;
	Ok(item.and_then(|item| item.get(attr_name)))
}

fn placeholder_value<'a>(
	expression: &'a Expression,
	placeholder: &str,
) -> Result<&'a AttributeValue> {
	expression
		.values
		.get(placeholder)
		.ok_or_else(|| DbError::Store(format!("unknown value placeholder {}", placeholder)))
}

/// Applies a `SET #a = :v, #b = :w` update expression.
fn apply_update(update: &Expression, item: &mut Item) -> Result<()> {
	let text = update.text.trim();
	let assignments = text
		.strip_prefix("SET ")
		.ok_or_else(|| DbError::Store(format!("unsupported update expression {:?}", text)))?;
	for assignment in assignments.split(", ") {
		let (name, value) = assignment
			.split_once(" = ")
			.ok_or_else(|| DbError::Store(format!("bad assignment {:?}", assignment)))?;
		let attr_name = update
			.names
			.get(name)
			.ok_or_else(|| DbError::Store(format!("unknown name placeholder {}", name)))?;
		let value = update
			.values
			.get(value)
			.ok_or_else(|| DbError::Store(format!("unknown value placeholder {}", value)))?;
		item.insert(attr_name.clone(), value.clone());
	}
	Ok(())
}

// ----------------------------------------------------------------------------
// Grammar
// ----------------------------------------------------------------------------

fn parse_condition(input: &mut &str) -> std::result::Result<Condition, ContextError> {
	parse_or(input)
}

fn parse_or(input: &mut &str) -> std::result::Result<Condition, ContextError> {
	let mut result = parse_and(input)?;
	loop {
		let checkpoint = *input;
		let spaced: std::result::Result<&str, ContextError> = space1.parse_next(input);
		if spaced.is_err() {
			*input = checkpoint;
			break;
		}
		let keyword: std::result::Result<&str, ContextError> =
			winnow::ascii::Caseless("OR").parse_next(input);
		if keyword.is_err() {
			*input = checkpoint;
			break;
		}
		let _: &str = space1.parse_next(input)?;
		let right = parse_and(input)?;
		result = Condition::Or(Box::new(result), Box::new(right));
	}
	Ok(result)
}

fn parse_and(input: &mut &str) -> std::result::Result<Condition, ContextError> {
	let mut result = parse_atom(input)?;
	loop {
		let checkpoint = *input;
		let spaced: std::result::Result<&str, ContextError> = space1.parse_next(input);
		if spaced.is_err() {
			*input = checkpoint;
			break;
		}
		let keyword: std::result::Result<&str, ContextError> =
			winnow::ascii::Caseless("AND").parse_next(input);
		if keyword.is_err() {
			*input = checkpoint;
			break;
		}
		let _: &str = space1.parse_next(input)?;
		let right = parse_atom(input)?;
		result = Condition::And(Box::new(result), Box::new(right));
	}
	Ok(result)
}

fn parse_atom(input: &mut &str) -> std::result::Result<Condition, ContextError> {
	let _: &str = space0.parse_next(input)?;
	if input.starts_with('(') {
		let _ = '('.parse_next(input)?;
		let condition = parse_condition(input)?;
		let _: &str = space0.parse_next(input)?;
		let _ = ')'.parse_next(input)?;
		return Ok(condition);
	}
	if let Some(rest) = input.strip_prefix("attribute_exists(") {
		*input = rest;
		let name = parse_name(input)?;
		let _ = ')'.parse_next(input)?;
		return Ok(Condition::Exists(name));
	}
	if let Some(rest) = input.strip_prefix("attribute_not_exists(") {
		*input = rest;
		let name = parse_name(input)?;
		let _ = ')'.parse_next(input)?;
		return Ok(Condition::NotExists(name));
	}
	if let Some(rest) = input.strip_prefix("begins_with(") {
		*input = rest;
		let name = parse_name(input)?;
		let _ = ','.parse_next(input)?;
		let _: &str = space0.parse_next(input)?;
		let value = parse_value(input)?;
		let _ = ')'.parse_next(input)?;
		return Ok(Condition::BeginsWith { name, value });
	}
	parse_comparison(input)
}

fn parse_comparison(input: &mut &str) -> std::result::Result<Condition, ContextError> {
	let name = parse_name(input)?;
	let _: &str = space1.parse_next(input)?;

	let checkpoint = *input;
	let between: std::result::Result<&str, ContextError> =
		winnow::ascii::Caseless("BETWEEN").parse_next(input);
	if between.is_ok() {
		let _: &str = space1.parse_next(input)?;
		let lower = parse_value(input)?;
		let _: &str = space1.parse_next(input)?;
		let _: &str = winnow::ascii::Caseless("AND").parse_next(input)?;
		let _: &str = space1.parse_next(input)?;
		let upper = parse_value(input)?;
		return Ok(Condition::Between { name, lower, upper });
	}
	*input = checkpoint;

	let operator = alt((
		"<>".map(|_: &str| CompareOperator::Ne),
		"<=".map(|_: &str| CompareOperator::Le),
		">=".map(|_: &str| CompareOperator::Ge),
		"=".map(|_: &str| CompareOperator::Eq),
		"<".map(|_: &str| CompareOperator::Lt),
		">".map(|_: &str| CompareOperator::Gt),
	))
	.parse_next(input)?;
	let _: &str = space1.parse_next(input)?;
	let value = parse_value(input)?;
	Ok(Condition::Compare {
		name,
		operator,
		value,
	})
}

fn parse_name(input: &mut &str) -> std::result::Result<String, ContextError> {
	let _ = '#'.parse_next(input)?;
	let ident: &str =
		take_while(1.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)?;
	Ok(format!("#{}", ident))
}

fn parse_value(input: &mut &str) -> std::result::Result<String, ContextError> {
	let _ = ':'.parse_next(input)?;
	let ident: &str =
		take_while(1.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)?;
	Ok(format!(":{}", ident))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn expression(
		text: &str,
		names: &[(&str, &str)],
		values: &[(&str, AttributeValue)],
	) -> Expression {
		Expression {
			text: text.to_string(),
			names: names
				.iter()
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect(),
			values: values
				.iter()
				.map(|(k, v)| (k.to_string(), v.clone()))
				.collect(),
		}
	}

	fn item(entries: &[(&str, AttributeValue)]) -> Item {
		entries
			.iter()
			.map(|(k, v)| (k.to_string(), v.clone()))
			.collect()
	}

	#[test]
	fn evaluates_comparisons_and_functions() {
		let subject = item(&[
			("pk", AttributeValue::S("ai#1".to_string())),
			("version", AttributeValue::N("3".to_string())),
		]);

		let guard = expression(
			"#version = :version_1 AND #pk = :pk_1",
			&[("#version", "version"), ("#pk", "pk")],
			&[
				(":version_1", AttributeValue::N("3".to_string())),
				(":pk_1", AttributeValue::S("ai#1".to_string())),
			],
		);
		assert!(evaluate_expression(&guard, Some(&subject)).unwrap());

		let stale = expression(
			"#version = :version_1",
			&[("#version", "version")],
			&[(":version_1", AttributeValue::N("4".to_string()))],
		);
		assert!(!evaluate_expression(&stale, Some(&subject)).unwrap());

		let begins = expression(
			"begins_with(#pk, :pk_1)",
			&[("#pk", "pk")],
			&[(":pk_1", AttributeValue::S("ai#".to_string()))],
		);
		assert!(evaluate_expression(&begins, Some(&subject)).unwrap());

		let not_exists = expression("attribute_not_exists(#pk)", &[("#pk", "pk")], &[]);
		assert!(!evaluate_expression(&not_exists, Some(&subject)).unwrap());
		assert!(evaluate_expression(&not_exists, None).unwrap());
	}

	#[test]
	fn evaluates_between_and_or_precedence() {
		let subject = item(&[("expires", AttributeValue::N("7".to_string()))]);
		let between = expression(
			"#expires BETWEEN :lo AND :hi",
			&[("#expires", "expires")],
			&[
				(":lo", AttributeValue::N("5".to_string())),
				(":hi", AttributeValue::N("9".to_string())),
			],
		);
		assert!(evaluate_expression(&between, Some(&subject)).unwrap());

		// OR binds weaker than AND.
		let mixed = expression(
			"(#expires = :a) OR (#expires > :lo AND #expires < :hi)",
			&[("#expires", "expires")],
			&[
				(":a", AttributeValue::N("100".to_string())),
				(":lo", AttributeValue::N("5".to_string())),
				(":hi", AttributeValue::N("9".to_string())),
			],
		);
		assert!(evaluate_expression(&mixed, Some(&subject)).unwrap());
	}

	#[tokio::test]
	async fn conditional_puts_and_transactions_are_atomic() {
		let client = InMemoryDynamoClient::new();
		client.create_table("t", "pk", Vec::new());

		let first = item(&[("pk", AttributeValue::S("a".to_string()))]);
		let guard = expression("attribute_not_exists(#pk)", &[("#pk", "pk")], &[]);
		client
			.put_item("t", first.clone(), Some(guard.clone()))
			.await
			.unwrap();
		// Same key again: the condition now fails.
		assert!(matches!(
			client.put_item("t", first.clone(), Some(guard.clone())).await,
			Err(DbError::ConditionFailed)
		));

		// A transaction where the second op's condition fails writes nothing.
		let fresh = item(&[("pk", AttributeValue::S("b".to_string()))]);
		let result = client
			.transact_write(vec![
				TransactWriteOp::Put {
					table: "t".to_string(),
					item: fresh,
					condition: Some(guard.clone()),
				},
				TransactWriteOp::Put {
					table: "t".to_string(),
					item: first,
					condition: Some(guard),
				},
			])
			.await;
		assert!(matches!(result, Err(DbError::ConditionFailed)));
		assert_eq!(client.items("t").len(), 1);
	}

	#[tokio::test]
	async fn queries_paginate_with_continuation_keys() {
		let client = InMemoryDynamoClient::with_page_size(2);
		client.create_table("t", "pk", Vec::new());
		for n in 1..=5 {
			client
				.put_item(
					"t",
					item(&[
						("pk", AttributeValue::S(format!("k{}", n))),
						("owner", AttributeValue::S("u1".to_string())),
					]),
					None,
				)
				.await
				.unwrap();
		}

		let expression = QueryExpression {
			key_condition: "#owner = :owner_1".to_string(),
			filter: None,
			names: HashMap::from([("#owner".to_string(), "owner".to_string())]),
			values: HashMap::from([(
				":owner_1".to_string(),
				AttributeValue::S("u1".to_string()),
			)]),
		};
		let mut collected = Vec::new();
		let mut start_key = None;
		let mut pages = 0;
		loop {
			let page = client
				.query("t", None, &expression, None, start_key.take())
				.await
				.unwrap();
			pages += 1;
			collected.extend(page.items);
			match page.last_evaluated_key {
				Some(key) => start_key = Some(key),
				None => break,
			}
		}
		assert_eq!(collected.len(), 5);
		assert_eq!(pages, 3);
	}
}
