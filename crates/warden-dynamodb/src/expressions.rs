// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store-native expression rendering.
//!
//! [`ExpressionBuilder`] owns one placeholder namespace: attribute names go
//! through `#name` (reserved words never reach the expression text) and each
//! value occurrence gets a fresh `:name_n`. [`DynamoExpressionEmitter`]
//! lowers planner output into request-ready expressions.

use crate::attributes::{AttrValue, AttributeDescriptor};
use crate::client::{Expression, QueryExpression};
use crate::planner::{KeyCondition, Product, SortCondition, Term, TermOp};
use crate::table::Index;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ExpressionBuilder {
	counters: HashMap<&'static str, usize>,
	names: HashMap<String, String>,
	values: HashMap<String, AttributeValue>,
}

impl ExpressionBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the attribute's `#name` placeholder and returns it.
	pub fn name(&mut self, attr: &'static AttributeDescriptor) -> String {
		let placeholder = attr.hash_name();
		self.names.insert(placeholder.clone(), attr.name.to_string());
		placeholder
	}

	/// Registers a value under a fresh `:name_n` placeholder and returns it.
	/// Distinct occurrences of the same attribute get distinct placeholders.
	pub fn value(&mut self, attr: &'static AttributeDescriptor, value: &AttrValue) -> String {
		let counter = self.counters.entry(attr.name).or_insert(0);
		*counter += 1;
		let placeholder = format!("{}_{}", attr.colon_name(), counter);
		self.values.insert(placeholder.clone(), attr.encode(value));
		placeholder
	}

	pub fn render_term(&mut self, term: &Term) -> String {
		let name = self.name(term.attr);
		match term.op {
			TermOp::Exists => format!("attribute_exists({})", name),
			TermOp::NotExists => format!("attribute_not_exists({})", name),
			op => {
				let value = term.value.as_ref().expect("comparison terms carry a value");
				let value = self.value(term.attr, value);
				match op {
					TermOp::Eq => format!("{} = {}", name, value),
					TermOp::Ne => format!("{} <> {}", name, value),
					TermOp::Lt => format!("{} < {}", name, value),
					TermOp::Le => format!("{} <= {}", name, value),
					TermOp::Gt => format!("{} > {}", name, value),
					TermOp::Ge => format!("{} >= {}", name, value),
					TermOp::StartsWith => format!("begins_with({}, {})", name, value),
					TermOp::Exists | TermOp::NotExists => unreachable!(),
				}
			}
		}
	}

	fn render_product(&mut self, product: &Product) -> String {
		product
			.terms
			.iter()
			.map(|term| self.render_term(term))
			.collect::<Vec<_>>()
			.join(" AND ")
	}

	/// Renders a disjunction of products, or `None` when it is vacuously
	/// true (no store-side filtering possible or needed).
	pub fn render_products(&mut self, products: &[Product]) -> Option<String> {
		if products.is_empty() || products.iter().any(|product| product.terms.is_empty()) {
			return None;
		}
		if products.len() == 1 {
			return Some(self.render_product(&products[0]));
		}
		Some(
			products
				.iter()
				.map(|product| format!("({})", self.render_product(product)))
				.collect::<Vec<_>>()
				.join(" OR "),
		)
	}

	pub fn build(self, text: String) -> Expression {
		Expression {
			text,
			names: self.names,
			values: self.values,
		}
	}

	fn finish(self) -> (HashMap<String, String>, HashMap<String, AttributeValue>) {
		(self.names, self.values)
	}
}

/// Condition: the item must not exist yet.
pub fn attribute_not_exists(attr: &'static AttributeDescriptor) -> Expression {
	let mut builder = ExpressionBuilder::new();
	let name = builder.name(attr);
	let text = format!("attribute_not_exists({})", name);
	builder.build(text)
}

/// Condition: every listed attribute equals the given value. Used as the
/// optimistic-concurrency guard binding a write to its observed state.
pub fn equals_guard(pairs: &[(&'static AttributeDescriptor, AttrValue)]) -> Expression {
	let mut builder = ExpressionBuilder::new();
	let text = pairs
		.iter()
		.map(|(attr, value)| {
			let name = builder.name(attr);
			let value = builder.value(attr, value);
			format!("{} = {}", name, value)
		})
		.collect::<Vec<_>>()
		.join(" AND ");
	builder.build(text)
}

/// Update expression setting each attribute to the given value.
pub fn set_update(pairs: &[(&'static AttributeDescriptor, AttrValue)]) -> Expression {
	let mut builder = ExpressionBuilder::new();
	let assignments = pairs
		.iter()
		.map(|(attr, value)| {
			let name = builder.name(attr);
			let value = builder.value(attr, value);
			format!("{} = {}", name, value)
		})
		.collect::<Vec<_>>()
		.join(", ");
	builder.build(format!("SET {}", assignments))
}

pub struct DynamoExpressionEmitter;

impl DynamoExpressionEmitter {
	/// Lowers one planned query: the key condition and the OR of residual
	/// products share a single placeholder namespace, the way the store
	/// expects one name map and one value map per request.
	pub fn emit_query(key: &KeyCondition, residuals: &[Product]) -> QueryExpression {
		let mut builder = ExpressionBuilder::new();
		let key_condition = match key.index {
			Index::PrimaryKey {
				key: key_attr,
				source,
			} => {
				let partition_value = key
					.partition
					.value
					.as_ref()
					.and_then(AttrValue::as_str)
					.expect("primary key partitions are string equalities");
				let key_value = AttrValue::Str(source.uniqueness_value(partition_value));
				let name = builder.name(key_attr);
				let value = builder.value(key_attr, &key_value);
				format!("{} = {}", name, value)
			}
			_ => {
				let mut text = builder.render_term(&key.partition);
				if let Some(sort) = &key.sort {
					text.push_str(" AND ");
					text.push_str(&Self::render_sort(&mut builder, sort));
				}
				text
			}
		};
		let filter = builder.render_products(residuals);
		let (names, values) = builder.finish();
		QueryExpression {
			key_condition,
			filter,
			names,
			values,
		}
	}

	fn render_sort(builder: &mut ExpressionBuilder, sort: &SortCondition) -> String {
		match sort {
			SortCondition::Term(term) => builder.render_term(term),
			SortCondition::Between { attr, lower, upper } => {
				let name = builder.name(attr);
				let lower = builder.value(attr, lower);
				let upper = builder.value(attr, upper);
				format!("{} BETWEEN {} AND {}", name, lower, upper)
			}
		}
	}

	/// Lowers a scan filter. `key_prefix` restricts the scan to one
	/// uniqueness namespace (e.g. only account main items) by AND-ing a
	/// `begins_with` on the partition key.
	pub fn emit_scan(
		products: &[Product],
		key_prefix: Option<(&'static AttributeDescriptor, &str)>,
	) -> Option<Expression> {
		let mut builder = ExpressionBuilder::new();
		let prefix = key_prefix.map(|(attr, prefix)| {
			let name = builder.name(attr);
			let value = builder.value(attr, &AttrValue::Str(prefix.to_string()));
			format!("begins_with({}, {})", name, value)
		});
		let products = builder.render_products(products);
		let text = match (prefix, products) {
			(Some(prefix), Some(products)) => format!("{} AND ({})", prefix, products),
			(Some(prefix), None) => prefix,
			(None, Some(products)) => products,
			(None, None) => return None,
		};
		Some(builder.build(text))
	}
}
