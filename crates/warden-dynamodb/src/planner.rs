// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Filter-to-query planning.
//!
//! A parsed SCIM filter is normalized to disjunctive normal form, each
//! product picks the cheapest index that can answer it, and products that
//! land on the same key condition are merged into one store query with their
//! residuals OR-ed. A product that no index can answer degrades the whole
//! plan to a table scan, since the union must still be answered somewhere.
//!
//! The planner never guesses: unknown attribute paths, `co`/`ew` operators
//! and negated `sw` are rejected as unsupported instead of being widened
//! into scans the caller did not ask for.

use crate::attributes::{AttrValue, AttributeDescriptor, AttributeKind};
use crate::client::Item;
use crate::error::{DbError, Result};
use crate::table::{Index, TableDescriptor};
use std::cmp::Ordering;
use warden_scim::{CompareOp, Filter, FilterValue, LogicalOp};

/// Upper bound on distinct key conditions a single filter may expand into.
pub const MAX_QUERIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	StartsWith,
	Exists,
	NotExists,
}

/// One atomic comparison. `value` is `None` only for presence tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
	pub attr: &'static AttributeDescriptor,
	pub op: TermOp,
	pub value: Option<AttrValue>,
}

impl Term {
	fn new(attr: &'static AttributeDescriptor, op: TermOp, value: AttrValue) -> Self {
		Self {
			attr,
			op,
			value: Some(value),
		}
	}

	/// Evaluates this term against a stored item, with the exact semantics
	/// the store applies: absent or mistyped attributes fail every
	/// comparison except `NotExists`.
	pub fn matches_item(&self, item: &Item) -> bool {
		let stored = item
			.get(self.attr.name)
			.and_then(|value| self.attr.decode(value));
		match self.op {
			TermOp::Exists => stored.is_some(),
			TermOp::NotExists => stored.is_none(),
			op => {
				let (Some(stored), Some(value)) = (stored, self.value.as_ref()) else {
					return false;
				};
				match op {
					TermOp::Eq => stored.compare(value) == Some(Ordering::Equal),
					TermOp::Ne => stored
						.compare(value)
						.is_some_and(|ord| ord != Ordering::Equal),
					TermOp::Lt => stored.compare(value).is_some_and(Ordering::is_lt),
					TermOp::Le => stored.compare(value).is_some_and(Ordering::is_le),
					TermOp::Gt => stored.compare(value).is_some_and(Ordering::is_gt),
					TermOp::Ge => stored.compare(value).is_some_and(Ordering::is_ge),
					TermOp::StartsWith => match (&stored, value) {
						(AttrValue::Str(stored), AttrValue::Str(prefix)) => {
							stored.starts_with(prefix.as_str())
						}
						_ => false,
					},
					TermOp::Exists | TermOp::NotExists => unreachable!(),
				}
			}
		}
	}
}

/// A conjunction of terms. An empty product is always true.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
	pub terms: Vec<Term>,
}

impl Product {
	pub fn matches_item(&self, item: &Item) -> bool {
		self.terms.iter().all(|term| term.matches_item(item))
	}

	/// Disjunction over products: the residual-filter semantics.
	pub fn any_matches(products: &[Product], item: &Item) -> bool {
		products.iter().any(|product| product.matches_item(item))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
	Term(Term),
	Between {
		attr: &'static AttributeDescriptor,
		lower: AttrValue,
		upper: AttrValue,
	},
}

impl SortCondition {
	fn matches_item(&self, item: &Item) -> bool {
		match self {
			SortCondition::Term(term) => term.matches_item(item),
			SortCondition::Between { attr, lower, upper } => {
				let Some(stored) = item.get(attr.name).and_then(|value| attr.decode(value))
				else {
					return false;
				};
				stored.compare(lower).is_some_and(Ordering::is_ge)
					&& stored.compare(upper).is_some_and(Ordering::is_le)
			}
		}
	}
}

/// The store-answerable part of one product: an index, a partition equality
/// and an optional sort-key range.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
	pub index: &'static Index,
	pub partition: Term,
	pub sort: Option<SortCondition>,
}

impl KeyCondition {
	pub fn matches_item(&self, item: &Item) -> bool {
		self.partition.matches_item(item)
			&& self
				.sort
				.as_ref()
				.map(|sort| sort.matches_item(item))
				.unwrap_or(true)
	}
}

/// One store query: a key condition and the residual products whose union
/// it serves. Kept in insertion order so pagination stays deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
	pub key: KeyCondition,
	pub residuals: Vec<Product>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
	Queries(Vec<PlannedQuery>),
	Scan { products: Vec<Product> },
}

impl QueryPlan {
	/// Whether an item is accepted by this plan, key condition and residual
	/// combined. Tests use this to check the plan against the reference
	/// filter semantics.
	pub fn matches_item(&self, item: &Item) -> bool {
		match self {
			QueryPlan::Queries(queries) => queries.iter().any(|query| {
				query.key.matches_item(item) && Product::any_matches(&query.residuals, item)
			}),
			QueryPlan::Scan { products } => Product::any_matches(products, item),
		}
	}
}

pub struct QueryPlanner {
	table: &'static TableDescriptor,
}

impl QueryPlanner {
	pub fn new(table: &'static TableDescriptor) -> Self {
		Self { table }
	}

	pub fn plan(&self, filter: &Filter) -> Result<QueryPlan> {
		let node = self.resolve(filter, false)?;
		let products = simplify(expand_not_equal(dnf(node)));

		let mut selected = Vec::with_capacity(products.len());
		for product in &products {
			match select_index(self.table, product) {
				Some(entry) => selected.push(entry),
				None => {
					tracing::debug!(
						table = self.table.base_name,
						products = products.len(),
						"filter has an unindexable product, planning a scan"
					);
					return Ok(QueryPlan::Scan { products });
				}
			}
		}

		let mut queries: Vec<PlannedQuery> = Vec::new();
		for (key, residual) in selected {
			match queries.iter_mut().find(|query| query.key == key) {
				Some(existing) => existing.residuals.push(residual),
				None => queries.push(PlannedQuery {
					key,
					residuals: vec![residual],
				}),
			}
		}

		if queries.len() > MAX_QUERIES {
			return Err(DbError::TooManyOperations(queries.len()));
		}
		Ok(QueryPlan::Queries(queries))
	}

	/// Resolves attribute paths and pushes negation down to the leaves in
	/// one pass (negation-normal form).
	fn resolve(&self, filter: &Filter, negated: bool) -> Result<Node> {
		match filter {
			Filter::Group(inner) => self.resolve(inner, negated),
			Filter::Not(inner) => self.resolve(inner, !negated),
			Filter::Logical { op, left, right } => {
				let left = self.resolve(left, negated)?;
				let right = self.resolve(right, negated)?;
				// De Morgan: negation swaps the connective.
				let conjunction = matches!(op, LogicalOp::And) != negated;
				Ok(if conjunction {
					Node::And(vec![left, right])
				} else {
					Node::Or(vec![left, right])
				})
			}
			Filter::Compare {
				attr_path,
				op,
				value,
			} => {
				let attr = self.table.attribute(attr_path).ok_or_else(|| {
					DbError::UnsupportedQuery(format!("Unknown attribute {}", attr_path))
				})?;
				resolve_term(attr, *op, value.as_ref(), negated).map(Node::Leaf)
			}
		}
	}
}

enum Node {
	And(Vec<Node>),
	Or(Vec<Node>),
	Leaf(Term),
}

fn resolve_term(
	attr: &'static AttributeDescriptor,
	op: CompareOp,
	value: Option<&FilterValue>,
	negated: bool,
) -> Result<Term> {
	let op = match (op, negated) {
		(CompareOp::Pr, false) => {
			return Ok(Term {
				attr,
				op: TermOp::Exists,
				value: None,
			})
		}
		(CompareOp::Pr, true) => {
			return Ok(Term {
				attr,
				op: TermOp::NotExists,
				value: None,
			})
		}
		(CompareOp::Co, _) | (CompareOp::Ew, _) => {
			return Err(DbError::UnsupportedQuery(format!(
				"Operator {} is not supported against this store",
				op.keyword()
			)))
		}
		(CompareOp::Sw, false) => TermOp::StartsWith,
		(CompareOp::Sw, true) => {
			return Err(DbError::UnsupportedQuery(
				"Negated sw cannot be expressed as a range".to_string(),
			))
		}
		(CompareOp::Eq, false) | (CompareOp::Ne, true) => TermOp::Eq,
		(CompareOp::Eq, true) | (CompareOp::Ne, false) => TermOp::Ne,
		(CompareOp::Gt, false) | (CompareOp::Le, true) => TermOp::Gt,
		(CompareOp::Le, false) | (CompareOp::Gt, true) => TermOp::Le,
		(CompareOp::Lt, false) | (CompareOp::Ge, true) => TermOp::Lt,
		(CompareOp::Ge, false) | (CompareOp::Lt, true) => TermOp::Ge,
	};

	let raw = value.ok_or_else(|| {
		DbError::UnsupportedQuery(format!("Operator {} requires a value", op_keyword(op)))
	})?;
	let value = attr.coerce(raw)?;

	if op == TermOp::StartsWith && attr.kind != AttributeKind::Str {
		return Err(DbError::UnsupportedQuery(format!(
			"sw requires a string attribute, {} is not",
			attr.name
		)));
	}
	// A boolean has exactly two values, so `ne v` is `eq !v` rather than a
	// range split.
	if op == TermOp::Ne {
		if let AttrValue::Bool(b) = value {
			return Ok(Term::new(attr, TermOp::Eq, AttrValue::Bool(!b)));
		}
	}
	Ok(Term::new(attr, op, value))
}

fn op_keyword(op: TermOp) -> &'static str {
	match op {
		TermOp::Eq => "eq",
		TermOp::Ne => "ne",
		TermOp::Lt => "lt",
		TermOp::Le => "le",
		TermOp::Gt => "gt",
		TermOp::Ge => "ge",
		TermOp::StartsWith => "sw",
		TermOp::Exists => "pr",
		TermOp::NotExists => "not pr",
	}
}

fn dnf(node: Node) -> Vec<Product> {
	match node {
		Node::Leaf(term) => vec![Product { terms: vec![term] }],
		Node::Or(children) => children.into_iter().flat_map(dnf).collect(),
		Node::And(children) => {
			let mut products = vec![Product::default()];
			for child in children {
				let child_products = dnf(child);
				let mut crossed = Vec::with_capacity(products.len() * child_products.len());
				for base in &products {
					for extension in &child_products {
						let mut terms = base.terms.clone();
						terms.extend(extension.terms.iter().cloned());
						crossed.push(Product { terms });
					}
				}
				products = crossed;
			}
			products
		}
	}
}

/// Replaces every `ne` term by splitting its product into a `lt` copy and a
/// `gt` copy. A product with k `ne` terms becomes 2^k products.
fn expand_not_equal(products: Vec<Product>) -> Vec<Product> {
	products
		.into_iter()
		.flat_map(|product| {
			let mut expanded = vec![Product::default()];
			for term in product.terms {
				if term.op == TermOp::Ne {
					let value = term.value.clone().expect("ne always carries a value");
					let mut split = Vec::with_capacity(expanded.len() * 2);
					for partial in expanded {
						let mut below = partial.clone();
						below
							.terms
							.push(Term::new(term.attr, TermOp::Lt, value.clone()));
						split.push(below);
						let mut above = partial;
						above
							.terms
							.push(Term::new(term.attr, TermOp::Gt, value.clone()));
						split.push(above);
					}
					expanded = split;
				} else {
					for partial in &mut expanded {
						partial.terms.push(term.clone());
					}
				}
			}
			expanded
		})
		.collect()
}

/// Drops duplicate terms, contradictory products, and duplicate products.
/// Subsumption stays conservative: only exact term-set equality merges.
fn simplify(products: Vec<Product>) -> Vec<Product> {
	let mut kept: Vec<Product> = Vec::new();
	'products: for product in products {
		let mut terms: Vec<Term> = Vec::new();
		for term in product.terms {
			if !terms.contains(&term) {
				terms.push(term);
			}
		}
		for (position, left) in terms.iter().enumerate() {
			for right in &terms[position + 1..] {
				if left.attr == right.attr && contradicts(left, right) {
					continue 'products;
				}
			}
		}
		let product = Product { terms };
		if !kept.iter().any(|existing| same_terms(existing, &product)) {
			kept.push(product);
		}
	}
	kept
}

fn contradicts(left: &Term, right: &Term) -> bool {
	match (left.op, right.op) {
		(TermOp::Eq, TermOp::Eq) => left.value != right.value,
		(TermOp::Eq, TermOp::NotExists) | (TermOp::NotExists, TermOp::Eq) => true,
		(TermOp::Exists, TermOp::NotExists) | (TermOp::NotExists, TermOp::Exists) => true,
		_ => false,
	}
}

fn same_terms(left: &Product, right: &Product) -> bool {
	left.terms.len() == right.terms.len()
		&& left.terms.iter().all(|term| right.terms.contains(term))
}

/// Picks the first declared index with a sort-condition match, else the
/// first with a partition match. Returns the key condition and the residual
/// product.
fn select_index(
	table: &'static TableDescriptor,
	product: &Product,
) -> Option<(KeyCondition, Product)> {
	let mut fallback: Option<(KeyCondition, Product)> = None;
	for index in table.indexes {
		let partition_attr = index.partition_attribute();
		let Some(partition_position) = product
			.terms
			.iter()
			.position(|term| term.op == TermOp::Eq && term.attr == partition_attr)
		else {
			continue;
		};
		let partition = product.terms[partition_position].clone();
		let mut rest: Vec<Term> = product
			.terms
			.iter()
			.enumerate()
			.filter(|(position, _)| *position != partition_position)
			.map(|(_, term)| term.clone())
			.collect();

		if let Some(sort_attr) = index.sort_attribute() {
			if let Some(sort) = extract_sort_condition(&mut rest, sort_attr) {
				return Some((
					KeyCondition {
						index,
						partition,
						sort: Some(sort),
					},
					Product { terms: rest },
				));
			}
		}
		if fallback.is_none() {
			fallback = Some((
				KeyCondition {
					index,
					partition,
					sort: None,
				},
				Product { terms: rest },
			));
		}
	}
	fallback
}

fn extract_sort_condition(
	rest: &mut Vec<Term>,
	sort_attr: &'static AttributeDescriptor,
) -> Option<SortCondition> {
	let lower = rest
		.iter()
		.position(|term| term.attr == sort_attr && term.op == TermOp::Ge);
	let upper = rest
		.iter()
		.position(|term| term.attr == sort_attr && term.op == TermOp::Le);
	if let (Some(lower_position), Some(upper_position)) = (lower, upper) {
		let lower_value = rest[lower_position].value.clone()?;
		let upper_value = rest[upper_position].value.clone()?;
		let mut positions = [lower_position, upper_position];
		positions.sort_unstable();
		rest.remove(positions[1]);
		rest.remove(positions[0]);
		return Some(SortCondition::Between {
			attr: sort_attr,
			lower: lower_value,
			upper: upper_value,
		});
	}

	let position = rest.iter().position(|term| {
		term.attr == sort_attr
			&& matches!(
				term.op,
				TermOp::Eq
					| TermOp::Lt | TermOp::Le
					| TermOp::Gt | TermOp::Ge
					| TermOp::StartsWith
			)
	})?;
	Some(SortCondition::Term(rest.remove(position)))
}

/// Executes a plan against the store: one paginated query per key condition
/// (or one scan), each result re-checked in process against the residual
/// products, de-duplicated by `dedupe_attr` in first-seen order.
///
/// `scan_prefix` confines scans to one uniqueness namespace so that fan-out
/// secondary items never show up as duplicates. A scan with no products
/// accepts everything the prefix admits.
pub(crate) async fn run_plan(
	client: &std::sync::Arc<dyn crate::client::DynamoClient>,
	table_name: &str,
	plan: &QueryPlan,
	scan_prefix: Option<(&'static AttributeDescriptor, &'static str)>,
	dedupe_attr: &'static AttributeDescriptor,
	allow_table_scans: bool,
) -> Result<Vec<Item>> {
	use crate::expressions::DynamoExpressionEmitter;
	use crate::pagination;
	use futures::TryStreamExt;
	use std::collections::HashSet;

	let mut seen: HashSet<String> = HashSet::new();
	let mut results = Vec::new();
	let mut keep = |item: Item| -> Result<()> {
		let key = item
			.get(dedupe_attr.name)
			.and_then(|value| dedupe_attr.decode(value))
			.and_then(|value| value.as_str().map(str::to_string))
			.ok_or_else(|| {
				DbError::Schema(format!("Item is missing {}", dedupe_attr.name))
			})?;
		if seen.insert(key) {
			results.push(item);
		}
		Ok(())
	};

	match plan {
		QueryPlan::Queries(queries) => {
			for query in queries {
				let expression = DynamoExpressionEmitter::emit_query(&query.key, &query.residuals);
				let stream = pagination::query_sequence(
					client.clone(),
					table_name.to_string(),
					query.key.index.name().map(str::to_string),
					expression,
					None,
				);
				futures::pin_mut!(stream);
				while let Some(item) = stream.try_next().await? {
					// The store-side filter is the OR over every residual;
					// re-check so items leaking through a sibling product's
					// filter are dropped.
					if !Product::any_matches(&query.residuals, &item) {
						continue;
					}
					keep(item)?;
				}
			}
		}
		QueryPlan::Scan { products } => {
			if !allow_table_scans {
				return Err(DbError::ScanNotAllowed);
			}
			let filter = DynamoExpressionEmitter::emit_scan(products, scan_prefix);
			let stream = pagination::scan_sequence(
				client.clone(),
				table_name.to_string(),
				None,
				filter,
			);
			futures::pin_mut!(stream);
			while let Some(item) = stream.try_next().await? {
				if !products.is_empty() && !Product::any_matches(products, &item) {
					continue;
				}
				keep(item)?;
			}
		}
	}
	Ok(results)
}
