// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lazy, single-pass sequences over paginated reads.
//!
//! The store truncates queries and scans into pages with a continuation
//! key; these helpers re-issue transparently at each page boundary. The
//! streams are not restartable; collect into a `Vec` for a second pass.

use crate::client::{DynamoClient, Expression, Item, QueryExpression};
use crate::error::DbError;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;

struct QueryState {
	client: Arc<dyn DynamoClient>,
	table: String,
	index: Option<String>,
	expression: QueryExpression,
	limit: Option<i32>,
	buffer: VecDeque<Item>,
	continuation: Option<Item>,
	exhausted: bool,
}

/// All items matched by a query, across every page.
pub fn query_sequence(
	client: Arc<dyn DynamoClient>,
	table: String,
	index: Option<String>,
	expression: QueryExpression,
	limit: Option<i32>,
) -> impl Stream<Item = Result<Item, DbError>> + Send {
	let state = QueryState {
		client,
		table,
		index,
		expression,
		limit,
		buffer: VecDeque::new(),
		continuation: None,
		exhausted: false,
	};
	stream::try_unfold(state, |mut state| async move {
		loop {
			if let Some(item) = state.buffer.pop_front() {
				return Ok(Some((item, state)));
			}
			if state.exhausted {
				return Ok(None);
			}
			let page = state
				.client
				.query(
					&state.table,
					state.index.as_deref(),
					&state.expression,
					state.limit,
					state.continuation.take(),
				)
				.await?;
			state.continuation = page.last_evaluated_key;
			if state.continuation.is_none() {
				state.exhausted = true;
			}
			state.buffer.extend(page.items);
		}
	})
}

struct ScanState {
	client: Arc<dyn DynamoClient>,
	table: String,
	index: Option<String>,
	filter: Option<Expression>,
	buffer: VecDeque<Item>,
	continuation: Option<Item>,
	exhausted: bool,
}

/// All items of a scan, across every page.
pub fn scan_sequence(
	client: Arc<dyn DynamoClient>,
	table: String,
	index: Option<String>,
	filter: Option<Expression>,
) -> impl Stream<Item = Result<Item, DbError>> + Send {
	let state = ScanState {
		client,
		table,
		index,
		filter,
		buffer: VecDeque::new(),
		continuation: None,
		exhausted: false,
	};
	stream::try_unfold(state, |mut state| async move {
		loop {
			if let Some(item) = state.buffer.pop_front() {
				return Ok(Some((item, state)));
			}
			if state.exhausted {
				return Ok(None);
			}
			let page = state
				.client
				.scan(
					&state.table,
					state.index.as_deref(),
					state.filter.as_ref(),
					state.continuation.take(),
				)
				.await?;
			state.continuation = page.last_evaluated_key;
			if state.continuation.is_none() {
				state.exhausted = true;
			}
			state.buffer.extend(page.items);
		}
	})
}
