// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Transaction-write-set assembly for account mutations.
//!
//! Every fan-out item of an account shares one payload and one version; an
//! update touches the main item plus whichever uniqueness items the diff of
//! {userName, email, phone} demands. Replaces and deletes are guarded by the
//! observed version, brand-new uniqueness items by non-existence.

use crate::accounts::{ACCOUNT_ID, PK, VERSION};
use crate::attributes::{AttrValue, AttributeDescriptor};
use crate::client::{Expression, Item, TransactWriteOp};
use crate::error::{DbError, Result};
use crate::expressions::{attribute_not_exists, equals_guard};
use aws_sdk_dynamodb::types::AttributeValue;

pub struct UpdateBuilder {
	table: String,
	common_item: Item,
	observed_version: i64,
	account_id: String,
	operations: Vec<TransactWriteOp>,
}

impl UpdateBuilder {
	/// `common_item` is the full next payload (already carrying the bumped
	/// version) without its `pk`; every put clones it under a different key.
	pub fn new(
		table: impl Into<String>,
		common_item: Item,
		observed_version: i64,
		account_id: impl Into<String>,
	) -> Self {
		Self {
			table: table.into(),
			common_item,
			observed_version,
			account_id: account_id.into(),
			operations: Vec::new(),
		}
	}

	/// The optimistic guard binding each write to the observed state.
	fn guard(&self) -> Expression {
		equals_guard(&[
			(&VERSION, AttrValue::Number(self.observed_version)),
			(&ACCOUNT_ID, AttrValue::Str(self.account_id.clone())),
		])
	}

	fn item_for(&self, pk: String) -> Item {
		let mut item = self.common_item.clone();
		item.insert(PK.name.to_string(), AttributeValue::S(pk));
		item
	}

	fn key_for(pk: String) -> Item {
		Item::from([(PK.name.to_string(), AttributeValue::S(pk))])
	}

	fn put_new(&mut self, pk: String) {
		self.operations.push(TransactWriteOp::Put {
			table: self.table.clone(),
			item: self.item_for(pk),
			condition: Some(attribute_not_exists(&PK)),
		});
	}

	fn put_replace(&mut self, pk: String) {
		self.operations.push(TransactWriteOp::Put {
			table: self.table.clone(),
			item: self.item_for(pk),
			condition: Some(self.guard()),
		});
	}

	fn delete(&mut self, pk: String) {
		self.operations.push(TransactWriteOp::Delete {
			table: self.table.clone(),
			key: Self::key_for(pk),
			condition: Some(self.guard()),
		});
	}

	/// Appends the writes for one unique attribute's transition.
	pub fn handle_unique_attribute(
		&mut self,
		attr: &'static AttributeDescriptor,
		old: Option<&str>,
		new: Option<&str>,
	) {
		match (old, new) {
			(None, None) => {}
			(None, Some(new)) => self.put_new(attr.uniqueness_value(new)),
			(Some(old), None) => self.delete(attr.uniqueness_value(old)),
			(Some(old), Some(new)) if old == new => {
				self.put_replace(attr.uniqueness_value(old))
			}
			(Some(old), Some(new)) => {
				self.delete(attr.uniqueness_value(old));
				self.put_new(attr.uniqueness_value(new));
			}
		}
	}

	/// Replaces the main item under the version guard. Exactly one main-item
	/// replace belongs in every account transaction.
	pub fn replace_main_item(&mut self) {
		let pk = ACCOUNT_ID.uniqueness_value(&self.account_id);
		self.put_replace(pk);
	}

	pub fn build(self) -> Result<Vec<TransactWriteOp>> {
		if self.operations.is_empty() {
			return Err(DbError::Store(
				"account update produced an empty transaction".to_string(),
			));
		}
		Ok(self.operations)
	}
}
