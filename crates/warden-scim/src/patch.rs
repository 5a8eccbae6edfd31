// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::ScimError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
	Add,
	Remove,
	Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
	pub op: PatchOp,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
	pub schemas: Vec<String>,
	#[serde(rename = "Operations")]
	pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
	pub fn validate(&self) -> Result<(), ScimError> {
		if !self
			.schemas
			.contains(&"urn:ietf:params:scim:api:messages:2.0:PatchOp".to_string())
		{
			return Err(ScimError::InvalidSyntax(
				"Missing PatchOp schema".to_string(),
			));
		}
		for op in &self.operations {
			if op.op == PatchOp::Remove && op.path.is_none() {
				return Err(ScimError::InvalidPath("Remove requires path".to_string()));
			}
			if op.op != PatchOp::Remove && op.value.is_none() {
				return Err(ScimError::InvalidValue(format!(
					"{:?} requires a value",
					op.op
				)));
			}
		}
		Ok(())
	}

	/// Applies every operation, in order, onto a flat attribute document.
	///
	/// Paths are dotted attribute paths without value selectors; a path like
	/// `name.givenName` navigates (creating objects for add/replace). An
	/// add or replace without a path merges the value object into the root.
	pub fn apply_to(&self, document: &mut Map<String, Value>) -> Result<(), ScimError> {
		self.validate()?;
		for operation in &self.operations {
			apply_operation(operation, document)?;
		}
		Ok(())
	}
}

fn apply_operation(
	operation: &PatchOperation,
	document: &mut Map<String, Value>,
) -> Result<(), ScimError> {
	let path = match operation.path.as_deref() {
		None | Some("") => {
			// No path: the value must be an object merged at the root.
			let value = required_value(operation)?;
			let Value::Object(entries) = value else {
				return Err(ScimError::InvalidValue(
					"Pathless operation requires an object value".to_string(),
				));
			};
			for (key, entry) in entries {
				document.insert(key.clone(), entry.clone());
			}
			return Ok(());
		}
		Some(path) => path,
	};
	if path.contains('[') {
		return Err(ScimError::InvalidPath(format!(
			"Value selectors are not supported: {}",
			path
		)));
	}

	let mut segments = path.split('.').collect::<Vec<_>>();
	let leaf = segments.pop().expect("split yields at least one segment");

	let mut target = document;
	for segment in segments {
		let entry = target
			.entry(segment.to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		match entry {
			Value::Object(inner) => target = inner,
			_ => {
				return Err(ScimError::InvalidPath(format!(
					"{} is not a complex attribute",
					segment
				)))
			}
		}
	}

	match operation.op {
		PatchOp::Add | PatchOp::Replace => {
			let value = required_value(operation)?;
			target.insert(leaf.to_string(), value.clone());
		}
		PatchOp::Remove => {
			target.remove(leaf);
		}
	}
	Ok(())
}

fn required_value(operation: &PatchOperation) -> Result<&Value, ScimError> {
	operation
		.value
		.as_ref()
		.ok_or_else(|| ScimError::InvalidValue(format!("{:?} requires a value", operation.op)))
}
