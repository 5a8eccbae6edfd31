// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

/// Connection and behavior settings for the DynamoDB data-access layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DynamoDbConfig {
	/// AWS region; falls back to the ambient SDK configuration when unset.
	pub region: Option<String>,

	/// Endpoint URL override, for local DynamoDB instances.
	pub endpoint_override: Option<String>,

	/// Static credentials. When unset the ambient SDK credential chain
	/// (environment, profile, instance role) is used.
	pub access_key_id: Option<String>,
	pub secret_access_key: Option<String>,
	pub session_token: Option<String>,

	/// Prefix prepended to every table's base name.
	pub table_name_prefix: Option<String>,

	/// Whether full table scans may be executed. When off, unfiltered
	/// listings and filters that cannot use an index fail instead.
	pub allow_table_scans: bool,
}

impl DynamoDbConfig {
	pub fn table_name(&self, base_name: &str) -> String {
		match &self.table_name_prefix {
			Some(prefix) => format!("{}{}", prefix, base_name),
			None => base_name.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_name_prefix() {
		let config = DynamoDbConfig {
			table_name_prefix: Some("test-".to_string()),
			..Default::default()
		};
		assert_eq!(config.table_name("curity-accounts"), "test-curity-accounts");
		assert_eq!(
			DynamoDbConfig::default().table_name("curity-accounts"),
			"curity-accounts"
		);
	}

	#[test]
	fn deserializes_with_defaults() {
		let config: DynamoDbConfig =
			serde_json::from_str(r#"{"allow_table_scans": true}"#).unwrap();
		assert!(config.allow_table_scans);
		assert!(config.region.is_none());
	}
}
