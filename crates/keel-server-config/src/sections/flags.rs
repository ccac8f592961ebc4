// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag engine configuration section.

use std::time::Duration;

use keel_flags_core::ColdStartPolicy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlagsConfigLayer {
	pub refresh_interval_secs: Option<u64>,
	pub storage_timeout_ms: Option<u64>,
	pub cold_start_policy: Option<ColdStartPolicy>,
	pub retry_max_attempts: Option<u32>,
	pub retry_base_delay_ms: Option<u64>,
	pub retry_max_delay_ms: Option<u64>,
	pub invalidation_buffer: Option<usize>,
}

impl FlagsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.refresh_interval_secs.is_some() {
			self.refresh_interval_secs = other.refresh_interval_secs;
		}
		if other.storage_timeout_ms.is_some() {
			self.storage_timeout_ms = other.storage_timeout_ms;
		}
		if other.cold_start_policy.is_some() {
			self.cold_start_policy = other.cold_start_policy;
		}
		if other.retry_max_attempts.is_some() {
			self.retry_max_attempts = other.retry_max_attempts;
		}
		if other.retry_base_delay_ms.is_some() {
			self.retry_base_delay_ms = other.retry_base_delay_ms;
		}
		if other.retry_max_delay_ms.is_some() {
			self.retry_max_delay_ms = other.retry_max_delay_ms;
		}
		if other.invalidation_buffer.is_some() {
			self.invalidation_buffer = other.invalidation_buffer;
		}
	}

	pub fn finalize(self) -> FlagsConfig {
		FlagsConfig {
			refresh_interval_secs: self.refresh_interval_secs.unwrap_or(30),
			storage_timeout_ms: self.storage_timeout_ms.unwrap_or(5000),
			cold_start_policy: self.cold_start_policy.unwrap_or_default(),
			retry_max_attempts: self.retry_max_attempts.unwrap_or(3),
			retry_base_delay_ms: self.retry_base_delay_ms.unwrap_or(200),
			retry_max_delay_ms: self.retry_max_delay_ms.unwrap_or(5000),
			invalidation_buffer: self.invalidation_buffer.unwrap_or(64),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagsConfig {
	pub refresh_interval_secs: u64,
	pub storage_timeout_ms: u64,
	pub cold_start_policy: ColdStartPolicy,
	pub retry_max_attempts: u32,
	pub retry_base_delay_ms: u64,
	pub retry_max_delay_ms: u64,
	pub invalidation_buffer: usize,
}

impl Default for FlagsConfig {
	fn default() -> Self {
		FlagsConfigLayer::default().finalize()
	}
}

impl FlagsConfig {
	pub fn refresh_interval(&self) -> Duration {
		Duration::from_secs(self.refresh_interval_secs)
	}

	pub fn storage_timeout(&self) -> Duration {
		Duration::from_millis(self.storage_timeout_ms)
	}

	pub fn retry_base_delay(&self) -> Duration {
		Duration::from_millis(self.retry_base_delay_ms)
	}

	pub fn retry_max_delay(&self) -> Duration {
		Duration::from_millis(self.retry_max_delay_ms)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.refresh_interval_secs == 0 {
			return Err(ConfigError::validation(
				"flags.refresh_interval_secs must be greater than zero",
			));
		}
		if self.storage_timeout_ms == 0 {
			return Err(ConfigError::validation(
				"flags.storage_timeout_ms must be greater than zero",
			));
		}
		if self.retry_max_attempts == 0 {
			return Err(ConfigError::validation(
				"flags.retry_max_attempts must be at least 1",
			));
		}
		if self.retry_base_delay_ms > self.retry_max_delay_ms {
			return Err(ConfigError::validation(format!(
				"flags.retry_base_delay_ms ({}) exceeds flags.retry_max_delay_ms ({})",
				self.retry_base_delay_ms, self.retry_max_delay_ms
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = FlagsConfig::default();
		assert_eq!(config.refresh_interval(), Duration::from_secs(30));
		assert_eq!(config.storage_timeout(), Duration::from_millis(5000));
		assert_eq!(config.cold_start_policy, ColdStartPolicy::FailOpen);
		assert_eq!(config.retry_max_attempts, 3);
		assert_eq!(config.invalidation_buffer, 64);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let toml_str = r#"
refresh_interval_secs = 10
cold_start_policy = "fail_closed"
"#;
		let layer: FlagsConfigLayer = toml::from_str(toml_str).unwrap();
		assert_eq!(layer.refresh_interval_secs, Some(10));
		assert_eq!(layer.cold_start_policy, Some(ColdStartPolicy::FailClosed));
		assert!(layer.storage_timeout_ms.is_none());
	}

	#[test]
	fn test_rejects_unknown_policy() {
		let result: Result<FlagsConfigLayer, _> = toml::from_str(r#"cold_start_policy = "maybe""#);
		assert!(result.is_err());
	}

	#[test]
	fn test_validation_rejects_zero_interval() {
		let config = FlagsConfig {
			refresh_interval_secs: 0,
			..Default::default()
		};
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("refresh_interval_secs"));
	}

	#[test]
	fn test_validation_rejects_zero_attempts() {
		let config = FlagsConfig {
			retry_max_attempts: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_validation_rejects_inverted_delays() {
		let config = FlagsConfig {
			retry_base_delay_ms: 10_000,
			retry_max_delay_ms: 100,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}
}
