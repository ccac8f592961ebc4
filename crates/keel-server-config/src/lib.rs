// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Keel flags runtime.
//!
//! This crate provides:
//! - Layered configuration from defaults, a TOML file and the environment
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`KEEL_*`)
//!
//! # Usage
//!
//! ```ignore
//! use keel_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("refreshing every {}s", config.flags.refresh_interval_secs);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::KeelConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct KeelConfig {
	pub flags: FlagsConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`KEEL_*`)
/// 2. Config file (`/etc/keel/flags.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<KeelConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path in place of the system one.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<KeelConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge the given sources in precedence order and finalize the result.
pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<KeelConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = KeelConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

fn finalize(layer: KeelConfigLayer) -> Result<KeelConfig, ConfigError> {
	let flags = layer.flags.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	flags.validate()?;

	info!(
		database = %database.url,
		refresh_interval_secs = flags.refresh_interval_secs,
		storage_timeout_ms = flags.storage_timeout_ms,
		cold_start_policy = %flags.cold_start_policy,
		"flags configuration loaded"
	);

	Ok(KeelConfig {
		flags,
		database,
		logging,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use keel_flags_core::ColdStartPolicy;

	struct FixedSource {
		precedence: Precedence,
		layer: KeelConfigLayer,
	}

	impl ConfigSource for FixedSource {
		fn name(&self) -> &'static str {
			"fixed"
		}

		fn precedence(&self) -> Precedence {
			self.precedence
		}

		fn load(&self) -> Result<KeelConfigLayer, ConfigError> {
			Ok(self.layer.clone())
		}
	}

	fn flags_layer(interval: u64) -> KeelConfigLayer {
		KeelConfigLayer {
			flags: Some(FlagsConfigLayer {
				refresh_interval_secs: Some(interval),
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn test_defaults_only() {
		let config = load_from_sources(vec![Box::new(DefaultsSource)]).unwrap();
		assert_eq!(config.flags, FlagsConfig::default());
		assert_eq!(config.database.url, "sqlite:keel-flags.db");
		assert_eq!(config.logging.level, "info");
	}

	#[test]
	fn test_higher_precedence_wins_regardless_of_order() {
		let config = load_from_sources(vec![
			Box::new(FixedSource {
				precedence: Precedence::Environment,
				layer: flags_layer(5),
			}),
			Box::new(FixedSource {
				precedence: Precedence::ConfigFile,
				layer: flags_layer(120),
			}),
		])
		.unwrap();
		assert_eq!(config.flags.refresh_interval_secs, 5);
	}

	#[test]
	fn test_file_values_survive_unset_env() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		std::io::Write::write_all(
			&mut file,
			b"[flags]\ncold_start_policy = \"fail_closed\"\nrefresh_interval_secs = 45\n",
		)
		.unwrap();

		let config = load_from_sources(vec![
			Box::new(DefaultsSource),
			Box::new(TomlSource::new(file.path())),
			Box::new(FixedSource {
				precedence: Precedence::Environment,
				layer: KeelConfigLayer::default(),
			}),
		])
		.unwrap();
		assert_eq!(config.flags.cold_start_policy, ColdStartPolicy::FailClosed);
		assert_eq!(config.flags.refresh_interval_secs, 45);
	}

	#[test]
	fn test_invalid_values_fail_validation() {
		let result = load_from_sources(vec![Box::new(FixedSource {
			precedence: Precedence::ConfigFile,
			layer: flags_layer(0),
		})]);
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}
}
