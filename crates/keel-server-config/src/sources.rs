// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, TOML files and environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use keel_flags_core::ColdStartPolicy;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::KeelConfigLayer;
use crate::sections::{DatabaseConfigLayer, FlagsConfigLayer, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<KeelConfigLayer, ConfigError>;
}

/// Built-in defaults source. Defaults are applied at finalize time, so this
/// contributes an empty layer.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<KeelConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(KeelConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/keel/flags.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<KeelConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(KeelConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: KeelConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: KEEL_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<KeelConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(KeelConfigLayer {
			flags: Some(load_flags_from_env()?),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v
			.parse()
			.map(Some)
			.map_err(|_| ConfigError::invalid_value(name, format!("invalid {kind} value '{v}'"))),
		None => Ok(None),
	}
}

fn load_flags_from_env() -> Result<FlagsConfigLayer, ConfigError> {
	let cold_start_policy = match env_var("KEEL_FLAGS_COLD_START_POLICY") {
		Some(v) => Some(
			ColdStartPolicy::from_str(&v)
				.map_err(|message| ConfigError::invalid_value("KEEL_FLAGS_COLD_START_POLICY", message))?,
		),
		None => None,
	};

	Ok(FlagsConfigLayer {
		refresh_interval_secs: env_parse("KEEL_FLAGS_REFRESH_INTERVAL_SECS", "u64")?,
		storage_timeout_ms: env_parse("KEEL_FLAGS_STORAGE_TIMEOUT_MS", "u64")?,
		cold_start_policy,
		retry_max_attempts: env_parse("KEEL_FLAGS_RETRY_MAX_ATTEMPTS", "u32")?,
		retry_base_delay_ms: env_parse("KEEL_FLAGS_RETRY_BASE_DELAY_MS", "u64")?,
		retry_max_delay_ms: env_parse("KEEL_FLAGS_RETRY_MAX_DELAY_MS", "u64")?,
		invalidation_buffer: env_parse("KEEL_FLAGS_INVALIDATION_BUFFER", "usize")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("KEEL_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("KEEL_LOG_LEVEL"),
		json: env_bool("KEEL_LOG_JSON"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.flags.is_none());
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/flags.toml").load().unwrap();
		assert!(layer.flags.is_none());
	}

	#[test]
	fn test_toml_source_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[flags]\nstorage_timeout_ms = 750").unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(layer.flags.unwrap().storage_timeout_ms, Some(750));
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[flags\nrefresh_interval_secs = ").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_env_parse_rejects_garbage() {
		std::env::set_var("KEEL_TEST_ENV_PARSE_GARBAGE", "soon");
		let result: Result<Option<u64>, _> = env_parse("KEEL_TEST_ENV_PARSE_GARBAGE", "u64");
		std::env::remove_var("KEEL_TEST_ENV_PARSE_GARBAGE");

		let err = result.unwrap_err();
		assert!(err.to_string().contains("KEEL_TEST_ENV_PARSE_GARBAGE"));
	}

	#[test]
	fn test_env_parse_missing_is_none() {
		let result: Option<u64> = env_parse("KEEL_TEST_ENV_PARSE_UNSET", "u64").unwrap();
		assert!(result.is_none());
	}
}
