// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use keel_flags_core::{
	BulkEvaluationResult, ColdStartPolicy, DecisionTrace, Evaluation, EvaluationContext,
	EvaluationResult, FlagsError, Snapshot, SnapshotCounts,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::loader::{LoaderConfig, RefreshOutcome, SnapshotLoader};
use crate::retry::RetryConfig;
use crate::store::FlagStore;

#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub refresh_interval: Duration,
	pub storage_timeout: Duration,
	pub cold_start_policy: ColdStartPolicy,
	pub retry: RetryConfig,
	/// Capacity of the invalidation channel
	pub invalidation_buffer: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			refresh_interval: Duration::from_secs(30),
			storage_timeout: Duration::from_millis(5000),
			cold_start_policy: ColdStartPolicy::FailOpen,
			retry: RetryConfig::default(),
			invalidation_buffer: 64,
		}
	}
}

/// What a reload did to the published snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
	Published { version: u64 },
	Unchanged { version: u64 },
}

/// Read-only summary for health and introspection endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
	/// None until the first snapshot loads
	pub snapshot_version: Option<u64>,
	pub fingerprint: Option<String>,
	pub built_at: Option<DateTime<Utc>>,
	pub counts: SnapshotCounts,
	/// Malformed records left out of the snapshot being served
	pub dropped_records: usize,
	pub cold_start_policy: ColdStartPolicy,
	pub last_refresh_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
	pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Default)]
struct RefreshHealth {
	last_refresh_at: Option<DateTime<Utc>>,
	last_error: Option<String>,
	consecutive_failures: u32,
}

/// Serves evaluations from the current snapshot and swaps in new ones.
///
/// Evaluation only reads the atomically published snapshot; it never takes
/// the refresh lock or touches storage.
pub struct FlagsEngine {
	snapshot: ArcSwapOption<Snapshot>,
	loader: SnapshotLoader,
	config: EngineConfig,
	refresh_lock: Mutex<()>,
	health: ArcSwap<RefreshHealth>,
}

impl FlagsEngine {
	pub fn new(store: Arc<dyn FlagStore>, config: EngineConfig) -> Self {
		let loader = SnapshotLoader::new(
			store,
			LoaderConfig {
				storage_timeout: config.storage_timeout,
				retry: config.retry.clone(),
			},
		);
		Self {
			snapshot: ArcSwapOption::empty(),
			loader,
			config,
			refresh_lock: Mutex::new(()),
			health: ArcSwap::from_pointee(RefreshHealth::default()),
		}
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// The currently published snapshot, if any has loaded.
	pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
		self.snapshot.load_full()
	}

	pub fn evaluate(
		&self,
		flag_key: &str,
		context: &EvaluationContext,
	) -> keel_flags_core::Result<EvaluationResult> {
		match self.snapshot.load_full() {
			Some(snapshot) => snapshot.evaluate(flag_key, context),
			None => self.cold_start(|| EvaluationResult::fail_closed(flag_key)),
		}
	}

	pub fn explain(
		&self,
		flag_key: &str,
		context: &EvaluationContext,
	) -> keel_flags_core::Result<Evaluation> {
		match self.snapshot.load_full() {
			Some(snapshot) => snapshot.explain(flag_key, context),
			None => self.cold_start(|| {
				let result = EvaluationResult::fail_closed(flag_key);
				let trace = DecisionTrace {
					flag_key: result.flag_key.clone(),
					snapshot_version: result.snapshot_version,
					reason: result.reason,
					matched_segment_id: None,
					segments: Vec::new(),
				};
				Evaluation { result, trace }
			}),
		}
	}

	pub fn evaluate_all(
		&self,
		context: &EvaluationContext,
	) -> keel_flags_core::Result<BulkEvaluationResult> {
		match self.snapshot.load_full() {
			Some(snapshot) => Ok(snapshot.evaluate_all(context)),
			None => self.cold_start(BulkEvaluationResult::default),
		}
	}

	fn cold_start<T>(&self, fail_closed: impl FnOnce() -> T) -> keel_flags_core::Result<T> {
		match self.config.cold_start_policy {
			ColdStartPolicy::FailOpen => Err(FlagsError::SnapshotUnavailable),
			ColdStartPolicy::FailClosed => Ok(fail_closed()),
		}
	}

	/// Reloads every flag from storage and publishes the result if it changed.
	///
	/// On failure the previous snapshot stays in service.
	#[instrument(skip(self))]
	pub async fn force_reload(&self) -> Result<ReloadOutcome> {
		let _guard = self.refresh_lock.lock().await;

		let outcome = match self.snapshot.load_full() {
			None => self.loader.load().await.map(RefreshOutcome::Updated),
			Some(current) => self.loader.refresh(&current).await,
		};
		self.finish(outcome)
	}

	/// Reloads a single flag. Falls back to a full load if nothing has loaded yet.
	#[instrument(skip(self))]
	pub async fn refresh_flag(&self, key: &str) -> Result<ReloadOutcome> {
		let _guard = self.refresh_lock.lock().await;

		let outcome = match self.snapshot.load_full() {
			None => self.loader.load().await.map(RefreshOutcome::Updated),
			Some(current) => self.loader.refresh_flag(&current, key).await,
		};
		self.finish(outcome)
	}

	fn finish(&self, outcome: Result<RefreshOutcome>) -> Result<ReloadOutcome> {
		let previous = self.health.load_full();
		match outcome {
			Ok(RefreshOutcome::Updated(snapshot)) => {
				let version = snapshot.version();
				self.snapshot.store(Some(Arc::new(snapshot)));
				self.record_success();
				info!(version, "published flag snapshot");
				Ok(ReloadOutcome::Published { version })
			}
			Ok(RefreshOutcome::Unchanged) => {
				self.record_success();
				let version = self.snapshot.load_full().map_or(0, |s| s.version());
				Ok(ReloadOutcome::Unchanged { version })
			}
			Err(err) => {
				let consecutive_failures = previous.consecutive_failures + 1;
				let serving = self.snapshot.load_full().map(|s| s.version());
				warn!(
					error = %err,
					consecutive_failures,
					serving_version = ?serving,
					"flag refresh failed, keeping previous snapshot"
				);
				self.health.store(Arc::new(RefreshHealth {
					last_refresh_at: previous.last_refresh_at,
					last_error: Some(err.to_string()),
					consecutive_failures,
				}));
				Err(err)
			}
		}
	}

	fn record_success(&self) {
		self.health.store(Arc::new(RefreshHealth {
			last_refresh_at: Some(Utc::now()),
			last_error: None,
			consecutive_failures: 0,
		}));
	}

	pub fn status(&self) -> EngineStatus {
		let snapshot = self.snapshot.load_full();
		let health = self.health.load_full();
		EngineStatus {
			snapshot_version: snapshot.as_ref().map(|s| s.version()),
			fingerprint: snapshot.as_ref().map(|s| s.fingerprint().to_string()),
			built_at: snapshot.as_ref().map(|s| s.built_at()),
			counts: snapshot.as_ref().map(|s| s.counts()).unwrap_or_default(),
			dropped_records: snapshot.as_ref().map(|s| s.dropped_records()).unwrap_or(0),
			cold_start_policy: self.config.cold_start_policy,
			last_refresh_at: health.last_refresh_at,
			last_error: health.last_error.clone(),
			consecutive_failures: health.consecutive_failures,
		}
	}
}
