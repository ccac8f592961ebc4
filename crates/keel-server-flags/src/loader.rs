// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use keel_flags_core::{BuildOutput, FlagsError, RecordSet, Snapshot, SnapshotBuilder};
use tracing::{debug, info, instrument, warn};

use crate::error::{FlagsServerError, Result};
use crate::retry::{retry, RetryConfig};
use crate::store::FlagStore;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
	/// Upper bound for a single storage read
	pub storage_timeout: Duration,
	pub retry: RetryConfig,
}

impl Default for LoaderConfig {
	fn default() -> Self {
		Self {
			storage_timeout: Duration::from_millis(5000),
			retry: RetryConfig::default(),
		}
	}
}

/// Result of a refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
	/// Storage changed; the new snapshot carries the next version.
	Updated(Snapshot),
	/// Storage produced the same fingerprint as the current snapshot.
	Unchanged,
}

/// Reads records from a [`FlagStore`] and builds snapshots from them.
pub struct SnapshotLoader {
	store: Arc<dyn FlagStore>,
	config: LoaderConfig,
	builder: SnapshotBuilder,
}

impl SnapshotLoader {
	pub fn new(store: Arc<dyn FlagStore>, config: LoaderConfig) -> Self {
		Self {
			store,
			config,
			builder: SnapshotBuilder::new(),
		}
	}

	/// Builds the first snapshot (version 1) from a full read of storage.
	#[instrument(skip(self))]
	pub async fn load(&self) -> Result<Snapshot> {
		let records = self.fetch_all().await?;
		let output = self.builder.build(&records, 1);
		Ok(self.accept(output))
	}

	/// Rebuilds from a full read and compares against `current`.
	#[instrument(skip(self, current), fields(current_version = current.version()))]
	pub async fn refresh(&self, current: &Snapshot) -> Result<RefreshOutcome> {
		let records = self.fetch_all().await?;
		let output = self.builder.build(&records, current.version() + 1);
		Ok(self.compare(current, output))
	}

	/// Reloads one flag and rebuilds only its entry, sharing the rest of
	/// `current`.
	#[instrument(skip(self, current), fields(current_version = current.version()))]
	pub async fn refresh_flag(&self, current: &Snapshot, key: &str) -> Result<RefreshOutcome> {
		let records = self.fetch_flag(key).await?.unwrap_or_default();
		let output = current.replace_flag(key, &records, current.version() + 1);
		Ok(self.compare(current, output))
	}

	fn compare(&self, current: &Snapshot, output: BuildOutput) -> RefreshOutcome {
		if output.snapshot.fingerprint() == current.fingerprint() {
			debug!(
				version = current.version(),
				fingerprint = %current.fingerprint(),
				"flag records unchanged"
			);
			return RefreshOutcome::Unchanged;
		}
		RefreshOutcome::Updated(self.accept(output))
	}

	fn accept(&self, output: BuildOutput) -> Snapshot {
		for err in &output.dropped {
			match err {
				FlagsError::MalformedRecord { kind, id, reason } => {
					warn!(kind = %kind, id = %id, reason = %reason, "dropping malformed flag record");
				}
				other => warn!(error = %other, "dropping flag record"),
			}
		}

		let snapshot = output.snapshot;
		let counts = snapshot.counts();
		info!(
			version = snapshot.version(),
			fingerprint = %snapshot.fingerprint(),
			flags = counts.flags,
			segments = counts.segments,
			rules = counts.rules,
			dropped = output.dropped.len(),
			total_dropped = snapshot.dropped_records(),
			"built flag snapshot"
		);
		snapshot
	}

	async fn fetch_all(&self) -> Result<RecordSet> {
		retry(&self.config.retry, || self.bounded(self.store.fetch_all())).await
	}

	async fn fetch_flag(&self, key: &str) -> Result<Option<RecordSet>> {
		retry(&self.config.retry, || self.bounded(self.store.fetch_flag(key))).await
	}

	async fn bounded<T, F>(&self, fut: F) -> Result<T>
	where
		F: std::future::Future<Output = Result<T>>,
	{
		tokio::time::timeout(self.config.storage_timeout, fut)
			.await
			.map_err(|_| FlagsServerError::StorageTimeout(self.config.storage_timeout))?
	}
}
