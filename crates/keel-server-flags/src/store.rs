// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use keel_flags_core::RecordSet;
use tokio::sync::RwLock;

use crate::error::{FlagsServerError, Result};

/// Read-only access to the flag, segment and rule records a snapshot is
/// built from.
#[async_trait]
pub trait FlagStore: Send + Sync {
	/// Reads every record for a full rebuild.
	async fn fetch_all(&self) -> Result<RecordSet>;

	/// Reads the flags with the given key and their segments and rules.
	///
	/// Returns `None` when no flag has that key.
	async fn fetch_flag(&self, key: &str) -> Result<Option<RecordSet>>;
}

/// A [`FlagStore`] held in memory, for tests and local tooling.
#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
	records: RwLock<RecordSet>,
	outage: RwLock<Option<String>>,
}

impl InMemoryFlagStore {
	pub fn new(records: RecordSet) -> Self {
		Self {
			records: RwLock::new(records),
			outage: RwLock::new(None),
		}
	}

	pub async fn replace(&self, records: RecordSet) {
		*self.records.write().await = records;
	}

	/// Applies `f` to the stored records in place.
	pub async fn update<F>(&self, f: F)
	where
		F: FnOnce(&mut RecordSet),
	{
		f(&mut *self.records.write().await);
	}

	/// Makes every read fail with `StorageUnavailable` until cleared with `None`.
	pub async fn set_outage(&self, reason: Option<String>) {
		*self.outage.write().await = reason;
	}

	async fn check_outage(&self) -> Result<()> {
		match self.outage.read().await.as_ref() {
			Some(reason) => Err(FlagsServerError::StorageUnavailable(reason.clone())),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
	async fn fetch_all(&self) -> Result<RecordSet> {
		self.check_outage().await?;
		Ok(self.records.read().await.clone())
	}

	async fn fetch_flag(&self, key: &str) -> Result<Option<RecordSet>> {
		self.check_outage().await?;
		Ok(self.records.read().await.for_flag_key(key))
	}
}
