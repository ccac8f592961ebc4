// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-side runtime for the Keel feature flags engine.
//!
//! # Architecture
//!
//! - `store` - the [`FlagStore`] trait plus an in-memory implementation
//! - `sqlite` - SQLite-backed record store
//! - `loader` - reads records with timeout and retry, builds snapshots
//! - `engine` - publishes snapshots atomically and serves evaluations
//! - `refresh` - background polling and invalidation handling
//!
//! # Example
//!
//! ```ignore
//! use keel_server_flags::{EngineConfig, FlagsEngine, Refresher, SqliteFlagStore};
//! use keel_flags_core::EvaluationContext;
//!
//! let store = Arc::new(SqliteFlagStore::new(pool));
//! let engine = Arc::new(FlagsEngine::new(store, EngineConfig::default()));
//! engine.force_reload().await?;
//! let refresher = Refresher::spawn(Arc::clone(&engine));
//!
//! let ctx = EvaluationContext::new().with_tenant_id("acme");
//! let result = engine.evaluate("dark-mode", &ctx)?;
//! ```

pub mod engine;
pub mod error;
pub mod loader;
pub mod refresh;
pub mod retry;
pub mod sqlite;
pub mod store;

pub use engine::{EngineConfig, EngineStatus, FlagsEngine, ReloadOutcome};
pub use error::{FlagsServerError, Result};
pub use loader::{LoaderConfig, RefreshOutcome, SnapshotLoader};
pub use refresh::{Invalidation, Refresher};
pub use retry::{retry, RetryConfig, RetryableError};
pub use sqlite::SqliteFlagStore;
pub use store::{FlagStore, InMemoryFlagStore};
