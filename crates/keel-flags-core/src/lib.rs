// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types and algorithms for the Keel feature flags engine.
//!
//! This crate has no I/O. It turns raw storage records into an immutable,
//! versioned [`Snapshot`] and evaluates flags against it. Loading, refreshing
//! and publishing snapshots lives in `keel-server-flags`.
//!
//! # Overview
//!
//! - Flags have a kill switch, a typed default value and override segments
//! - Segments are scoped (global, environment, tenant, user, custom),
//!   prioritised, gated by AND-combined targeting rules and optionally rolled
//!   out to a percentage of identities
//! - Every evaluation can be explained with a reproducible [`DecisionTrace`]
//!
//! # Example
//!
//! ```
//! use keel_flags_core::{
//!     EvaluationContext, EvaluationReason, FlagRecord, RecordSet, SegmentRecord,
//!     SnapshotBuilder,
//! };
//!
//! let records = RecordSet {
//!     flags: vec![FlagRecord {
//!         id: "f1".to_string(),
//!         key: "dark-mode".to_string(),
//!         flag_type: "boolean".to_string(),
//!         is_enabled: true,
//!         default_value: Some(serde_json::json!(false)),
//!         updated_at: None,
//!     }],
//!     segments: vec![SegmentRecord {
//!         id: "s1".to_string(),
//!         flag_id: "f1".to_string(),
//!         scope_type: "TENANT".to_string(),
//!         scope_id: Some("acme".to_string()),
//!         priority: 10,
//!         is_active: true,
//!         value: Some(serde_json::json!(true)),
//!         rollout_percentage: None,
//!         created_at: None,
//!     }],
//!     rules: vec![],
//! };
//!
//! let snapshot = SnapshotBuilder::new().build(&records, 1).snapshot;
//! let ctx = EvaluationContext::new().with_tenant_id("acme");
//! let result = snapshot.evaluate("dark-mode", &ctx).unwrap();
//! assert_eq!(result.reason, EvaluationReason::SegmentMatch);
//! ```

pub mod bucket;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod flag;
pub mod record;
pub mod resolver;
pub mod rule;
pub mod snapshot;
pub mod trace;

pub use bucket::in_rollout;
pub use context::{AttributeRef, EvaluationContext};
pub use error::{FlagsError, Result};
pub use evaluation::{
	BulkEvaluationResult, ColdStartPolicy, Evaluation, EvaluationReason, EvaluationResult,
};
pub use flag::{Flag, FlagId, FlagType, FlagValue, RuleId, ScopeType, Segment, SegmentId};
pub use record::{FlagRecord, RecordKind, RecordSet, RuleRecord, SegmentRecord};
pub use resolver::{resolve, Resolution};
pub use rule::{matches, Predicate, RuleOperator, TargetingRule};
pub use snapshot::{BuildOutput, FlagEntry, Snapshot, SnapshotBuilder, SnapshotCounts};
pub use trace::{DecisionTrace, RuleTrace, SegmentOutcome, SegmentTrace};
