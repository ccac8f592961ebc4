// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decision traces explaining how an evaluation reached its result.
//!
//! Traces only contain data derived from the snapshot and the context, and
//! every collection in them is ordered, so serialising the same evaluation
//! twice produces identical bytes.

use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationReason;
use crate::flag::{RuleId, ScopeType, SegmentId};
use crate::rule::RuleOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
	pub flag_key: String,
	pub snapshot_version: u64,
	pub reason: EvaluationReason,
	pub matched_segment_id: Option<SegmentId>,
	/// Segments in precedence order, up to and including the winner.
	/// Empty when the flag is disabled.
	pub segments: Vec<SegmentTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTrace {
	pub segment_id: SegmentId,
	pub scope_type: ScopeType,
	pub priority: i64,
	/// Rules evaluated, stopping at the first that failed
	pub rules: Vec<RuleTrace>,
	pub outcome: SegmentOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTrace {
	pub rule_id: RuleId,
	pub attribute: String,
	pub operator: RuleOperator,
	pub matched: bool,
}

/// Why a segment did or did not win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentOutcome {
	/// The context does not carry the segment's scope identifier.
	ScopeMismatch,
	RuleMismatch { rule_id: RuleId },
	/// Partial rollout, but the context has no identity to bucket.
	NoIdentity { percentage: f64 },
	OutOfRollout { bucket: f64, percentage: f64 },
	Matched,
}

impl SegmentOutcome {
	pub fn is_match(&self) -> bool {
		matches!(self, SegmentOutcome::Matched)
	}
}
