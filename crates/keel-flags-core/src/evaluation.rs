// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::EvaluationContext;
use crate::error::{FlagsError, Result};
use crate::flag::{FlagValue, SegmentId};
use crate::resolver;
use crate::snapshot::{FlagEntry, Snapshot};
use crate::trace::DecisionTrace;

/// Why a flag evaluated to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	/// The kill switch is off; segments were not consulted.
	Disabled,
	SegmentMatch,
	/// No segment was eligible.
	Default,
}

impl std::fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			EvaluationReason::Disabled => write!(f, "DISABLED"),
			EvaluationReason::SegmentMatch => write!(f, "SEGMENT_MATCH"),
			EvaluationReason::Default => write!(f, "DEFAULT"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
	pub flag_key: String,
	pub value: FlagValue,
	pub matched_segment_id: Option<SegmentId>,
	pub reason: EvaluationReason,
	/// Version of the snapshot that produced this result; 0 when none was loaded
	pub snapshot_version: u64,
}

impl EvaluationResult {
	/// The answer served for every flag when nothing has loaded and the
	/// engine is configured to fail closed.
	pub fn fail_closed(flag_key: impl Into<String>) -> Self {
		Self {
			flag_key: flag_key.into(),
			value: FlagValue::Boolean(false),
			matched_segment_id: None,
			reason: EvaluationReason::Default,
			snapshot_version: 0,
		}
	}
}

/// What to answer before any snapshot has loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartPolicy {
	/// Surface `SnapshotUnavailable` so callers use their own defaults.
	#[default]
	FailOpen,
	/// Answer every flag with [`EvaluationResult::fail_closed`].
	FailClosed,
}

impl std::str::FromStr for ColdStartPolicy {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
			"fail_open" => Ok(ColdStartPolicy::FailOpen),
			"fail_closed" => Ok(ColdStartPolicy::FailClosed),
			other => Err(format!(
				"unknown cold start policy '{other}', expected fail_open or fail_closed"
			)),
		}
	}
}

impl std::fmt::Display for ColdStartPolicy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ColdStartPolicy::FailOpen => write!(f, "fail_open"),
			ColdStartPolicy::FailClosed => write!(f, "fail_closed"),
		}
	}
}

/// An evaluation result with the trace that explains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
	pub result: EvaluationResult,
	pub trace: DecisionTrace,
}

/// Results for every flag in a snapshot, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkEvaluationResult {
	pub results: BTreeMap<String, EvaluationResult>,
	pub snapshot_version: u64,
}

impl BulkEvaluationResult {
	pub fn get(&self, flag_key: &str) -> Option<&EvaluationResult> {
		self.results.get(flag_key)
	}

	pub fn get_bool(&self, flag_key: &str) -> Option<bool> {
		self.get(flag_key).and_then(|r| r.value.as_bool())
	}

	pub fn get_string(&self, flag_key: &str) -> Option<&str> {
		self.get(flag_key).and_then(|r| r.value.as_str())
	}

	pub fn len(&self) -> usize {
		self.results.len()
	}

	pub fn is_empty(&self) -> bool {
		self.results.is_empty()
	}
}

impl FlagEntry {
	fn evaluate(&self, context: &EvaluationContext, snapshot_version: u64) -> EvaluationResult {
		let flag = &self.flag;
		if !flag.is_enabled {
			return self.default_result(EvaluationReason::Disabled, snapshot_version);
		}

		match resolver::winner(flag, &self.segments, context) {
			Some(segment) => EvaluationResult {
				flag_key: flag.key.clone(),
				value: segment.value.clone(),
				matched_segment_id: Some(segment.id.clone()),
				reason: EvaluationReason::SegmentMatch,
				snapshot_version,
			},
			None => self.default_result(EvaluationReason::Default, snapshot_version),
		}
	}

	fn explain(&self, context: &EvaluationContext, snapshot_version: u64) -> Evaluation {
		let flag = &self.flag;
		let (result, segments) = if !flag.is_enabled {
			(
				self.default_result(EvaluationReason::Disabled, snapshot_version),
				Vec::new(),
			)
		} else {
			let resolution = resolver::resolve(flag, &self.segments, context);
			let result = match resolution.winner {
				Some(segment) => EvaluationResult {
					flag_key: flag.key.clone(),
					value: segment.value.clone(),
					matched_segment_id: Some(segment.id.clone()),
					reason: EvaluationReason::SegmentMatch,
					snapshot_version,
				},
				None => self.default_result(EvaluationReason::Default, snapshot_version),
			};
			(result, resolution.trace)
		};

		let trace = DecisionTrace {
			flag_key: flag.key.clone(),
			snapshot_version,
			reason: result.reason,
			matched_segment_id: result.matched_segment_id.clone(),
			segments,
		};
		Evaluation { result, trace }
	}

	fn default_result(&self, reason: EvaluationReason, snapshot_version: u64) -> EvaluationResult {
		EvaluationResult {
			flag_key: self.flag.key.clone(),
			value: self.flag.default_value.clone(),
			matched_segment_id: None,
			reason,
			snapshot_version,
		}
	}
}

impl Snapshot {
	/// Evaluates one flag. Pure in-memory work with no I/O.
	pub fn evaluate(&self, flag_key: &str, context: &EvaluationContext) -> Result<EvaluationResult> {
		let entry = self
			.get(flag_key)
			.ok_or_else(|| FlagsError::FlagNotFound(flag_key.to_string()))?;
		Ok(entry.evaluate(context, self.version()))
	}

	/// Evaluates one flag and records every decision made along the way.
	pub fn explain(&self, flag_key: &str, context: &EvaluationContext) -> Result<Evaluation> {
		let entry = self
			.get(flag_key)
			.ok_or_else(|| FlagsError::FlagNotFound(flag_key.to_string()))?;
		Ok(entry.explain(context, self.version()))
	}

	pub fn evaluate_all(&self, context: &EvaluationContext) -> BulkEvaluationResult {
		let results = self
			.entries()
			.map(|(key, entry)| (key.clone(), entry.evaluate(context, self.version())))
			.collect();
		BulkEvaluationResult {
			results,
			snapshot_version: self.version(),
		}
	}
}
