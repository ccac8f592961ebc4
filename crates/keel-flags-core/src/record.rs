// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw flag, segment and rule records as handed over by storage.
//!
//! These shapes are loose: enums arrive as strings, values as
//! optional JSON, and cross references as plain ids. Nothing here is trusted
//! until [`SnapshotBuilder`](crate::SnapshotBuilder) has validated it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of record a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
	Flag,
	Segment,
	Rule,
}

impl std::fmt::Display for RecordKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RecordKind::Flag => write!(f, "flag"),
			RecordKind::Segment => write!(f, "segment"),
			RecordKind::Rule => write!(f, "rule"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
	pub id: String,
	pub key: String,
	/// "boolean", "multivariate" or "percentage"
	pub flag_type: String,
	pub is_enabled: bool,
	pub default_value: Option<serde_json::Value>,
	pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
	pub id: String,
	pub flag_id: String,
	/// "GLOBAL", "ENVIRONMENT", "TENANT", "USER" or "CUSTOM"
	pub scope_type: String,
	pub scope_id: Option<String>,
	pub priority: i64,
	pub is_active: bool,
	pub value: Option<serde_json::Value>,
	pub rollout_percentage: Option<f64>,
	pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
	pub id: String,
	pub segment_id: String,
	pub attribute: String,
	/// e.g. "EQUALS", "IN", "REGEX"
	pub operator: String,
	pub value: Option<serde_json::Value>,
	pub values: Option<Vec<serde_json::Value>>,
	pub order: i64,
}

/// A consistent read of every record the snapshot is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
	#[serde(default)]
	pub flags: Vec<FlagRecord>,
	#[serde(default)]
	pub segments: Vec<SegmentRecord>,
	#[serde(default)]
	pub rules: Vec<RuleRecord>,
}

impl RecordSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty() && self.segments.is_empty() && self.rules.is_empty()
	}

	pub fn len(&self) -> usize {
		self.flags.len() + self.segments.len() + self.rules.len()
	}

	/// Appends all records of `other`.
	pub fn extend(&mut self, other: RecordSet) {
		self.flags.extend(other.flags);
		self.segments.extend(other.segments);
		self.rules.extend(other.rules);
	}

	/// Restricts the set to one flag and the segments and rules hanging off it.
	pub fn for_flag_key(&self, key: &str) -> Option<RecordSet> {
		let flags: Vec<FlagRecord> = self.flags.iter().filter(|f| f.key == key).cloned().collect();
		if flags.is_empty() {
			return None;
		}

		let segments: Vec<SegmentRecord> = self
			.segments
			.iter()
			.filter(|s| flags.iter().any(|f| f.id == s.flag_id))
			.cloned()
			.collect();
		let rules = self
			.rules
			.iter()
			.filter(|r| segments.iter().any(|s| s.id == r.segment_id))
			.cloned()
			.collect();

		Some(RecordSet {
			flags,
			segments,
			rules,
		})
	}
}
