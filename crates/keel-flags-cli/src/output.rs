// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Human-readable rendering. `--json` output bypasses this and serializes
//! the library types directly.

use std::fmt::Write;

use keel_flags_core::{
	BulkEvaluationResult, DecisionTrace, EvaluationResult, FlagValue, SegmentOutcome,
};
use keel_server_flags::EngineStatus;

pub fn value(value: &FlagValue) -> String {
	match value {
		FlagValue::Boolean(b) => b.to_string(),
		FlagValue::String(s) => s.clone(),
		FlagValue::Json(v) => v.to_string(),
	}
}

pub fn result(result: &EvaluationResult) -> String {
	let mut out = format!(
		"{} = {} ({}, snapshot v{})",
		result.flag_key,
		value(&result.value),
		result.reason,
		result.snapshot_version
	);
	if let Some(segment) = &result.matched_segment_id {
		let _ = write!(out, " via segment {segment}");
	}
	out
}

pub fn bulk(results: &BulkEvaluationResult) -> String {
	let mut out = String::new();
	for result in results.results.values() {
		let _ = writeln!(out, "{}", self::result(result));
	}
	out
}

pub fn trace(trace: &DecisionTrace) -> String {
	let mut out = format!(
		"{} -> {} (snapshot v{})\n",
		trace.flag_key, trace.reason, trace.snapshot_version
	);
	if trace.segments.is_empty() {
		out.push_str("  no segments consulted\n");
	}
	for segment in &trace.segments {
		let _ = writeln!(
			out,
			"  segment {} [{} priority {}]: {}",
			segment.segment_id,
			segment.scope_type,
			segment.priority,
			outcome(&segment.outcome)
		);
		for rule in &segment.rules {
			let _ = writeln!(
				out,
				"    rule {} {} {} -> {}",
				rule.rule_id,
				rule.attribute,
				rule.operator,
				if rule.matched { "match" } else { "no match" }
			);
		}
	}
	out
}

fn outcome(outcome: &SegmentOutcome) -> String {
	match outcome {
		SegmentOutcome::ScopeMismatch => "scope mismatch".to_string(),
		SegmentOutcome::RuleMismatch { rule_id } => format!("rule {rule_id} failed"),
		SegmentOutcome::NoIdentity { percentage } => {
			format!("no identity for {percentage}% rollout")
		}
		SegmentOutcome::OutOfRollout { bucket, percentage } => {
			format!("bucket {bucket:.2} outside {percentage}% rollout")
		}
		SegmentOutcome::Matched => "matched".to_string(),
	}
}

pub fn status(status: &EngineStatus) -> String {
	let mut out = String::new();
	match status.snapshot_version {
		Some(version) => {
			let _ = writeln!(out, "snapshot:      v{version}");
		}
		None => out.push_str("snapshot:      not loaded\n"),
	}
	if let Some(fingerprint) = &status.fingerprint {
		let _ = writeln!(out, "fingerprint:   {fingerprint}");
	}
	let _ = writeln!(
		out,
		"records:       {} flags, {} segments, {} rules ({} dropped)",
		status.counts.flags, status.counts.segments, status.counts.rules, status.dropped_records
	);
	let _ = writeln!(out, "cold start:    {}", status.cold_start_policy);
	if let Some(error) = &status.last_error {
		let _ = writeln!(
			out,
			"last error:    {error} ({} consecutive failures)",
			status.consecutive_failures
		);
	}
	out
}
