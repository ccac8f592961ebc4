// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Segment resolution: picks the winning override segment for a context.
//!
//! A segment is eligible when, in order:
//! 1. its scope matches the context (GLOBAL always matches)
//! 2. every targeting rule passes
//! 3. the context's identity falls inside its rollout percentage
//!
//! Segments are stored in precedence order (see [`Segment::precedence_cmp`]),
//! so the first eligible segment is the winner and the walk stops there.

use crate::bucket;
use crate::context::EvaluationContext;
use crate::flag::{Flag, ScopeType, Segment};
use crate::rule::{self, TargetingRule};
use crate::trace::{RuleTrace, SegmentOutcome, SegmentTrace};

#[derive(Debug, Clone)]
pub struct Resolution<'a> {
	pub winner: Option<&'a Segment>,
	/// Per-segment decisions in the order they were checked
	pub trace: Vec<SegmentTrace>,
}

/// Resolves the winning segment and records every decision along the way.
pub fn resolve<'a>(flag: &Flag, segments: &'a [Segment], context: &EvaluationContext) -> Resolution<'a> {
	let mut trace = Vec::new();

	for segment in segments {
		let mut rules = Vec::new();
		let check = check_segment(&flag.key, segment, context, Some(&mut rules));
		let outcome = check.to_outcome();
		let matched = outcome.is_match();

		trace.push(SegmentTrace {
			segment_id: segment.id.clone(),
			scope_type: segment.scope_type,
			priority: segment.priority,
			rules,
			outcome,
		});

		if matched {
			return Resolution {
				winner: Some(segment),
				trace,
			};
		}
	}

	Resolution {
		winner: None,
		trace,
	}
}

/// Resolves the winning segment without building a trace.
pub fn winner<'a>(flag: &Flag, segments: &'a [Segment], context: &EvaluationContext) -> Option<&'a Segment> {
	segments
		.iter()
		.find(|segment| matches!(check_segment(&flag.key, segment, context, None), Check::Matched))
}

enum Check<'a> {
	ScopeMismatch,
	RuleMismatch(&'a TargetingRule),
	NoIdentity(f64),
	OutOfRollout { bucket: f64, percentage: f64 },
	Matched,
}

impl Check<'_> {
	fn to_outcome(&self) -> SegmentOutcome {
		match self {
			Check::ScopeMismatch => SegmentOutcome::ScopeMismatch,
			Check::RuleMismatch(rule) => SegmentOutcome::RuleMismatch {
				rule_id: rule.id.clone(),
			},
			Check::NoIdentity(percentage) => SegmentOutcome::NoIdentity {
				percentage: *percentage,
			},
			Check::OutOfRollout { bucket, percentage } => SegmentOutcome::OutOfRollout {
				bucket: *bucket,
				percentage: *percentage,
			},
			Check::Matched => SegmentOutcome::Matched,
		}
	}
}

fn check_segment<'a>(
	flag_key: &str,
	segment: &'a Segment,
	context: &EvaluationContext,
	mut rule_trace: Option<&mut Vec<RuleTrace>>,
) -> Check<'a> {
	if !scope_matches(segment, context) {
		return Check::ScopeMismatch;
	}

	for targeting_rule in &segment.rules {
		let matched = rule::matches(targeting_rule, context);
		if let Some(trace) = rule_trace.as_deref_mut() {
			trace.push(RuleTrace {
				rule_id: targeting_rule.id.clone(),
				attribute: targeting_rule.attribute.clone(),
				operator: targeting_rule.operator(),
				matched,
			});
		}
		if !matched {
			return Check::RuleMismatch(targeting_rule);
		}
	}

	let percentage = segment.effective_rollout();
	if percentage >= 100.0 {
		return Check::Matched;
	}

	let Some(identity) = context.identity() else {
		return Check::NoIdentity(percentage);
	};

	if bucket::in_rollout(flag_key, segment.id.as_str(), Some(identity), percentage) {
		Check::Matched
	} else {
		Check::OutOfRollout {
			bucket: bucket::bucket(flag_key, segment.id.as_str(), identity),
			percentage,
		}
	}
}

fn scope_matches(segment: &Segment, context: &EvaluationContext) -> bool {
	match segment.scope_type {
		ScopeType::Global => true,
		scope_type => context.scope_identifier(scope_type) == Some(segment.scope_id.as_str()),
	}
}
