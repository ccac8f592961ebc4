// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Immutable, versioned flag snapshots and the builder that validates raw
//! records into them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FlagsError;
use crate::flag::{Flag, FlagId, FlagType, ScopeType, Segment, SegmentId};
use crate::record::{FlagRecord, RecordKind, RecordSet, RuleRecord, SegmentRecord};
use crate::rule::TargetingRule;

/// A flag together with its active segments in precedence order.
#[derive(Debug, Clone)]
pub struct FlagEntry {
	pub flag: Flag,
	pub segments: Vec<Segment>,
	/// Hex SHA-256 of the records this entry was built from
	pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
	pub flags: usize,
	pub segments: usize,
	pub rules: usize,
}

/// All flag configuration needed to evaluate, frozen at one version.
///
/// Snapshots are never modified once built; a refresh produces a new one.
#[derive(Debug, Clone)]
pub struct Snapshot {
	version: u64,
	fingerprint: String,
	built_at: DateTime<Utc>,
	flags: HashMap<String, Arc<FlagEntry>>,
	counts: SnapshotCounts,
	dropped: DroppedRecords,
}

/// Rejected records grouped by the flag key they belong to.
#[derive(Debug, Clone, Default)]
struct DroppedRecords {
	by_flag: HashMap<String, usize>,
	/// Records whose flag cannot be determined, such as orphan rules
	unowned: usize,
}

impl DroppedRecords {
	fn total(&self) -> usize {
		self.unowned + self.by_flag.values().sum::<usize>()
	}
}

impl Snapshot {
	fn from_entries(
		version: u64,
		flags: HashMap<String, Arc<FlagEntry>>,
		dropped: DroppedRecords,
	) -> Self {
		let mut counts = SnapshotCounts::default();
		for entry in flags.values() {
			counts.flags += 1;
			counts.segments += entry.segments.len();
			counts.rules += entry.segments.iter().map(|s| s.rules.len()).sum::<usize>();
		}

		let mut keys: Vec<&String> = flags.keys().collect();
		keys.sort();
		let mut hasher = Sha256::new();
		for key in keys {
			hasher.update(key.as_bytes());
			hasher.update(b"\0");
			hasher.update(flags[key].fingerprint.as_bytes());
			hasher.update(b"\n");
		}

		Self {
			version,
			fingerprint: hex::encode(hasher.finalize()),
			built_at: Utc::now(),
			flags,
			counts,
			dropped,
		}
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	/// Content hash; equal fingerprints mean identical evaluation behaviour.
	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}

	pub fn built_at(&self) -> DateTime<Utc> {
		self.built_at
	}

	pub fn counts(&self) -> SnapshotCounts {
		self.counts
	}

	/// Number of storage records left out of this snapshot as malformed.
	pub fn dropped_records(&self) -> usize {
		self.dropped.total()
	}

	pub fn get(&self, key: &str) -> Option<&Arc<FlagEntry>> {
		self.flags.get(key)
	}

	/// Flag keys in sorted order.
	pub fn keys(&self) -> Vec<&str> {
		let mut keys: Vec<&str> = self.flags.keys().map(String::as_str).collect();
		keys.sort_unstable();
		keys
	}

	pub fn len(&self) -> usize {
		self.flags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty()
	}

	pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &Arc<FlagEntry>)> {
		self.flags.iter()
	}

	/// Builds a new snapshot in which only `key` is rebuilt from `records`.
	///
	/// Every other flag is shared with `self`. When `records` holds no valid
	/// flag for `key`, the flag is removed.
	pub fn replace_flag(&self, key: &str, records: &RecordSet, version: u64) -> BuildOutput {
		let subset = records.for_flag_key(key).unwrap_or_default();
		let built = SnapshotBuilder::new().build_entries(&subset);

		let mut flags = self.flags.clone();
		flags.remove(key);
		if let Some(entry) = built.entries.into_iter().find(|(k, _)| k == key).map(|(_, e)| e) {
			flags.insert(key.to_string(), entry);
		}

		// Drops outside this flag are kept as they were counted by the last full build.
		let mut dropped = self.dropped.clone();
		dropped.by_flag.remove(key);
		if !built.dropped.is_empty() {
			dropped.by_flag.insert(key.to_string(), built.dropped.len());
		}

		BuildOutput {
			snapshot: Snapshot::from_entries(version, flags, dropped),
			dropped: built.dropped,
		}
	}
}

/// A freshly built snapshot and the records rejected while building it.
#[derive(Debug)]
pub struct BuildOutput {
	pub snapshot: Snapshot,
	pub dropped: Vec<FlagsError>,
}

struct BuiltEntries {
	entries: Vec<(String, Arc<FlagEntry>)>,
	dropped: Vec<FlagsError>,
	attributed: DroppedRecords,
}

/// Validates raw records and assembles them into a [`Snapshot`].
///
/// Invalid records are rejected one at a time and reported in
/// [`BuildOutput::dropped`]; the rest of the snapshot is still built.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder;

impl SnapshotBuilder {
	pub fn new() -> Self {
		Self
	}

	pub fn build(&self, records: &RecordSet, version: u64) -> BuildOutput {
		let built = self.build_entries(records);
		BuildOutput {
			snapshot: Snapshot::from_entries(
				version,
				built.entries.into_iter().collect(),
				built.attributed,
			),
			dropped: built.dropped,
		}
	}

	fn build_entries(&self, records: &RecordSet) -> BuiltEntries {
		let mut dropped = Vec::new();

		let flags = accept_flags(&records.flags, &mut dropped);
		let mut segments = accept_segments(&records.segments, &flags, &mut dropped);
		accept_rules(&records.rules, &mut segments, &mut dropped);

		let mut grouped: HashMap<&str, Vec<AcceptedSegment<'_>>> = HashMap::new();
		for (_, accepted) in segments.accepted {
			let record = accepted.record;
			grouped
				.entry(record.flag_id.as_str())
				.or_default()
				.push(accepted);
		}

		let mut entries = Vec::with_capacity(flags.accepted.len());
		for (flag_id, accepted_flag) in flags.accepted {
			let mut flag_segments = grouped.remove(flag_id).unwrap_or_default();
			let fingerprint = match entry_fingerprint(accepted_flag.record, &mut flag_segments) {
				Ok(fingerprint) => fingerprint,
				Err(e) => {
					dropped.push(FlagsError::malformed(
						RecordKind::Flag,
						flag_id,
						format!("cannot fingerprint records: {e}"),
					));
					continue;
				}
			};

			let mut segments: Vec<Segment> = flag_segments
				.into_iter()
				.map(|mut accepted| {
					accepted
						.segment
						.rules
						.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
					accepted.segment
				})
				.collect();
			segments.sort_by(|a, b| a.precedence_cmp(b));

			let key = accepted_flag.flag.key.clone();
			entries.push((
				key,
				Arc::new(FlagEntry {
					flag: accepted_flag.flag,
					segments,
					fingerprint,
				}),
			));
		}

		let attributed = attribute_drops(records, &dropped);
		BuiltEntries {
			entries,
			dropped,
			attributed,
		}
	}
}

/// Assigns each rejected record to the key of the flag it hangs off.
fn attribute_drops(records: &RecordSet, dropped: &[FlagsError]) -> DroppedRecords {
	let flag_keys: HashMap<&str, &str> = records
		.flags
		.iter()
		.map(|f| (f.id.as_str(), f.key.as_str()))
		.collect();
	let segment_flags: HashMap<&str, &str> = records
		.segments
		.iter()
		.map(|s| (s.id.as_str(), s.flag_id.as_str()))
		.collect();
	let rule_segments: HashMap<&str, &str> = records
		.rules
		.iter()
		.map(|r| (r.id.as_str(), r.segment_id.as_str()))
		.collect();

	let mut counts = DroppedRecords::default();
	for err in dropped {
		let owner = match err {
			FlagsError::MalformedRecord { kind, id, .. } => {
				let flag_id = match kind {
					RecordKind::Flag => Some(id.as_str()),
					RecordKind::Segment => segment_flags.get(id.as_str()).copied(),
					RecordKind::Rule => rule_segments
						.get(id.as_str())
						.and_then(|segment_id| segment_flags.get(segment_id).copied()),
				};
				flag_id.and_then(|flag_id| flag_keys.get(flag_id).copied())
			}
			_ => None,
		};
		match owner {
			Some(key) => *counts.by_flag.entry(key.to_string()).or_default() += 1,
			None => counts.unowned += 1,
		}
	}
	counts
}

struct AcceptedFlag<'r> {
	record: &'r FlagRecord,
	flag: Flag,
}

struct AcceptedFlags<'r> {
	/// Keyed by flag id, in id order
	accepted: Vec<(&'r str, AcceptedFlag<'r>)>,
	/// Flag id to value type, for segment validation
	types: HashMap<&'r str, FlagType>,
	/// Ids of flags that were present but rejected
	rejected: HashSet<&'r str>,
}

struct AcceptedSegment<'r> {
	record: &'r SegmentRecord,
	segment: Segment,
	rule_records: Vec<&'r RuleRecord>,
}

struct AcceptedSegments<'r> {
	accepted: HashMap<&'r str, AcceptedSegment<'r>>,
	/// Ids of segments that are inactive or rejected; their rules are
	/// discarded without further reports
	silenced: HashSet<&'r str>,
}

fn accept_flags<'r>(records: &'r [FlagRecord], dropped: &mut Vec<FlagsError>) -> AcceptedFlags<'r> {
	let mut sorted: Vec<&FlagRecord> = records.iter().collect();
	sorted.sort_by(|a, b| a.id.cmp(&b.id));

	let mut seen_ids = HashSet::new();
	let mut key_owner: HashMap<&str, &str> = HashMap::new();
	let mut accepted = Vec::new();
	let mut types = HashMap::new();
	let mut rejected = HashSet::new();

	for record in sorted {
		if !seen_ids.insert(record.id.as_str()) {
			dropped.push(FlagsError::malformed(RecordKind::Flag, &record.id, "duplicate flag id"));
			continue;
		}

		let flag = match validate_flag(record) {
			Ok(flag) => flag,
			Err(reason) => {
				dropped.push(FlagsError::malformed(RecordKind::Flag, &record.id, reason));
				rejected.insert(record.id.as_str());
				continue;
			}
		};

		if let Some(owner) = key_owner.get(record.key.as_str()) {
			dropped.push(FlagsError::malformed(
				RecordKind::Flag,
				&record.id,
				format!("duplicate key '{}' already used by flag {}", record.key, owner),
			));
			rejected.insert(record.id.as_str());
			continue;
		}

		key_owner.insert(record.key.as_str(), record.id.as_str());
		types.insert(record.id.as_str(), flag.flag_type);
		accepted.push((record.id.as_str(), AcceptedFlag { record, flag }));
	}

	AcceptedFlags {
		accepted,
		types,
		rejected,
	}
}

fn validate_flag(record: &FlagRecord) -> Result<Flag, String> {
	if !Flag::validate_key(&record.key) {
		return Err(format!("invalid key '{}'", record.key));
	}

	let flag_type = FlagType::parse(&record.flag_type)
		.ok_or_else(|| format!("unknown flag type '{}'", record.flag_type))?;

	let default_value = record
		.default_value
		.as_ref()
		.ok_or_else(|| "missing default value".to_string())?;
	let default_value = flag_type
		.coerce(default_value)
		.ok_or_else(|| format!("default value {default_value} is not a valid {flag_type} value"))?;

	Ok(Flag {
		id: FlagId::new(record.id.clone()),
		key: record.key.clone(),
		flag_type,
		is_enabled: record.is_enabled,
		default_value,
		updated_at: record.updated_at,
	})
}

fn accept_segments<'r>(
	records: &'r [SegmentRecord],
	flags: &AcceptedFlags<'r>,
	dropped: &mut Vec<FlagsError>,
) -> AcceptedSegments<'r> {
	let mut sorted: Vec<&SegmentRecord> = records.iter().collect();
	sorted.sort_by(|a, b| a.id.cmp(&b.id));

	let mut seen_ids = HashSet::new();
	let mut accepted = HashMap::new();
	let mut silenced = HashSet::new();

	for record in sorted {
		if !seen_ids.insert(record.id.as_str()) {
			dropped.push(FlagsError::malformed(
				RecordKind::Segment,
				&record.id,
				"duplicate segment id",
			));
			continue;
		}

		let Some(flag_type) = flags.types.get(record.flag_id.as_str()) else {
			if !flags.rejected.contains(record.flag_id.as_str()) {
				dropped.push(FlagsError::malformed(
					RecordKind::Segment,
					&record.id,
					format!("references unknown flag {}", record.flag_id),
				));
			}
			silenced.insert(record.id.as_str());
			continue;
		};

		if !record.is_active {
			silenced.insert(record.id.as_str());
			continue;
		}

		match validate_segment(record, *flag_type) {
			Ok(segment) => {
				accepted.insert(
					record.id.as_str(),
					AcceptedSegment {
						record,
						segment,
						rule_records: Vec::new(),
					},
				);
			}
			Err(reason) => {
				dropped.push(FlagsError::malformed(RecordKind::Segment, &record.id, reason));
				silenced.insert(record.id.as_str());
			}
		}
	}

	AcceptedSegments { accepted, silenced }
}

fn validate_segment(record: &SegmentRecord, flag_type: FlagType) -> Result<Segment, String> {
	let scope_type = ScopeType::parse(&record.scope_type)
		.ok_or_else(|| format!("unknown scope type '{}'", record.scope_type))?;

	let scope_id = match scope_type {
		ScopeType::Global => String::new(),
		_ => match record.scope_id.as_deref().map(str::trim) {
			Some(id) if !id.is_empty() => id.to_string(),
			_ => return Err(format!("{scope_type} segment requires a scope id")),
		},
	};

	if let Some(pct) = record.rollout_percentage {
		if !(0.0..=100.0).contains(&pct) {
			return Err(format!("rollout percentage {pct} outside 0-100"));
		}
	}

	let value = record
		.value
		.as_ref()
		.ok_or_else(|| "missing value".to_string())?;
	let value = flag_type
		.coerce(value)
		.ok_or_else(|| format!("value {value} is not a valid {flag_type} value"))?;

	Ok(Segment {
		id: SegmentId::new(record.id.clone()),
		flag_id: FlagId::new(record.flag_id.clone()),
		scope_type,
		scope_id,
		priority: record.priority,
		value,
		rollout_percentage: record.rollout_percentage,
		created_at: record.created_at,
		rules: Vec::new(),
	})
}

fn accept_rules<'r>(
	records: &'r [RuleRecord],
	segments: &mut AcceptedSegments<'r>,
	dropped: &mut Vec<FlagsError>,
) {
	let mut sorted: Vec<&RuleRecord> = records.iter().collect();
	sorted.sort_by(|a, b| a.id.cmp(&b.id));

	let mut seen_ids = HashSet::new();
	let mut broken: BTreeSet<(&str, &str)> = BTreeSet::new();

	for record in sorted {
		if !seen_ids.insert(record.id.as_str()) {
			dropped.push(FlagsError::malformed(RecordKind::Rule, &record.id, "duplicate rule id"));
			continue;
		}

		let Some(accepted) = segments.accepted.get_mut(record.segment_id.as_str()) else {
			if !segments.silenced.contains(record.segment_id.as_str()) {
				dropped.push(FlagsError::malformed(
					RecordKind::Rule,
					&record.id,
					format!("references unknown segment {}", record.segment_id),
				));
			}
			continue;
		};

		match TargetingRule::compile(record) {
			Ok(rule) => {
				accepted.segment.rules.push(rule);
				accepted.rule_records.push(record);
			}
			Err(reason) => {
				dropped.push(FlagsError::malformed(RecordKind::Rule, &record.id, reason));
				broken.insert((record.segment_id.as_str(), record.id.as_str()));
			}
		}
	}

	// One report per segment, naming the first broken rule.
	let mut reported = HashSet::new();
	for (segment_id, rule_id) in broken {
		if !reported.insert(segment_id) {
			continue;
		}
		segments.accepted.remove(segment_id);
		segments.silenced.insert(segment_id);
		dropped.push(FlagsError::malformed(
			RecordKind::Segment,
			segment_id,
			format!("contains malformed rule {rule_id}"),
		));
	}
}

#[derive(Serialize)]
struct CanonicalEntry<'a> {
	flag: &'a FlagRecord,
	segments: Vec<CanonicalSegment<'a>>,
}

#[derive(Serialize)]
struct CanonicalSegment<'a> {
	segment: &'a SegmentRecord,
	rules: Vec<&'a RuleRecord>,
}

fn entry_fingerprint(
	flag: &FlagRecord,
	segments: &mut [AcceptedSegment<'_>],
) -> serde_json::Result<String> {
	segments.sort_by(|a, b| a.record.id.cmp(&b.record.id));
	let canonical = CanonicalEntry {
		flag,
		segments: segments
			.iter()
			.map(|s| {
				let mut rules = s.rule_records.clone();
				rules.sort_by(|a, b| a.id.cmp(&b.id));
				CanonicalSegment {
					segment: s.record,
					rules,
				}
			})
			.collect(),
	};

	let mut hasher = Sha256::new();
	serde_json::to_writer(&mut hasher, &canonical)?;
	Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use serde_json::json;

	fn flag(id: &str, key: &str) -> FlagRecord {
		FlagRecord {
			id: id.to_string(),
			key: key.to_string(),
			flag_type: "boolean".to_string(),
			is_enabled: true,
			default_value: Some(json!(false)),
			updated_at: None,
		}
	}

	fn segment(id: &str, flag_id: &str, priority: i64) -> SegmentRecord {
		SegmentRecord {
			id: id.to_string(),
			flag_id: flag_id.to_string(),
			scope_type: "GLOBAL".to_string(),
			scope_id: None,
			priority,
			is_active: true,
			value: Some(json!(true)),
			rollout_percentage: None,
			created_at: None,
		}
	}

	fn rule(id: &str, segment_id: &str, order: i64) -> RuleRecord {
		RuleRecord {
			id: id.to_string(),
			segment_id: segment_id.to_string(),
			attribute: "plan".to_string(),
			operator: "EQUALS".to_string(),
			value: Some(json!("pro")),
			values: None,
			order,
		}
	}

	fn build(records: &RecordSet) -> BuildOutput {
		SnapshotBuilder::new().build(records, 1)
	}

	fn is_malformed(err: &FlagsError, kind: RecordKind, id: &str) -> bool {
		matches!(err, FlagsError::MalformedRecord { kind: k, id: i, .. } if *k == kind && i == id)
	}

	#[test]
	fn test_build_valid_snapshot() {
		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![segment("s1", "f1", 1), segment("s2", "f1", 10)],
			rules: vec![rule("r2", "s1", 1), rule("r1", "s1", 1), rule("r0", "s1", 2)],
		};
		let out = build(&records);
		assert!(out.dropped.is_empty(), "{:?}", out.dropped);

		let snapshot = out.snapshot;
		assert_eq!(snapshot.version(), 1);
		assert_eq!(
			snapshot.counts(),
			SnapshotCounts {
				flags: 1,
				segments: 2,
				rules: 3
			}
		);

		let entry = snapshot.get("dark-mode").unwrap();
		assert_eq!(entry.segments[0].id.as_str(), "s2");
		let rule_ids: Vec<&str> = entry.segments[1].rules.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(rule_ids, vec!["r1", "r2", "r0"]);
	}

	#[test]
	fn test_orphan_rule_dropped_alone() {
		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![segment("s1", "f1", 1)],
			rules: vec![rule("r1", "s1", 0), rule("r-orphan", "missing", 0)],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 1);
		assert!(is_malformed(&out.dropped[0], RecordKind::Rule, "r-orphan"));
		assert_eq!(out.snapshot.get("dark-mode").unwrap().segments[0].rules.len(), 1);
	}

	#[test]
	fn test_malformed_rule_drops_segment() {
		let mut bad = rule("r-bad", "s1", 1);
		bad.operator = "SOUNDS_LIKE".to_string();
		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![segment("s1", "f1", 1), segment("s2", "f1", 0)],
			rules: vec![rule("r1", "s1", 0), bad],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 2);
		assert!(is_malformed(&out.dropped[0], RecordKind::Rule, "r-bad"));
		assert!(is_malformed(&out.dropped[1], RecordKind::Segment, "s1"));

		let entry = out.snapshot.get("dark-mode").unwrap();
		assert_eq!(entry.segments.len(), 1);
		assert_eq!(entry.segments[0].id.as_str(), "s2");
		assert_eq!(out.snapshot.counts().rules, 0);
	}

	#[test]
	fn test_orphan_segment_dropped() {
		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![segment("s1", "f-missing", 1)],
			rules: vec![rule("r1", "s1", 0)],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 1);
		assert!(is_malformed(&out.dropped[0], RecordKind::Segment, "s1"));
		assert!(out.snapshot.get("dark-mode").unwrap().segments.is_empty());
	}

	#[test]
	fn test_inactive_segments_excluded_silently() {
		let mut inactive = segment("s1", "f1", 1);
		inactive.is_active = false;
		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![inactive],
			rules: vec![rule("r1", "s1", 0)],
		};
		let out = build(&records);
		assert!(out.dropped.is_empty());
		assert_eq!(out.snapshot.counts().segments, 0);
	}

	#[test]
	fn test_invalid_flags_dropped() {
		let mut bad_type = flag("f2", "bad-type");
		bad_type.flag_type = "experiment".to_string();
		let mut bad_default = flag("f3", "bad-default");
		bad_default.default_value = Some(json!("yes"));
		let mut missing_default = flag("f4", "missing-default");
		missing_default.default_value = None;

		let records = RecordSet {
			flags: vec![
				flag("f1", "good"),
				bad_type,
				bad_default,
				missing_default,
				flag("f5", "has space"),
			],
			segments: vec![segment("s3", "f3", 1)],
			rules: vec![],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 4);
		assert_eq!(out.snapshot.keys(), vec!["good"]);
	}

	#[test]
	fn test_duplicate_key_keeps_smallest_id() {
		let records = RecordSet {
			flags: vec![flag("f9", "dark-mode"), flag("f1", "dark-mode")],
			segments: vec![],
			rules: vec![],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 1);
		assert!(is_malformed(&out.dropped[0], RecordKind::Flag, "f9"));
		assert_eq!(out.snapshot.get("dark-mode").unwrap().flag.id.as_str(), "f1");
	}

	#[test]
	fn test_invalid_segments_dropped() {
		let mut unknown_scope = segment("s1", "f1", 1);
		unknown_scope.scope_type = "ORG".to_string();
		let mut no_scope_id = segment("s2", "f1", 1);
		no_scope_id.scope_type = "TENANT".to_string();
		let mut bad_rollout = segment("s3", "f1", 1);
		bad_rollout.rollout_percentage = Some(150.0);
		let mut bad_value = segment("s4", "f1", 1);
		bad_value.value = Some(json!(1));

		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![
				unknown_scope,
				no_scope_id,
				bad_rollout,
				bad_value,
				segment("s4", "f1", 1),
			],
			rules: vec![],
		};
		let out = build(&records);
		assert_eq!(out.dropped.len(), 5);
		assert_eq!(out.snapshot.counts().segments, 0);
	}

	#[test]
	fn test_multivariate_values() {
		let mut mv = flag("f1", "checkout-theme");
		mv.flag_type = "multivariate".to_string();
		mv.default_value = Some(json!("classic"));
		let mut seg = segment("s1", "f1", 1);
		seg.value = Some(json!({"theme": "dark"}));

		let records = RecordSet {
			flags: vec![mv],
			segments: vec![seg],
			rules: vec![],
		};
		let out = build(&records);
		assert!(out.dropped.is_empty());
		let entry = out.snapshot.get("checkout-theme").unwrap();
		assert_eq!(entry.flag.default_value.as_str(), Some("classic"));
		assert!(entry.segments[0].value.as_json().is_some());
	}

	#[test]
	fn test_precedence_uses_created_at() {
		let mut older = segment("s-b", "f1", 1);
		older.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
		let mut newer = segment("s-a", "f1", 1);
		newer.created_at = Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

		let records = RecordSet {
			flags: vec![flag("f1", "dark-mode")],
			segments: vec![newer, older],
			rules: vec![],
		};
		let out = build(&records);
		let entry = out.snapshot.get("dark-mode").unwrap();
		assert_eq!(entry.segments[0].id.as_str(), "s-b");
	}

	#[test]
	fn test_fingerprint_ignores_record_order() {
		let a = RecordSet {
			flags: vec![flag("f1", "a"), flag("f2", "b")],
			segments: vec![segment("s1", "f1", 1), segment("s2", "f1", 2)],
			rules: vec![rule("r1", "s1", 0), rule("r2", "s1", 1)],
		};
		let b = RecordSet {
			flags: vec![flag("f2", "b"), flag("f1", "a")],
			segments: vec![segment("s2", "f1", 2), segment("s1", "f1", 1)],
			rules: vec![rule("r2", "s1", 1), rule("r1", "s1", 0)],
		};
		assert_eq!(
			build(&a).snapshot.fingerprint(),
			build(&b).snapshot.fingerprint()
		);

		let mut c = a.clone();
		c.segments[0].priority = 99;
		assert_ne!(
			build(&a).snapshot.fingerprint(),
			build(&c).snapshot.fingerprint()
		);
	}

	#[test]
	fn test_fingerprint_ignores_inactive_and_dropped_records() {
		let base = RecordSet {
			flags: vec![flag("f1", "a")],
			segments: vec![segment("s1", "f1", 1)],
			rules: vec![],
		};
		let mut noisy = base.clone();
		let mut inactive = segment("s2", "f1", 5);
		inactive.is_active = false;
		noisy.segments.push(inactive);
		noisy.rules.push(rule("r-orphan", "nope", 0));

		assert_eq!(
			build(&base).snapshot.fingerprint(),
			build(&noisy).snapshot.fingerprint()
		);
	}

	#[test]
	fn test_replace_flag_shares_other_entries() {
		let records = RecordSet {
			flags: vec![flag("f1", "a"), flag("f2", "b")],
			segments: vec![segment("s1", "f1", 1)],
			rules: vec![],
		};
		let first = build(&records).snapshot;

		let mut updated = records.clone();
		updated.segments[0].priority = 7;
		let out = first.replace_flag("a", &updated, 2);
		let second = out.snapshot;

		assert_eq!(second.version(), 2);
		assert!(Arc::ptr_eq(
			first.get("b").unwrap(),
			second.get("b").unwrap()
		));
		assert_eq!(second.get("a").unwrap().segments[0].priority, 7);
		assert_eq!(
			second.fingerprint(),
			build(&updated).snapshot.fingerprint()
		);
	}

	#[test]
	fn test_replace_flag_removes_deleted_flag() {
		let records = RecordSet {
			flags: vec![flag("f1", "a"), flag("f2", "b")],
			segments: vec![],
			rules: vec![],
		};
		let first = build(&records).snapshot;
		let out = first.replace_flag("a", &RecordSet::new(), 2);
		assert_eq!(out.snapshot.keys(), vec!["b"]);
		assert_eq!(out.snapshot.counts().flags, 1);
	}

	#[test]
	fn test_replace_flag_keeps_drops_of_other_flags() {
		let mut bad_a = segment("s-a-bad", "f1", 2);
		bad_a.scope_type = "PLANET".to_string();
		let mut bad_b = segment("s-b-bad", "f2", 2);
		bad_b.scope_type = "PLANET".to_string();
		let records = RecordSet {
			flags: vec![flag("f1", "a"), flag("f2", "b")],
			segments: vec![segment("s1", "f1", 1), bad_a, bad_b],
			rules: vec![rule("r-orphan", "nowhere", 0)],
		};
		let first = build(&records).snapshot;
		assert_eq!(first.dropped_records(), 3);

		let mut fixed = records.clone();
		fixed.segments[1].scope_type = "GLOBAL".to_string();
		let out = first.replace_flag("a", &fixed, 2);
		assert!(out.dropped.is_empty());
		assert_eq!(out.snapshot.dropped_records(), 2);

		let out = out.snapshot.replace_flag("a", &records, 3);
		assert_eq!(out.dropped.len(), 1);
		assert_eq!(out.snapshot.dropped_records(), 3);
	}

	#[test]
	fn test_replace_flag_of_deleted_flag_forgets_its_drops() {
		let mut bad = segment("s-bad", "f1", 2);
		bad.scope_type = "PLANET".to_string();
		let records = RecordSet {
			flags: vec![flag("f1", "a"), flag("f2", "b")],
			segments: vec![bad],
			rules: vec![],
		};
		let first = build(&records).snapshot;
		assert_eq!(first.dropped_records(), 1);

		let out = first.replace_flag("a", &RecordSet::new(), 2);
		assert_eq!(out.snapshot.dropped_records(), 0);
	}

	#[test]
	fn test_entry_fingerprints_follow_record_content() {
		let on = RecordSet {
			flags: vec![flag("f1", "a")],
			segments: vec![],
			rules: vec![],
		};
		let mut off = on.clone();
		off.flags[0].is_enabled = false;

		let on = build(&on).snapshot;
		let off = build(&off).snapshot;
		let empty = hex::encode(Sha256::digest(b""));
		let on_fp = &on.get("a").unwrap().fingerprint;
		let off_fp = &off.get("a").unwrap().fingerprint;
		assert_ne!(on_fp, &empty);
		assert_ne!(off_fp, &empty);
		assert_ne!(on_fp, off_fp);
	}
}

#[cfg(test)]
mod proptest_tests {
	use super::*;
	use proptest::prelude::*;

	fn records(rollout: f64, priorities: &[i64]) -> RecordSet {
		RecordSet {
			flags: vec![FlagRecord {
				id: "f1".to_string(),
				key: "new-checkout".to_string(),
				flag_type: "percentage".to_string(),
				is_enabled: true,
				default_value: Some(serde_json::json!(false)),
				updated_at: None,
			}],
			segments: priorities
				.iter()
				.enumerate()
				.map(|(i, p)| SegmentRecord {
					id: format!("seg-{i}"),
					flag_id: "f1".to_string(),
					scope_type: "GLOBAL".to_string(),
					scope_id: None,
					priority: *p,
					is_active: true,
					value: Some(serde_json::json!(true)),
					rollout_percentage: Some(rollout),
					created_at: None,
				})
				.collect(),
			rules: vec![],
		}
	}

	proptest! {
		#[test]
		fn segments_are_stored_in_precedence_order(priorities in proptest::collection::vec(-50i64..50, 0..12)) {
			let out = SnapshotBuilder::new().build(&records(100.0, &priorities), 1);
			let entry = out.snapshot.get("new-checkout").unwrap();
			for pair in entry.segments.windows(2) {
				prop_assert!(pair[0].precedence_cmp(&pair[1]) != std::cmp::Ordering::Greater);
			}
		}

		#[test]
		fn rebuild_is_deterministic(priorities in proptest::collection::vec(-50i64..50, 0..6), rollout in 0.0f64..=100.0) {
			let set = records(rollout, &priorities);
			let a = SnapshotBuilder::new().build(&set, 1).snapshot;
			let b = SnapshotBuilder::new().build(&set, 2).snapshot;
			prop_assert_eq!(a.fingerprint(), b.fingerprint());
		}
	}
}
