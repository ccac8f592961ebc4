// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_flags_core::{FlagRecord, RecordSet, RuleRecord, SegmentRecord};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{instrument, warn};

use crate::error::Result;
use crate::store::FlagStore;

const SCHEMA: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS flags (
		id TEXT PRIMARY KEY,
		key TEXT NOT NULL,
		flag_type TEXT NOT NULL,
		is_enabled INTEGER NOT NULL DEFAULT 0,
		default_value TEXT,
		updated_at TEXT
	)
	"#,
	r#"CREATE INDEX IF NOT EXISTS idx_flags_key ON flags (key)"#,
	r#"
	CREATE TABLE IF NOT EXISTS flag_segments (
		id TEXT PRIMARY KEY,
		flag_id TEXT NOT NULL,
		scope_type TEXT NOT NULL,
		scope_id TEXT,
		priority INTEGER NOT NULL DEFAULT 0,
		is_active INTEGER NOT NULL DEFAULT 1,
		value TEXT,
		rollout_percentage REAL,
		created_at TEXT
	)
	"#,
	r#"CREATE INDEX IF NOT EXISTS idx_flag_segments_flag_id ON flag_segments (flag_id)"#,
	r#"
	CREATE TABLE IF NOT EXISTS flag_rules (
		id TEXT PRIMARY KEY,
		segment_id TEXT NOT NULL,
		attribute TEXT NOT NULL,
		operator TEXT NOT NULL,
		value TEXT,
		value_list TEXT,
		rule_order INTEGER NOT NULL DEFAULT 0
	)
	"#,
	r#"CREATE INDEX IF NOT EXISTS idx_flag_rules_segment_id ON flag_rules (segment_id)"#,
];

/// [`FlagStore`] backed by SQLite.
///
/// Referential integrity is not enforced here; the snapshot
/// builder validates every cross reference.
#[derive(Debug, Clone)]
pub struct SqliteFlagStore {
	pool: SqlitePool,
}

impl SqliteFlagStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Creates the flag tables if they do not exist yet.
	#[instrument(skip(self))]
	pub async fn ensure_schema(&self) -> Result<()> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		Ok(())
	}

	/// Writes records, replacing any existing rows with the same ids.
	#[instrument(skip(self, records), fields(record_count = records.len()))]
	pub async fn upsert_records(&self, records: &RecordSet) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		for flag in &records.flags {
			upsert_flag(&mut tx, flag).await?;
		}
		for segment in &records.segments {
			upsert_segment(&mut tx, segment).await?;
		}
		for rule in &records.rules {
			upsert_rule(&mut tx, rule).await?;
		}
		tx.commit().await?;
		Ok(())
	}

	/// Deletes a flag row. Its segments and rules are left behind as orphans.
	#[instrument(skip(self))]
	pub async fn delete_flag(&self, id: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM flags WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
	#[instrument(skip(self))]
	async fn fetch_all(&self) -> Result<RecordSet> {
		let mut tx = self.pool.begin().await?;

		let flags = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, key, flag_type, is_enabled, default_value, updated_at
			FROM flags
			"#,
		)
		.fetch_all(&mut *tx)
		.await?;

		let segments = sqlx::query_as::<_, SegmentRow>(
			r#"
			SELECT id, flag_id, scope_type, scope_id, priority, is_active, value,
				   rollout_percentage, created_at
			FROM flag_segments
			"#,
		)
		.fetch_all(&mut *tx)
		.await?;

		let rules = sqlx::query_as::<_, RuleRow>(
			r#"
			SELECT id, segment_id, attribute, operator, value, value_list, rule_order
			FROM flag_rules
			"#,
		)
		.fetch_all(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(RecordSet {
			flags: flags.into_iter().map(Into::into).collect(),
			segments: segments.into_iter().map(Into::into).collect(),
			rules: rules.into_iter().map(Into::into).collect(),
		})
	}

	#[instrument(skip(self), fields(flag_key = %key))]
	async fn fetch_flag(&self, key: &str) -> Result<Option<RecordSet>> {
		let mut tx = self.pool.begin().await?;

		let flags = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, key, flag_type, is_enabled, default_value, updated_at
			FROM flags
			WHERE key = ?
			"#,
		)
		.bind(key)
		.fetch_all(&mut *tx)
		.await?;

		if flags.is_empty() {
			tx.commit().await?;
			return Ok(None);
		}

		let segments = sqlx::query_as::<_, SegmentRow>(
			r#"
			SELECT id, flag_id, scope_type, scope_id, priority, is_active, value,
				   rollout_percentage, created_at
			FROM flag_segments
			WHERE flag_id IN (SELECT id FROM flags WHERE key = ?)
			"#,
		)
		.bind(key)
		.fetch_all(&mut *tx)
		.await?;

		let rules = sqlx::query_as::<_, RuleRow>(
			r#"
			SELECT id, segment_id, attribute, operator, value, value_list, rule_order
			FROM flag_rules
			WHERE segment_id IN (
				SELECT s.id FROM flag_segments s
				JOIN flags f ON f.id = s.flag_id
				WHERE f.key = ?
			)
			"#,
		)
		.bind(key)
		.fetch_all(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(Some(RecordSet {
			flags: flags.into_iter().map(Into::into).collect(),
			segments: segments.into_iter().map(Into::into).collect(),
			rules: rules.into_iter().map(Into::into).collect(),
		}))
	}
}

async fn upsert_flag(tx: &mut Transaction<'_, Sqlite>, flag: &FlagRecord) -> Result<()> {
	sqlx::query(
		r#"
		INSERT OR REPLACE INTO flags (id, key, flag_type, is_enabled, default_value, updated_at)
		VALUES (?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(&flag.id)
	.bind(&flag.key)
	.bind(&flag.flag_type)
	.bind(flag.is_enabled)
	.bind(encode_json(flag.default_value.as_ref())?)
	.bind(flag.updated_at.map(|t| t.to_rfc3339()))
	.execute(&mut **tx)
	.await?;
	Ok(())
}

async fn upsert_segment(tx: &mut Transaction<'_, Sqlite>, segment: &SegmentRecord) -> Result<()> {
	sqlx::query(
		r#"
		INSERT OR REPLACE INTO flag_segments
			(id, flag_id, scope_type, scope_id, priority, is_active, value, rollout_percentage, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(&segment.id)
	.bind(&segment.flag_id)
	.bind(&segment.scope_type)
	.bind(&segment.scope_id)
	.bind(segment.priority)
	.bind(segment.is_active)
	.bind(encode_json(segment.value.as_ref())?)
	.bind(segment.rollout_percentage)
	.bind(segment.created_at.map(|t| t.to_rfc3339()))
	.execute(&mut **tx)
	.await?;
	Ok(())
}

async fn upsert_rule(tx: &mut Transaction<'_, Sqlite>, rule: &RuleRecord) -> Result<()> {
	let value_list = match &rule.values {
		Some(values) => Some(serde_json::to_string(values)?),
		None => None,
	};

	sqlx::query(
		r#"
		INSERT OR REPLACE INTO flag_rules
			(id, segment_id, attribute, operator, value, value_list, rule_order)
		VALUES (?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(&rule.id)
	.bind(&rule.segment_id)
	.bind(&rule.attribute)
	.bind(&rule.operator)
	.bind(encode_json(rule.value.as_ref())?)
	.bind(value_list)
	.bind(rule.order)
	.execute(&mut **tx)
	.await?;
	Ok(())
}

fn encode_json(value: Option<&serde_json::Value>) -> Result<Option<String>> {
	Ok(value.map(serde_json::to_string).transpose()?)
}

/// Unparseable JSON becomes `None`; the snapshot builder then rejects the
/// record with a specific reason.
fn decode_json(table: &str, id: &str, column: &str, raw: Option<String>) -> Option<serde_json::Value> {
	let raw = raw?;
	match serde_json::from_str(&raw) {
		Ok(value) => Some(value),
		Err(e) => {
			warn!(table, id, column, error = %e, "ignoring unparseable JSON column");
			None
		}
	}
}

fn decode_timestamp(table: &str, id: &str, column: &str, raw: Option<String>) -> Option<DateTime<Utc>> {
	let raw = raw?;
	match DateTime::parse_from_rfc3339(&raw) {
		Ok(dt) => Some(dt.with_timezone(&Utc)),
		Err(e) => {
			warn!(table, id, column, error = %e, "ignoring unparseable timestamp column");
			None
		}
	}
}

#[derive(sqlx::FromRow)]
struct FlagRow {
	id: String,
	key: String,
	flag_type: String,
	is_enabled: bool,
	default_value: Option<String>,
	updated_at: Option<String>,
}

impl From<FlagRow> for FlagRecord {
	fn from(row: FlagRow) -> Self {
		let default_value = decode_json("flags", &row.id, "default_value", row.default_value);
		let updated_at = decode_timestamp("flags", &row.id, "updated_at", row.updated_at);
		FlagRecord {
			id: row.id,
			key: row.key,
			flag_type: row.flag_type,
			is_enabled: row.is_enabled,
			default_value,
			updated_at,
		}
	}
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
	id: String,
	flag_id: String,
	scope_type: String,
	scope_id: Option<String>,
	priority: i64,
	is_active: bool,
	value: Option<String>,
	rollout_percentage: Option<f64>,
	created_at: Option<String>,
}

impl From<SegmentRow> for SegmentRecord {
	fn from(row: SegmentRow) -> Self {
		let value = decode_json("flag_segments", &row.id, "value", row.value);
		let created_at = decode_timestamp("flag_segments", &row.id, "created_at", row.created_at);
		SegmentRecord {
			id: row.id,
			flag_id: row.flag_id,
			scope_type: row.scope_type,
			scope_id: row.scope_id,
			priority: row.priority,
			is_active: row.is_active,
			value,
			rollout_percentage: row.rollout_percentage,
			created_at,
		}
	}
}

#[derive(sqlx::FromRow)]
struct RuleRow {
	id: String,
	segment_id: String,
	attribute: String,
	operator: String,
	value: Option<String>,
	value_list: Option<String>,
	rule_order: i64,
}

impl From<RuleRow> for RuleRecord {
	fn from(row: RuleRow) -> Self {
		let value = decode_json("flag_rules", &row.id, "value", row.value);
		let values = match decode_json("flag_rules", &row.id, "value_list", row.value_list) {
			Some(serde_json::Value::Array(items)) => Some(items),
			Some(_) => {
				warn!(table = "flag_rules", id = %row.id, "value_list is not a JSON array");
				None
			}
			None => None,
		};
		RuleRecord {
			id: row.id,
			segment_id: row.segment_id,
			attribute: row.attribute,
			operator: row.operator,
			value,
			values,
			order: row.rule_order,
		}
	}
}
