// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::TargetingRule;

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub String);

		impl $name {
			pub fn new(id: impl Into<String>) -> Self {
				Self(id.into())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<&str> for $name {
			fn from(s: &str) -> Self {
				Self(s.to_string())
			}
		}
	};
}

string_id!(
	/// Opaque, stable identifier of a feature flag.
	FlagId
);
string_id!(
	/// Opaque, stable identifier of an override segment.
	SegmentId
);
string_id!(
	/// Opaque, stable identifier of a targeting rule.
	RuleId
);

/// The kind of value a flag produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
	Boolean,
	Multivariate,
	/// Boolean flag intended for gradual rollout through segment percentages.
	Percentage,
}

impl FlagType {
	pub fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"boolean" => Some(FlagType::Boolean),
			"multivariate" => Some(FlagType::Multivariate),
			"percentage" => Some(FlagType::Percentage),
			_ => None,
		}
	}

	/// Converts a stored JSON value into a value of this type.
	///
	/// Returns `None` when the value does not fit the type.
	pub fn coerce(&self, value: &serde_json::Value) -> Option<FlagValue> {
		match self {
			FlagType::Boolean | FlagType::Percentage => value.as_bool().map(FlagValue::Boolean),
			FlagType::Multivariate => match value {
				serde_json::Value::Null => None,
				serde_json::Value::String(s) => Some(FlagValue::String(s.clone())),
				other => Some(FlagValue::Json(other.clone())),
			},
		}
	}
}

impl std::fmt::Display for FlagType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FlagType::Boolean => write!(f, "boolean"),
			FlagType::Multivariate => write!(f, "multivariate"),
			FlagType::Percentage => write!(f, "percentage"),
		}
	}
}

/// The value a flag evaluates to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum FlagValue {
	Boolean(bool),
	String(String),
	Json(serde_json::Value),
}

impl FlagValue {
	/// Returns the value as a boolean if it is one.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Boolean(b) => Some(*b),
			_ => None,
		}
	}

	/// Returns the value as a string if it is one.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Returns the value as JSON.
	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			FlagValue::Json(v) => Some(v),
			_ => None,
		}
	}
}

/// The dimension an override segment applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
	Global,
	Environment,
	Tenant,
	User,
	Custom,
}

impl ScopeType {
	pub fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_uppercase().as_str() {
			"GLOBAL" => Some(ScopeType::Global),
			"ENVIRONMENT" => Some(ScopeType::Environment),
			"TENANT" => Some(ScopeType::Tenant),
			"USER" => Some(ScopeType::User),
			"CUSTOM" => Some(ScopeType::Custom),
			_ => None,
		}
	}

	/// Tiebreak rank among equal priorities: USER > TENANT > ENVIRONMENT > CUSTOM > GLOBAL.
	pub fn specificity(&self) -> u8 {
		match self {
			ScopeType::User => 4,
			ScopeType::Tenant => 3,
			ScopeType::Environment => 2,
			ScopeType::Custom => 1,
			ScopeType::Global => 0,
		}
	}
}

impl std::fmt::Display for ScopeType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ScopeType::Global => write!(f, "GLOBAL"),
			ScopeType::Environment => write!(f, "ENVIRONMENT"),
			ScopeType::Tenant => write!(f, "TENANT"),
			ScopeType::User => write!(f, "USER"),
			ScopeType::Custom => write!(f, "CUSTOM"),
		}
	}
}

/// A validated feature flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
	pub id: FlagId,
	/// Lookup key, unique within a snapshot
	pub key: String,
	pub flag_type: FlagType,
	/// Global kill switch; false forces the default value
	pub is_enabled: bool,
	pub default_value: FlagValue,
	pub updated_at: Option<DateTime<Utc>>,
}

impl Flag {
	pub const MAX_KEY_LEN: usize = 200;

	/// Validates the flag key format.
	///
	/// Keys are 1-200 characters with no whitespace or control characters.
	pub fn validate_key(key: &str) -> bool {
		!key.is_empty()
			&& key.len() <= Self::MAX_KEY_LEN
			&& !key.chars().any(|c| c.is_whitespace() || c.is_control())
	}
}

/// A validated, active override segment with its rules in evaluation order.
#[derive(Debug, Clone)]
pub struct Segment {
	pub id: SegmentId,
	pub flag_id: FlagId,
	pub scope_type: ScopeType,
	/// Empty for GLOBAL segments
	pub scope_id: String,
	pub priority: i64,
	pub value: FlagValue,
	/// 0-100; None means full rollout
	pub rollout_percentage: Option<f64>,
	pub created_at: Option<DateTime<Utc>>,
	/// All must pass (AND), sorted by order then id
	pub rules: Vec<TargetingRule>,
}

impl Segment {
	/// Effective rollout percentage, treating absent as 100.
	pub fn effective_rollout(&self) -> f64 {
		self.rollout_percentage.unwrap_or(100.0)
	}

	/// Total precedence order; `Ordering::Less` means `self` wins over `other`.
	///
	/// Higher priority first, then scope specificity, then earliest creation
	/// (segments without a creation time sort last), then segment id.
	pub fn precedence_cmp(&self, other: &Segment) -> Ordering {
		other
			.priority
			.cmp(&self.priority)
			.then_with(|| {
				other
					.scope_type
					.specificity()
					.cmp(&self.scope_type.specificity())
			})
			.then_with(|| match (self.created_at, other.created_at) {
				(Some(a), Some(b)) => a.cmp(&b),
				(Some(_), None) => Ordering::Less,
				(None, Some(_)) => Ordering::Greater,
				(None, None) => Ordering::Equal,
			})
			.then_with(|| self.id.cmp(&other.id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn segment(id: &str, priority: i64, scope_type: ScopeType) -> Segment {
		Segment {
			id: SegmentId::new(id),
			flag_id: FlagId::new("flag-1"),
			scope_type,
			scope_id: String::new(),
			priority,
			value: FlagValue::Boolean(true),
			rollout_percentage: None,
			created_at: None,
			rules: vec![],
		}
	}

	#[test]
	fn test_validate_key() {
		assert!(Flag::validate_key("new-checkout"));
		assert!(Flag::validate_key("dark-mode"));
		assert!(Flag::validate_key("billing.annual_plan"));
		assert!(!Flag::validate_key(""));
		assert!(!Flag::validate_key("dark mode"));
		assert!(!Flag::validate_key("tab\tkey"));
		assert!(!Flag::validate_key(&"a".repeat(201)));
	}

	#[test]
	fn test_flag_type_coerce() {
		let bool_type = FlagType::Boolean;
		assert_eq!(
			bool_type.coerce(&serde_json::json!(true)),
			Some(FlagValue::Boolean(true))
		);
		assert_eq!(bool_type.coerce(&serde_json::json!("true")), None);
		assert_eq!(
			FlagType::Percentage.coerce(&serde_json::json!(false)),
			Some(FlagValue::Boolean(false))
		);

		let multi = FlagType::Multivariate;
		assert_eq!(
			multi.coerce(&serde_json::json!("variant_b")),
			Some(FlagValue::String("variant_b".to_string()))
		);
		assert_eq!(
			multi.coerce(&serde_json::json!({"color": "red"})),
			Some(FlagValue::Json(serde_json::json!({"color": "red"})))
		);
		assert_eq!(multi.coerce(&serde_json::Value::Null), None);
	}

	#[test]
	fn test_parse_enums_case_insensitive() {
		assert_eq!(FlagType::parse("Boolean"), Some(FlagType::Boolean));
		assert_eq!(FlagType::parse("experiment"), None);
		assert_eq!(ScopeType::parse("tenant"), Some(ScopeType::Tenant));
		assert_eq!(ScopeType::parse(" USER "), Some(ScopeType::User));
		assert_eq!(ScopeType::parse("ORG"), None);
	}

	#[test]
	fn test_specificity_order() {
		assert!(ScopeType::User.specificity() > ScopeType::Tenant.specificity());
		assert!(ScopeType::Tenant.specificity() > ScopeType::Environment.specificity());
		assert!(ScopeType::Environment.specificity() > ScopeType::Custom.specificity());
		assert!(ScopeType::Custom.specificity() > ScopeType::Global.specificity());
	}

	#[test]
	fn test_precedence_priority_first() {
		let low = segment("a", 5, ScopeType::User);
		let high = segment("b", 10, ScopeType::Global);
		assert_eq!(high.precedence_cmp(&low), Ordering::Less);
		assert_eq!(low.precedence_cmp(&high), Ordering::Greater);
	}

	#[test]
	fn test_precedence_specificity_then_creation_then_id() {
		let user = segment("z", 1, ScopeType::User);
		let global = segment("a", 1, ScopeType::Global);
		assert_eq!(user.precedence_cmp(&global), Ordering::Less);

		let mut older = segment("z", 1, ScopeType::Tenant);
		older.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
		let mut newer = segment("a", 1, ScopeType::Tenant);
		newer.created_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
		assert_eq!(older.precedence_cmp(&newer), Ordering::Less);

		let undated = segment("0", 1, ScopeType::Tenant);
		assert_eq!(newer.precedence_cmp(&undated), Ordering::Less);

		let first = segment("seg-a", 1, ScopeType::Tenant);
		let second = segment("seg-b", 1, ScopeType::Tenant);
		assert_eq!(first.precedence_cmp(&second), Ordering::Less);
	}

	#[test]
	fn test_flag_value_accessors() {
		let bool_val = FlagValue::Boolean(true);
		assert_eq!(bool_val.as_bool(), Some(true));
		assert_eq!(bool_val.as_str(), None);

		let str_val = FlagValue::String("blue".to_string());
		assert_eq!(str_val.as_str(), Some("blue"));
		assert_eq!(str_val.as_json(), None);

		let json_val = FlagValue::Json(serde_json::json!([1, 2]));
		assert!(json_val.as_json().is_some());
	}
}
