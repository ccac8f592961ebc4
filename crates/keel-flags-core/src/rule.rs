// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Targeting rules and the matcher that evaluates them against a context.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::{AttributeRef, EvaluationContext};
use crate::flag::RuleId;
use crate::record::RuleRecord;

/// Comparison operators for targeting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleOperator {
	Equals,
	NotEquals,
	In,
	NotIn,
	GreaterThan,
	LessThan,
	Contains,
	Regex,
	Exists,
}

impl RuleOperator {
	pub fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_uppercase().as_str() {
			"EQUALS" => Some(RuleOperator::Equals),
			"NOT_EQUALS" => Some(RuleOperator::NotEquals),
			"IN" => Some(RuleOperator::In),
			"NOT_IN" => Some(RuleOperator::NotIn),
			"GREATER_THAN" => Some(RuleOperator::GreaterThan),
			"LESS_THAN" => Some(RuleOperator::LessThan),
			"CONTAINS" => Some(RuleOperator::Contains),
			"REGEX" => Some(RuleOperator::Regex),
			"EXISTS" => Some(RuleOperator::Exists),
			_ => None,
		}
	}
}

impl std::fmt::Display for RuleOperator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			RuleOperator::Equals => "EQUALS",
			RuleOperator::NotEquals => "NOT_EQUALS",
			RuleOperator::In => "IN",
			RuleOperator::NotIn => "NOT_IN",
			RuleOperator::GreaterThan => "GREATER_THAN",
			RuleOperator::LessThan => "LESS_THAN",
			RuleOperator::Contains => "CONTAINS",
			RuleOperator::Regex => "REGEX",
			RuleOperator::Exists => "EXISTS",
		};
		write!(f, "{s}")
	}
}

/// An operator with its operand already validated and, for REGEX, compiled.
#[derive(Debug, Clone)]
pub enum Predicate {
	Equals(serde_json::Value),
	NotEquals(serde_json::Value),
	In(Vec<serde_json::Value>),
	NotIn(Vec<serde_json::Value>),
	GreaterThan(f64),
	LessThan(f64),
	Contains(serde_json::Value),
	Regex(Regex),
	Exists,
}

impl Predicate {
	pub fn operator(&self) -> RuleOperator {
		match self {
			Predicate::Equals(_) => RuleOperator::Equals,
			Predicate::NotEquals(_) => RuleOperator::NotEquals,
			Predicate::In(_) => RuleOperator::In,
			Predicate::NotIn(_) => RuleOperator::NotIn,
			Predicate::GreaterThan(_) => RuleOperator::GreaterThan,
			Predicate::LessThan(_) => RuleOperator::LessThan,
			Predicate::Contains(_) => RuleOperator::Contains,
			Predicate::Regex(_) => RuleOperator::Regex,
			Predicate::Exists => RuleOperator::Exists,
		}
	}

	/// Evaluates the predicate against a present attribute value.
	fn evaluate(&self, actual: AttributeRef<'_>) -> bool {
		match self {
			Predicate::Equals(expected) => values_equal(actual, expected),
			Predicate::NotEquals(expected) => !values_equal(actual, expected),
			Predicate::In(expected) => expected.iter().any(|e| values_equal(actual, e)),
			Predicate::NotIn(expected) => !expected.iter().any(|e| values_equal(actual, e)),
			Predicate::GreaterThan(bound) => as_number(actual).is_some_and(|n| n > *bound),
			Predicate::LessThan(bound) => as_number(actual).is_some_and(|n| n < *bound),
			Predicate::Contains(needle) => match actual {
				AttributeRef::Str(s) => needle.as_str().is_some_and(|n| s.contains(n)),
				AttributeRef::Json(serde_json::Value::String(s)) => {
					needle.as_str().is_some_and(|n| s.contains(n))
				}
				AttributeRef::Json(serde_json::Value::Array(items)) => items
					.iter()
					.any(|item| values_equal(AttributeRef::Json(item), needle)),
				AttributeRef::Json(_) => false,
			},
			Predicate::Regex(re) => actual.as_str().is_some_and(|s| re.is_match(s)),
			Predicate::Exists => true,
		}
	}
}

/// A validated targeting rule.
#[derive(Debug, Clone)]
pub struct TargetingRule {
	pub id: RuleId,
	/// Context attribute the rule reads
	pub attribute: String,
	pub predicate: Predicate,
	/// Evaluation sequence within the segment
	pub order: i64,
}

impl TargetingRule {
	pub fn operator(&self) -> RuleOperator {
		self.predicate.operator()
	}

	/// Validates a storage record and compiles its operand.
	///
	/// The error string explains why the record was rejected.
	pub fn compile(record: &RuleRecord) -> std::result::Result<Self, String> {
		if record.attribute.trim().is_empty() {
			return Err("attribute is empty".to_string());
		}

		let operator = RuleOperator::parse(&record.operator)
			.ok_or_else(|| format!("unknown operator '{}'", record.operator))?;

		let single = || {
			record
				.value
				.clone()
				.filter(|v| !v.is_null())
				.ok_or_else(|| format!("{operator} requires a value"))
		};

		let list = || match (&record.values, &record.value) {
			(Some(values), _) => Ok(values.clone()),
			(None, Some(serde_json::Value::Array(values))) => Ok(values.clone()),
			_ => Err(format!("{operator} requires a list of values")),
		};

		let number = || {
			let value = single()?;
			json_number(&value).ok_or_else(|| format!("{operator} requires a numeric value"))
		};

		let predicate = match operator {
			RuleOperator::Equals => Predicate::Equals(single()?),
			RuleOperator::NotEquals => Predicate::NotEquals(single()?),
			RuleOperator::In => Predicate::In(list()?),
			RuleOperator::NotIn => Predicate::NotIn(list()?),
			RuleOperator::GreaterThan => Predicate::GreaterThan(number()?),
			RuleOperator::LessThan => Predicate::LessThan(number()?),
			RuleOperator::Contains => Predicate::Contains(single()?),
			RuleOperator::Regex => {
				let value = single()?;
				let pattern = value
					.as_str()
					.ok_or_else(|| "REGEX requires a string pattern".to_string())?;
				let re = Regex::new(pattern).map_err(|e| format!("invalid regex: {e}"))?;
				Predicate::Regex(re)
			}
			RuleOperator::Exists => Predicate::Exists,
		};

		Ok(TargetingRule {
			id: RuleId::new(record.id.clone()),
			attribute: record.attribute.clone(),
			predicate,
			order: record.order,
		})
	}
}

/// Evaluates a single targeting rule against a context.
///
/// A missing attribute never matches, whatever the operator, and a type
/// mismatch is a non-match rather than an error.
pub fn matches(rule: &TargetingRule, context: &EvaluationContext) -> bool {
	match context.attribute(&rule.attribute) {
		Some(actual) => rule.predicate.evaluate(actual),
		None => false,
	}
}

fn values_equal(actual: AttributeRef<'_>, expected: &serde_json::Value) -> bool {
	match actual {
		AttributeRef::Str(s) => expected.as_str() == Some(s),
		AttributeRef::Json(actual) => match (actual, expected) {
			(serde_json::Value::Number(a), serde_json::Value::Number(b)) => {
				match (a.as_f64(), b.as_f64()) {
					(Some(a), Some(b)) => a == b,
					_ => a == b,
				}
			}
			_ => actual == expected,
		},
	}
}

fn as_number(value: AttributeRef<'_>) -> Option<f64> {
	match value {
		AttributeRef::Str(s) => parse_number(s),
		AttributeRef::Json(v) => json_number(v),
	}
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
	match value {
		serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
		serde_json::Value::String(s) => parse_number(s),
		_ => None,
	}
}

fn parse_number(s: &str) -> Option<f64> {
	s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn record(operator: &str, value: Option<serde_json::Value>) -> RuleRecord {
		RuleRecord {
			id: "rule-1".to_string(),
			segment_id: "seg-1".to_string(),
			attribute: "attr".to_string(),
			operator: operator.to_string(),
			value,
			values: None,
			order: 0,
		}
	}

	fn rule(operator: &str, value: serde_json::Value) -> TargetingRule {
		TargetingRule::compile(&record(operator, Some(value))).unwrap()
	}

	fn ctx(value: serde_json::Value) -> EvaluationContext {
		EvaluationContext::new().with_attribute("attr", value)
	}

	#[test]
	fn test_equals() {
		let r = rule("EQUALS", json!("pro"));
		assert!(matches(&r, &ctx(json!("pro"))));
		assert!(!matches(&r, &ctx(json!("free"))));

		let r = rule("EQUALS", json!(1));
		assert!(matches(&r, &ctx(json!(1.0))));
		assert!(!matches(&r, &ctx(json!("1"))));
	}

	#[test]
	fn test_missing_attribute_never_matches() {
		let empty = EvaluationContext::new();
		for (op, value) in [
			("EQUALS", json!("x")),
			("NOT_EQUALS", json!("x")),
			("IN", json!(["x"])),
			("NOT_IN", json!(["x"])),
			("GREATER_THAN", json!(1)),
			("LESS_THAN", json!(1)),
			("CONTAINS", json!("x")),
			("REGEX", json!(".*")),
			("EXISTS", json!(null)),
		] {
			let r = TargetingRule::compile(&record(op, Some(value))).unwrap();
			assert!(!matches(&r, &empty), "{op} matched a missing attribute");
		}
	}

	#[test]
	fn test_not_equals_and_not_in() {
		let r = rule("NOT_EQUALS", json!("free"));
		assert!(matches(&r, &ctx(json!("pro"))));
		assert!(!matches(&r, &ctx(json!("free"))));

		let r = rule("NOT_IN", json!(["free", "trial"]));
		assert!(matches(&r, &ctx(json!("pro"))));
		assert!(!matches(&r, &ctx(json!("trial"))));
	}

	#[test]
	fn test_in_uses_values_list() {
		let mut rec = record("IN", None);
		rec.values = Some(vec![json!("US"), json!("CA")]);
		let r = TargetingRule::compile(&rec).unwrap();
		assert!(matches(&r, &ctx(json!("CA"))));
		assert!(!matches(&r, &ctx(json!("DE"))));
	}

	#[test]
	fn test_numeric_comparisons() {
		let gt = rule("GREATER_THAN", json!(18));
		assert!(matches(&gt, &ctx(json!(21))));
		assert!(matches(&gt, &ctx(json!("21"))));
		assert!(!matches(&gt, &ctx(json!(18))));
		assert!(!matches(&gt, &ctx(json!("twenty"))));
		assert!(!matches(&gt, &ctx(json!(true))));

		let lt = rule("LESS_THAN", json!("10.5"));
		assert!(matches(&lt, &ctx(json!(10))));
		assert!(!matches(&lt, &ctx(json!(11))));
	}

	#[test]
	fn test_contains() {
		let r = rule("CONTAINS", json!("@acme.com"));
		assert!(matches(&r, &ctx(json!("jo@acme.com"))));
		assert!(!matches(&r, &ctx(json!("jo@other.com"))));
		assert!(!matches(&r, &ctx(json!(42))));

		let r = rule("CONTAINS", json!("beta"));
		assert!(matches(&r, &ctx(json!(["alpha", "beta"]))));
		assert!(!matches(&r, &ctx(json!(["alpha"]))));
	}

	#[test]
	fn test_regex() {
		let r = rule("REGEX", json!("^user-[0-9]+$"));
		assert!(matches(&r, &ctx(json!("user-42"))));
		assert!(!matches(&r, &ctx(json!("admin-1"))));
		assert!(!matches(&r, &ctx(json!(42))));
	}

	#[test]
	fn test_exists() {
		let r = TargetingRule::compile(&record("EXISTS", None)).unwrap();
		assert!(matches(&r, &ctx(json!(false))));
		assert!(!matches(&r, &ctx(serde_json::Value::Null)));
	}

	#[test]
	fn test_builtin_attributes_are_matchable() {
		let mut rec = record("EQUALS", Some(json!("acme")));
		rec.attribute = "tenantId".to_string();
		let r = TargetingRule::compile(&rec).unwrap();
		assert!(matches(&r, &EvaluationContext::new().with_tenant_id("acme")));
		assert!(!matches(&r, &EvaluationContext::new().with_tenant_id("other")));
	}

	#[test]
	fn test_compile_rejects_bad_records() {
		assert!(TargetingRule::compile(&record("BETWEEN", Some(json!(1)))).is_err());
		assert!(TargetingRule::compile(&record("EQUALS", None)).is_err());
		assert!(TargetingRule::compile(&record("IN", Some(json!("x")))).is_err());
		assert!(TargetingRule::compile(&record("GREATER_THAN", Some(json!("abc")))).is_err());
		assert!(TargetingRule::compile(&record("REGEX", Some(json!("(unclosed")))).is_err());
		assert!(TargetingRule::compile(&record("REGEX", Some(json!(5)))).is_err());

		let mut rec = record("EXISTS", None);
		rec.attribute = "  ".to_string();
		assert!(TargetingRule::compile(&rec).is_err());
	}

	#[test]
	fn test_operator_parse_and_display() {
		assert_eq!(RuleOperator::parse("not_in"), Some(RuleOperator::NotIn));
		assert_eq!(RuleOperator::GreaterThan.to_string(), "GREATER_THAN");
		assert_eq!(
			serde_json::to_string(&RuleOperator::NotEquals).unwrap(),
			r#""NOT_EQUALS""#
		);
	}
}
