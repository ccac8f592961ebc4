// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flag::ScopeType;

/// Attribute names that resolve to the context's built-in fields.
pub const SUBJECT_ID_ATTRIBUTE: &str = "subjectId";
pub const TENANT_ID_ATTRIBUTE: &str = "tenantId";
pub const USER_ID_ATTRIBUTE: &str = "userId";
pub const ENVIRONMENT_ATTRIBUTE: &str = "environment";

/// Caller-supplied description of the subject and request being evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	/// Stable identity used for percentage bucketing
	pub subject_id: Option<String>,
	pub tenant_id: Option<String>,
	pub user_id: Option<String>,
	pub environment: Option<String>,
	/// Identifier matched against CUSTOM segment scopes
	pub custom_scope: Option<String>,
	#[serde(default)]
	pub attributes: BTreeMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_subject_id(mut self, subject_id: impl Into<String>) -> Self {
		self.subject_id = Some(subject_id.into());
		self
	}

	pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant_id.into());
		self
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
		self.environment = Some(environment.into());
		self
	}

	pub fn with_custom_scope(mut self, custom_scope: impl Into<String>) -> Self {
		self.custom_scope = Some(custom_scope.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Identity used for rollout bucketing: the subject id, else the user id.
	/// Empty ids count as absent.
	pub fn identity(&self) -> Option<&str> {
		self
			.subject_id
			.as_deref()
			.filter(|s| !s.is_empty())
			.or_else(|| self.user_id.as_deref().filter(|s| !s.is_empty()))
	}

	/// Identifier this context carries for the given scope dimension.
	///
	/// GLOBAL has no identifier and always returns `None`.
	pub fn scope_identifier(&self, scope_type: ScopeType) -> Option<&str> {
		match scope_type {
			ScopeType::Global => None,
			ScopeType::Environment => self.environment.as_deref(),
			ScopeType::Tenant => self.tenant_id.as_deref(),
			ScopeType::User => self.user_id.as_deref(),
			ScopeType::Custom => self.custom_scope.as_deref(),
		}
	}

	/// Looks up an attribute for rule matching.
	///
	/// Explicit attributes win over the built-in fields. JSON `null` counts as
	/// absent.
	pub fn attribute(&self, name: &str) -> Option<AttributeRef<'_>> {
		if let Some(value) = self.attributes.get(name) {
			if value.is_null() {
				return None;
			}
			return Some(AttributeRef::Json(value));
		}

		let builtin = match name {
			SUBJECT_ID_ATTRIBUTE => self.subject_id.as_deref(),
			TENANT_ID_ATTRIBUTE => self.tenant_id.as_deref(),
			USER_ID_ATTRIBUTE => self.user_id.as_deref(),
			ENVIRONMENT_ATTRIBUTE => self.environment.as_deref(),
			_ => None,
		};
		builtin.map(AttributeRef::Str)
	}
}

/// A borrowed attribute value, either from the attribute map or a built-in field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeRef<'a> {
	Json(&'a serde_json::Value),
	Str(&'a str),
}

impl<'a> AttributeRef<'a> {
	pub fn as_str(&self) -> Option<&'a str> {
		match self {
			AttributeRef::Json(v) => v.as_str(),
			AttributeRef::Str(s) => Some(s),
		}
	}

	pub fn as_json(&self) -> Option<&'a serde_json::Value> {
		match self {
			AttributeRef::Json(v) => Some(v),
			AttributeRef::Str(_) => None,
		}
	}
}
