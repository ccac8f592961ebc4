// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context assembled from command-line flags.

use clap::Args;
use keel_flags_core::EvaluationContext;

#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
	/// Stable identity used for percentage rollout bucketing
	#[arg(long)]
	pub subject: Option<String>,

	#[arg(long)]
	pub tenant: Option<String>,

	#[arg(long)]
	pub user: Option<String>,

	#[arg(long = "env")]
	pub environment: Option<String>,

	#[arg(long)]
	pub custom_scope: Option<String>,

	/// Targeting attribute as key=value. The value is parsed as JSON and
	/// falls back to a plain string.
	#[arg(long = "attr", value_parser = parse_attribute)]
	pub attributes: Vec<(String, serde_json::Value)>,
}

impl ContextArgs {
	pub fn to_context(&self) -> EvaluationContext {
		let mut ctx = EvaluationContext::new();
		if let Some(subject) = &self.subject {
			ctx = ctx.with_subject_id(subject.clone());
		}
		if let Some(tenant) = &self.tenant {
			ctx = ctx.with_tenant_id(tenant.clone());
		}
		if let Some(user) = &self.user {
			ctx = ctx.with_user_id(user.clone());
		}
		if let Some(environment) = &self.environment {
			ctx = ctx.with_environment(environment.clone());
		}
		if let Some(custom_scope) = &self.custom_scope {
			ctx = ctx.with_custom_scope(custom_scope.clone());
		}
		for (key, value) in &self.attributes {
			ctx = ctx.with_attribute(key.clone(), value.clone());
		}
		ctx
	}
}

fn parse_attribute(raw: &str) -> Result<(String, serde_json::Value), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
	let key = key.trim();
	if key.is_empty() {
		return Err(format!("attribute name is empty in '{raw}'"));
	}
	let value = serde_json::from_str(value)
		.unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
	Ok((key.to_string(), value))
}
