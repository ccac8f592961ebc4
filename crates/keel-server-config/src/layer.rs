// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration produced by a single source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, FlagsConfigLayer, LoggingConfigLayer};

/// One source's view of the configuration. Unset sections stay `None` so
/// lower-precedence sources show through.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeelConfigLayer {
	#[serde(default)]
	pub flags: Option<FlagsConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl KeelConfigLayer {
	pub fn merge(&mut self, other: KeelConfigLayer) {
		merge_section(&mut self.flags, other.flags, FlagsConfigLayer::merge);
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(target: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (target.as_mut(), other) {
		(Some(existing), Some(other)) => merge(existing, other),
		(None, Some(other)) => *target = Some(other),
		(_, None) => {}
	}
}
