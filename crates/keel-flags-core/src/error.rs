// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::record::RecordKind;

/// Errors that can occur in the feature flags system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlagsError {
	/// The key is not present in the current snapshot.
	#[error("flag not found: {0}")]
	FlagNotFound(String),

	/// No snapshot has ever been published.
	#[error("no flag snapshot has been loaded yet")]
	SnapshotUnavailable,

	/// A storage record failed validation and was left out of the snapshot.
	#[error("malformed {kind} record {id}: {reason}")]
	MalformedRecord {
		kind: RecordKind,
		id: String,
		reason: String,
	},

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl FlagsError {
	pub fn malformed(kind: RecordKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
		FlagsError::MalformedRecord {
			kind,
			id: id.into(),
			reason: reason.into(),
		}
	}

	/// Returns true for errors a caller should answer with its own local default.
	pub fn is_fallback_candidate(&self) -> bool {
		matches!(
			self,
			FlagsError::FlagNotFound(_) | FlagsError::SnapshotUnavailable
		)
	}
}

impl From<serde_json::Error> for FlagsError {
	fn from(err: serde_json::Error) -> Self {
		FlagsError::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, FlagsError>;
