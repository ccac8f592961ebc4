// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryableError;

/// Errors raised while loading, publishing or serving flag snapshots.
#[derive(Debug, Error)]
pub enum FlagsServerError {
	#[error(transparent)]
	Core(#[from] keel_flags_core::FlagsError),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// The record store could not be read.
	#[error("flag storage unavailable: {0}")]
	StorageUnavailable(String),

	#[error("flag storage did not respond within {0:?}")]
	StorageTimeout(Duration),

	#[error("internal error: {0}")]
	Internal(String),
}

impl FlagsServerError {
	/// Storage trouble is worth retrying; bad data and internal faults are not.
	pub fn is_retryable(&self) -> bool {
		match self {
			FlagsServerError::StorageUnavailable(_) | FlagsServerError::StorageTimeout(_) => true,
			FlagsServerError::Database(err) => matches!(
				err,
				sqlx::Error::Io(_)
					| sqlx::Error::PoolTimedOut
					| sqlx::Error::PoolClosed
					| sqlx::Error::WorkerCrashed
					| sqlx::Error::Database(_)
			),
			FlagsServerError::Core(_)
			| FlagsServerError::Serialization(_)
			| FlagsServerError::Internal(_) => false,
		}
	}
}

impl RetryableError for FlagsServerError {
	fn is_retryable(&self) -> bool {
		FlagsServerError::is_retryable(self)
	}
}

pub type Result<T> = std::result::Result<T, FlagsServerError>;
