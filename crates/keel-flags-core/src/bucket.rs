// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic percentage bucketing.
//!
//! Every service that evaluates flags must agree on bucket assignment, so the
//! hash and its input are fixed: MurmurHash3 x86 32-bit with seed 0 over the
//! UTF-8 bytes of `"{flag_key}.{segment_id}.{identity}"`.

use std::io::Cursor;

use murmur3::murmur3_32;

/// Number of distinct buckets; gives rollout percentages two decimals of resolution.
pub const BUCKET_COUNT: u32 = 10_000;

/// Returns the bucket for an identity, in `[0, 100)`.
pub fn bucket(flag_key: &str, segment_id: &str, identity: &str) -> f64 {
	let input = format!("{}.{}.{}", flag_key, segment_id, identity);
	let hash = murmur3_32(&mut Cursor::new(input.as_bytes()), 0).unwrap_or(0);
	f64::from(hash % BUCKET_COUNT) / 100.0
}

/// Decides whether an identity falls inside a segment's rollout percentage.
///
/// Without an identity there is nothing stable to hash, so the answer is
/// always false.
pub fn in_rollout(flag_key: &str, segment_id: &str, identity: Option<&str>, percentage: f64) -> bool {
	let Some(identity) = identity else {
		return false;
	};
	if percentage.is_nan() || percentage <= 0.0 {
		return false;
	}
	bucket(flag_key, segment_id, identity) < percentage
}


#[cfg(test)]
mod proptest_tests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn rollout_is_deterministic(
			flag in "[a-z-]{1,20}",
			seg in "[a-z0-9-]{1,20}",
			identity in "[a-zA-Z0-9-]{1,30}",
			pct in 0.0f64..=100.0,
		) {
			let first = in_rollout(&flag, &seg, Some(&identity), pct);
			for _ in 0..10 {
				prop_assert_eq!(in_rollout(&flag, &seg, Some(&identity), pct), first);
			}
		}

		#[test]
		fn rollout_is_monotonic_in_percentage(
			identity in "[a-zA-Z0-9-]{1,30}",
			low in 0.0f64..=100.0,
			delta in 0.0f64..=100.0,
		) {
			let high = (low + delta).min(100.0);
			if in_rollout("flag", "seg", Some(&identity), low) {
				prop_assert!(in_rollout("flag", "seg", Some(&identity), high));
			}
		}

		#[test]
		fn negative_percentage_is_always_out(identity in "[a-z0-9]{1,20}", pct in -1000.0f64..=0.0) {
			prop_assert!(!in_rollout("flag", "seg", Some(&identity), pct));
		}
	}
}
