// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections. Each section has a partial `*ConfigLayer` used
//! for merging and a fully resolved `*Config`.

mod database;
mod flags;
mod logging;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use flags::{FlagsConfig, FlagsConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
