// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `keel-flags`: evaluate and inspect feature flags stored in SQLite.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keel_flags_core::RecordSet;
use keel_server_config::{KeelConfig, LoggingConfig};
use keel_server_flags::{EngineConfig, FlagsEngine, Refresher, RetryConfig, SqliteFlagStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod context;
mod output;

use context::ContextArgs;

#[derive(Parser, Debug)]
#[command(
	name = "keel-flags",
	about = "Evaluate and inspect Keel feature flags",
	version
)]
struct Args {
	/// Config file to use instead of /etc/keel/flags.toml
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Overrides database.url from the config
	#[arg(long, global = true)]
	database_url: Option<String>,

	/// Print machine-readable JSON instead of text
	#[arg(long, global = true)]
	json: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Evaluate one flag
	Eval {
		flag: String,
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Evaluate every flag in the snapshot
	EvalAll {
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Evaluate one flag and print the decision trace
	Explain {
		flag: String,
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Load a snapshot and report its health
	Status,
	/// Keep refreshing and print the flag whenever a new snapshot is published
	Watch {
		flag: String,
		#[command(flatten)]
		context: ContextArgs,
	},
	/// Write flag, segment and rule records from a JSON file into the database
	Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => keel_server_config::load_config_with_file(path)?,
		None => keel_server_config::load_config()?,
	};
	if let Some(url) = &args.database_url {
		config.database.url = url.clone();
	}

	init_tracing(&config.logging);

	let store = Arc::new(open_store(&config.database.url).await?);

	match args.command {
		Command::Import { file } => import(&store, &file, args.json).await,
		Command::Eval { flag, context } => {
			let engine = load_engine(store, &config).await;
			let result = engine.evaluate(&flag, &context.to_context())?;
			if args.json {
				println!("{}", serde_json::to_string_pretty(&result)?);
			} else {
				println!("{}", output::result(&result));
			}
			Ok(())
		}
		Command::EvalAll { context } => {
			let engine = load_engine(store, &config).await;
			let results = engine.evaluate_all(&context.to_context())?;
			if args.json {
				println!("{}", serde_json::to_string_pretty(&results)?);
			} else {
				print!("{}", output::bulk(&results));
			}
			Ok(())
		}
		Command::Explain { flag, context } => {
			let engine = load_engine(store, &config).await;
			let evaluation = engine.explain(&flag, &context.to_context())?;
			if args.json {
				println!("{}", serde_json::to_string_pretty(&evaluation)?);
			} else {
				println!("{}", output::result(&evaluation.result));
				print!("{}", output::trace(&evaluation.trace));
			}
			Ok(())
		}
		Command::Status => {
			let engine = load_engine(store, &config).await;
			let status = engine.status();
			if args.json {
				println!("{}", serde_json::to_string_pretty(&status)?);
			} else {
				print!("{}", output::status(&status));
			}
			Ok(())
		}
		Command::Watch { flag, context } => watch(store, &config, &flag, &context, args.json).await,
	}
}

fn init_tracing(logging: &LoggingConfig) {
	// Logs go to stderr so stdout stays parseable with --json.
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
	let json_layer = logging
		.json
		.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
	let text_layer = (!logging.json)
		.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

	tracing_subscriber::registry()
		.with(filter)
		.with(json_layer)
		.with(text_layer)
		.init();
}

async fn open_store(url: &str) -> Result<SqliteFlagStore> {
	let options = SqliteConnectOptions::from_str(url)
		.with_context(|| format!("invalid database url '{url}'"))?
		.create_if_missing(true);
	// Every connection to an in-memory database sees its own empty database.
	let max_connections = if url.contains(":memory:") { 1 } else { 4 };
	let pool = SqlitePoolOptions::new()
		.max_connections(max_connections)
		.connect_with(options)
		.await
		.with_context(|| format!("failed to open database '{url}'"))?;

	let store = SqliteFlagStore::new(pool);
	store.ensure_schema().await?;
	Ok(store)
}

fn engine_config(config: &KeelConfig) -> EngineConfig {
	let flags = &config.flags;
	EngineConfig {
		refresh_interval: flags.refresh_interval(),
		storage_timeout: flags.storage_timeout(),
		cold_start_policy: flags.cold_start_policy,
		retry: RetryConfig {
			max_attempts: flags.retry_max_attempts,
			base_delay: flags.retry_base_delay(),
			max_delay: flags.retry_max_delay(),
			..RetryConfig::default()
		},
		invalidation_buffer: flags.invalidation_buffer,
	}
}

/// Builds an engine and attempts the first load. A failed load is logged and
/// left to the cold start policy.
async fn load_engine(store: Arc<SqliteFlagStore>, config: &KeelConfig) -> FlagsEngine {
	let engine = FlagsEngine::new(store, engine_config(config));
	if let Err(e) = engine.force_reload().await {
		warn!(error = %e, "initial flag load failed");
	}
	engine
}

async fn import(store: &SqliteFlagStore, file: &Path, json: bool) -> Result<()> {
	let content = std::fs::read_to_string(file)
		.with_context(|| format!("failed to read {}", file.display()))?;
	let records: RecordSet = serde_json::from_str(&content)
		.with_context(|| format!("failed to parse {}", file.display()))?;

	store.upsert_records(&records).await?;
	info!(
		flags = records.flags.len(),
		segments = records.segments.len(),
		rules = records.rules.len(),
		"imported flag records"
	);

	if json {
		println!(
			"{}",
			serde_json::json!({
				"flags": records.flags.len(),
				"segments": records.segments.len(),
				"rules": records.rules.len(),
			})
		);
	} else {
		println!(
			"imported {} flags, {} segments, {} rules",
			records.flags.len(),
			records.segments.len(),
			records.rules.len()
		);
	}
	Ok(())
}

async fn watch(
	store: Arc<SqliteFlagStore>,
	config: &KeelConfig,
	flag: &str,
	context: &ContextArgs,
	json: bool,
) -> Result<()> {
	let engine = Arc::new(FlagsEngine::new(store, engine_config(config)));
	let refresher = Refresher::spawn(Arc::clone(&engine));
	let ctx = context.to_context();

	let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
	let mut last_version = None;

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				let version = engine.snapshot().map(|s| s.version());
				if version.is_none() || version == last_version {
					continue;
				}
				last_version = version;
				match engine.evaluate(flag, &ctx) {
					Ok(result) if json => println!("{}", serde_json::to_string(&result)?),
					Ok(result) => println!("{}", output::result(&result)),
					Err(e) => warn!(flag_key = %flag, error = %e, "evaluation failed"),
				}
			}
			_ = tokio::signal::ctrl_c() => {
				info!("received shutdown signal");
				break;
			}
		}
	}

	refresher.shutdown().await;
	Ok(())
}
