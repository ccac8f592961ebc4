// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background refresh: periodic polling plus out-of-band invalidations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::FlagsEngine;

/// A change notification from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
	/// Reload everything.
	All,
	/// Reload one flag by key.
	Flag(String),
}

/// Handle to a running refresh task.
pub struct Refresher {
	invalidations: mpsc::Sender<Invalidation>,
	shutdown_tx: broadcast::Sender<()>,
	handle: JoinHandle<()>,
}

impl Refresher {
	/// Spawns the refresh loop. The first tick fires immediately, so the
	/// engine starts loading as soon as the task runs.
	pub fn spawn(engine: Arc<FlagsEngine>) -> Self {
		let interval = engine.config().refresh_interval;
		let buffer = engine.config().invalidation_buffer.max(1);
		let (invalidations, rx) = mpsc::channel(buffer);
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

		let handle = tokio::spawn(run(engine, interval, rx, shutdown_rx));
		info!(interval_secs = interval.as_secs(), "flag refresher started");

		Self {
			invalidations,
			shutdown_tx,
			handle,
		}
	}

	/// Sender for storage change notifications.
	pub fn invalidations(&self) -> mpsc::Sender<Invalidation> {
		self.invalidations.clone()
	}

	pub async fn invalidate(&self, invalidation: Invalidation) {
		if self.invalidations.send(invalidation).await.is_err() {
			debug!("refresher already stopped, dropping invalidation");
		}
	}

	/// Stops the loop and waits for it to finish.
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(());
		let _ = self.handle.await;
	}
}

async fn run(
	engine: Arc<FlagsEngine>,
	interval: Duration,
	mut rx: mpsc::Receiver<Invalidation>,
	mut shutdown_rx: broadcast::Receiver<()>,
) {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut channel_open = true;

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				// Failures are logged by the engine and the previous snapshot keeps serving.
				let _ = engine.force_reload().await;
			}
			msg = rx.recv(), if channel_open => {
				match msg {
					Some(Invalidation::All) => {
						// A full reload covers anything else already queued.
						while rx.try_recv().is_ok() {}
						debug!("invalidation: reloading all flags");
						let _ = engine.force_reload().await;
					}
					Some(Invalidation::Flag(key)) => {
						debug!(flag_key = %key, "invalidation: reloading flag");
						let _ = engine.refresh_flag(&key).await;
					}
					None => {
						channel_open = false;
					}
				}
			}
			_ = shutdown_rx.recv() => {
				info!("flag refresher shutting down");
				break;
			}
		}
	}
}
