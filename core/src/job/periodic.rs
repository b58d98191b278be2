//! Periodic job producers.

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{store::JobStore, types::InsertManyParams};

type Producer = Box<dyn Fn() -> InsertManyParams + Send + Sync>;

/// Enqueues one job per tick through the normal insertion path.
pub struct PeriodicJob {
	interval: Duration,
	run_on_start: bool,
	producer: Producer,
}

impl PeriodicJob {
	pub fn new(
		interval: Duration,
		producer: impl Fn() -> InsertManyParams + Send + Sync + 'static,
	) -> Self {
		Self {
			interval,
			run_on_start: false,
			producer: Box::new(producer),
		}
	}

	/// Also fire immediately when the runner starts.
	pub fn run_on_start(mut self, run_on_start: bool) -> Self {
		self.run_on_start = run_on_start;
		self
	}

	pub(super) async fn run(self, store: Arc<JobStore>, shutdown: CancellationToken) {
		let mut ticker = interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		// The first tick of a tokio interval completes immediately; consume
		// it unless this producer is configured to run on start.
		if !self.run_on_start {
			tokio::select! {
				_ = shutdown.cancelled() => return,
				_ = ticker.tick() => {}
			}
		}

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = ticker.tick() => {}
			}

			let params = (self.producer)();
			debug!(kind = params.kind, "periodic enqueue");

			if let Err(e) = store.insert(store.pool(), &params).await {
				error!(kind = params.kind, "periodic enqueue failed: {e}");
			}
		}
	}
}
