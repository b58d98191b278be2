//! Worker pools: claim loops, execution, retries, timeouts, shutdown.

use std::{sync::Arc, time::Duration};

use sqlx::PgPool;
use tokio::{
	sync::Semaphore,
	time::{interval, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
	error::{ErrorHandler, JobError, NoopErrorHandler},
	periodic::PeriodicJob,
	store::JobStore,
	types::{JobRow, QueueConfig},
	ErasedHandler, JobContext, Queue, Workers,
};

const SOFT_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
	pub queues: Vec<QueueConfig>,
	/// How often idle pools look for claimable jobs.
	pub poll_interval: Duration,
	/// Identity recorded in `attempted_by` for claimed jobs.
	pub client_id: String,
}

impl Default for RunnerConfig {
	fn default() -> Self {
		Self {
			queues: Vec::new(),
			poll_interval: Duration::from_secs(1),
			client_id: format!("themedex-{}", Uuid::new_v4()),
		}
	}
}

/// Owns the worker pools for every configured queue plus the periodic
/// producers. Constructed once per worker process.
pub struct JobRunner {
	queue: Queue,
	workers: Arc<Workers>,
	periodic: Vec<PeriodicJob>,
	error_handler: Arc<dyn ErrorHandler>,
	config: RunnerConfig,
}

impl JobRunner {
	pub fn new(pool: PgPool, workers: Workers, config: RunnerConfig) -> Self {
		Self {
			queue: Queue::new(pool),
			workers: Arc::new(workers),
			periodic: Vec::new(),
			error_handler: Arc::new(NoopErrorHandler),
			config,
		}
	}

	pub fn with_periodic_jobs(mut self, periodic: Vec<PeriodicJob>) -> Self {
		self.periodic = periodic;
		self
	}

	pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
		self.error_handler = handler;
		self
	}

	/// Client handle usable before and after `start`.
	pub fn queue(&self) -> Queue {
		self.queue.clone()
	}

	/// Spawns every pool and periodic producer and returns the stop handle.
	pub async fn start(self) -> Result<RunnerHandle, JobError> {
		let store = self.queue.store().clone();

		let queue_names: Vec<String> = self
			.config
			.queues
			.iter()
			.map(|queue| queue.name.clone())
			.collect();
		store.ensure_queues(&queue_names).await?;

		let shutdown = CancellationToken::new();
		let hard_cancel = CancellationToken::new();
		let tracker = TaskTracker::new();

		for queue_config in &self.config.queues {
			tokio::spawn(claim_loop(
				queue_config.clone(),
				self.config.clone(),
				store.clone(),
				self.queue.clone(),
				self.workers.clone(),
				self.error_handler.clone(),
				shutdown.clone(),
				hard_cancel.clone(),
				tracker.clone(),
			));
		}

		for periodic in self.periodic {
			tokio::spawn(periodic.run(store.clone(), shutdown.clone()));
		}

		info!(
			queues = self.config.queues.len(),
			client_id = %self.config.client_id,
			"job runner started"
		);

		Ok(RunnerHandle {
			shutdown,
			hard_cancel,
			tracker,
		})
	}
}

/// Stop handle for a started runner.
#[derive(Clone)]
pub struct RunnerHandle {
	shutdown: CancellationToken,
	hard_cancel: CancellationToken,
	tracker: TaskTracker,
}

impl RunnerHandle {
	/// Soft stop: stop claiming, wait up to the grace period for running
	/// jobs, then cancel whatever is left.
	pub async fn stop(&self) {
		self.shutdown.cancel();
		self.tracker.close();

		if tokio::time::timeout(SOFT_STOP_GRACE, self.tracker.wait())
			.await
			.is_err()
		{
			warn!("soft stop grace elapsed, cancelling in-flight jobs");
			self.hard_cancel.cancel();
			self.tracker.wait().await;
		}
	}

	/// Hard stop: cancel every in-flight job immediately.
	pub fn cancel_all(&self) {
		self.shutdown.cancel();
		self.hard_cancel.cancel();
	}
}

#[allow(clippy::too_many_arguments)]
async fn claim_loop(
	queue_config: QueueConfig,
	runner_config: RunnerConfig,
	store: Arc<JobStore>,
	queue: Queue,
	workers: Arc<Workers>,
	error_handler: Arc<dyn ErrorHandler>,
	shutdown: CancellationToken,
	hard_cancel: CancellationToken,
	tracker: TaskTracker,
) {
	let slots = Arc::new(Semaphore::new(queue_config.max_workers));
	let mut poll = interval(runner_config.poll_interval);
	poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			_ = poll.tick() => {}
		}

		match store.is_paused(&queue_config.name).await {
			Ok(true) => continue,
			Ok(false) => {}
			Err(e) => {
				error!(queue = %queue_config.name, "failed to read queue pause state: {e}");
				continue;
			}
		}

		// Fill every free worker slot with a claimed job.
		loop {
			let Ok(permit) = slots.clone().try_acquire_owned() else {
				break;
			};

			match store.claim_one(&queue_config.name, &runner_config.client_id).await {
				Ok(Some(job)) => {
					tracker.spawn(execute(
						job,
						permit,
						store.clone(),
						queue.clone(),
						workers.clone(),
						error_handler.clone(),
						hard_cancel.clone(),
					));
				}
				Ok(None) => break,
				Err(e) => {
					error!(queue = %queue_config.name, "failed to claim job: {e}");
					break;
				}
			}
		}
	}

	debug!(queue = %queue_config.name, "claim loop stopped");
}

async fn execute(
	job: JobRow,
	_permit: tokio::sync::OwnedSemaphorePermit,
	store: Arc<JobStore>,
	queue: Queue,
	workers: Arc<Workers>,
	error_handler: Arc<dyn ErrorHandler>,
	hard_cancel: CancellationToken,
) {
	info!(job_id = job.id, kind = %job.kind, attempt = job.attempt, "job started");

	let Some(handler) = workers.get(&job.kind) else {
		let err = JobError::UnknownKind(job.kind.clone());
		error!(job_id = job.id, "{err}");
		error_handler.on_error(&job, &err);
		if let Err(e) = store.fail(&job, &err).await {
			error!(job_id = job.id, "failed to record job error: {e}");
		}
		return;
	};

	let token = hard_cancel.child_token();
	let outcome = run_with_timeout(&job, handler, token, queue, &error_handler).await;

	let result = match outcome {
		Ok(()) => {
			info!(job_id = job.id, kind = %job.kind, "job completed");
			store.complete(job.id).await
		}
		Err(JobError::Cancelled) => {
			warn!(job_id = job.id, kind = %job.kind, "job cancelled");
			error_handler.on_error(&job, &JobError::Cancelled);
			store.cancel(&job, "job cancelled").await
		}
		Err(err) => {
			warn!(job_id = job.id, kind = %job.kind, attempt = job.attempt, "job errored: {err}");
			error_handler.on_error(&job, &err);
			store.fail(&job, &err).await
		}
	};

	if let Err(e) = result {
		error!(job_id = job.id, "failed to persist job outcome: {e}");
	}
}

async fn run_with_timeout(
	job: &JobRow,
	handler: Arc<dyn ErasedHandler>,
	token: CancellationToken,
	queue: Queue,
	error_handler: &Arc<dyn ErrorHandler>,
) -> Result<(), JobError> {
	let ctx = JobContext {
		job_id: job.id,
		attempt: job.attempt,
		token: token.clone(),
		queue,
	};

	let timeout = handler.timeout();
	let args = job.args.0.clone();

	// Run inside its own task so a panicking handler surfaces as a failed
	// attempt instead of taking the pool down.
	let mut task = tokio::spawn(async move { handler.run(args, ctx).await });

	tokio::select! {
		joined = &mut task => match joined {
			Ok(result) => result,
			Err(join_error) => {
				if join_error.is_panic() {
					let message = panic_message(join_error.into_panic());
					error_handler.on_panic(job, &message);
					Err(JobError::Panic(message))
				} else {
					Err(JobError::Cancelled)
				}
			}
		},
		_ = tokio::time::sleep(timeout) => {
			// Let the handler observe the cancellation and unwind.
			token.cancel();
			let _ = task.await;
			Err(JobError::Timeout(timeout))
		}
	}
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic payload".to_string()
	}
}
