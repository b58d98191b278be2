//! Durable job runtime backed by the relational database.
//!
//! Jobs are rows; named queues get their own worker pools with per-queue
//! concurrency limits. Kinds are a closed set registered in [`Workers`],
//! each pairing a typed argument struct with an async handler. The runtime
//! owns claims, retries with backoff, per-kind timeouts, periodic
//! producers, pause/resume, and soft/hard stop.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;

mod error;
mod periodic;
mod runner;
mod store;
mod types;

pub use error::{ErrorHandler, JobError, NoopErrorHandler};
pub use periodic::PeriodicJob;
pub use runner::{JobRunner, RunnerConfig, RunnerHandle};
pub use types::{
	backoff_seconds, AttemptError, InsertManyParams, InsertOpts, JobRow, JobState, QueueConfig,
};

use store::JobStore;

/// Typed arguments of one job kind. The kind string is the stable identity
/// a persisted row is matched back to its handler with.
pub trait JobArgs: Serialize + DeserializeOwned + Send + Sync + 'static {
	const KIND: &'static str;

	/// Default insertion options for this kind; callers may override per
	/// insert.
	fn insert_opts() -> InsertOpts {
		InsertOpts::default()
	}
}

/// Execution logic of one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
	type Args: JobArgs;

	/// Per-attempt deadline. The runtime cancels the job's token when it
	/// elapses.
	fn timeout(&self) -> Duration {
		Duration::from_secs(5 * 60)
	}

	async fn run(&self, args: Self::Args, ctx: &JobContext) -> Result<(), JobError>;
}

/// Context handed to a running job. Handlers are required to honor the
/// cancellation token on every blocking call.
#[derive(Clone)]
pub struct JobContext {
	pub job_id: i64,
	pub attempt: i16,
	token: CancellationToken,
	queue: Queue,
}

impl JobContext {
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Enqueue handle, for jobs that fan out into more jobs.
	pub fn queue(&self) -> &Queue {
		&self.queue
	}

	/// Errors out when the job has been cancelled or timed out.
	pub fn check_interrupt(&self) -> Result<(), JobError> {
		if self.token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		Ok(())
	}

	/// Cancellation-aware sleep.
	pub async fn sleep(&self, duration: Duration) -> Result<(), JobError> {
		tokio::select! {
			_ = tokio::time::sleep(duration) => Ok(()),
			_ = self.token.cancelled() => Err(JobError::Cancelled),
		}
	}

	/// Races a blocking call against the job's cancellation signal.
	pub async fn cancellable<F, T, E>(&self, future: F) -> Result<T, JobError>
	where
		F: std::future::Future<Output = Result<T, E>>,
		JobError: From<E>,
	{
		tokio::select! {
			result = future => result.map_err(JobError::from),
			_ = self.token.cancelled() => Err(JobError::Cancelled),
		}
	}
}

#[async_trait]
trait ErasedHandler: Send + Sync {
	fn timeout(&self) -> Duration;

	async fn run(&self, args: serde_json::Value, ctx: JobContext) -> Result<(), JobError>;
}

struct HandlerAdapter<H: JobHandler> {
	handler: H,
}

#[async_trait]
impl<H: JobHandler> ErasedHandler for HandlerAdapter<H> {
	fn timeout(&self) -> Duration {
		self.handler.timeout()
	}

	async fn run(&self, args: serde_json::Value, ctx: JobContext) -> Result<(), JobError> {
		let args: H::Args = serde_json::from_value(args)?;
		self.handler.run(args, &ctx).await
	}
}

/// Registry mapping kind strings to handlers.
#[derive(Default)]
pub struct Workers {
	handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl Workers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register<H: JobHandler>(&mut self, handler: H) {
		self.handlers
			.insert(H::Args::KIND, Arc::new(HandlerAdapter { handler }));
	}

	fn get(&self, kind: &str) -> Option<Arc<dyn ErasedHandler>> {
		self.handlers.get(kind).cloned()
	}
}

/// Client half of the queue: inserts, lookups, pause/resume. Cheap to clone;
/// the worker pools live in [`JobRunner`].
#[derive(Clone)]
pub struct Queue {
	store: Arc<JobStore>,
}

impl Queue {
	pub fn new(pool: PgPool) -> Self {
		Self {
			store: Arc::new(JobStore::new(pool)),
		}
	}

	pub async fn insert<A: JobArgs>(
		&self,
		args: &A,
		opts: Option<InsertOpts>,
	) -> Result<JobRow, JobError> {
		let params = match opts {
			Some(opts) => InsertManyParams::with_opts(args, opts)?,
			None => InsertManyParams::new(args)?,
		};

		self.store.insert(self.store.pool(), &params).await
	}

	/// Enqueues inside the caller's transaction: the job becomes visible iff
	/// the transaction commits, and a rollback leaves no job behind.
	pub async fn insert_tx<A: JobArgs>(
		&self,
		tx: &mut Transaction<'_, Postgres>,
		args: &A,
		opts: Option<InsertOpts>,
	) -> Result<JobRow, JobError> {
		let params = match opts {
			Some(opts) => InsertManyParams::with_opts(args, opts)?,
			None => InsertManyParams::new(args)?,
		};

		self.store.insert(&mut **tx, &params).await
	}

	pub async fn insert_many(&self, batch: &[InsertManyParams]) -> Result<u64, JobError> {
		self.store.insert_many(batch).await
	}

	pub async fn get(&self, id: i64) -> Result<Option<JobRow>, JobError> {
		self.store.get(id).await
	}

	pub async fn pause(&self, queue: &str) -> Result<(), JobError> {
		self.store.pause(queue).await
	}

	pub async fn resume(&self, queue: &str) -> Result<(), JobError> {
		self.store.resume(queue).await
	}

	fn store(&self) -> &Arc<JobStore> {
		&self.store
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use serde::Deserialize;

	#[derive(Serialize, Deserialize)]
	struct NoopArgs;

	impl JobArgs for NoopArgs {
		const KIND: &'static str = "noop";

		fn insert_opts() -> InsertOpts {
			InsertOpts {
				queue: Some("noop-queue".into()),
				max_attempts: Some(3),
				..Default::default()
			}
		}
	}

	struct NoopHandler;

	#[async_trait]
	impl JobHandler for NoopHandler {
		type Args = NoopArgs;

		async fn run(&self, _args: NoopArgs, _ctx: &JobContext) -> Result<(), JobError> {
			Ok(())
		}
	}

	#[test]
	fn registry_resolves_handlers_by_kind() {
		let mut workers = Workers::new();
		workers.register(NoopHandler);

		assert!(workers.get("noop").is_some());
		assert!(workers.get("unknown").is_none());
	}

	#[test]
	fn insert_params_pick_up_kind_defaults() {
		let params = InsertManyParams::new(&NoopArgs).unwrap();
		assert_eq!(params.kind, "noop");
		assert_eq!(params.opts.queue.as_deref(), Some("noop-queue"));
		assert_eq!(params.opts.max_attempts, Some(3));
	}
}
