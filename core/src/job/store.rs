//! Persistence layer of the job queue.

use chrono::Utc;
use sqlx::{PgExecutor, PgPool};

use super::{
	error::JobError,
	types::{
		backoff_seconds, AttemptError, InsertManyParams, InsertOpts, JobRow, JobState,
		DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, DEFAULT_QUEUE,
	},
};

const JOB_COLUMNS: &str = "id, kind, queue, state, priority, args, attempt, max_attempts, \
	attempted_by, attempted_at, scheduled_at, finalized_at, created_at, errors, tags, metadata";

pub(super) struct JobStore {
	pool: PgPool,
}

impl JobStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Makes sure a row exists for every configured queue.
	pub async fn ensure_queues(&self, names: &[String]) -> Result<(), JobError> {
		for name in names {
			sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
				.bind(name)
				.execute(&self.pool)
				.await?;
		}

		Ok(())
	}

	pub async fn insert<'c, E: PgExecutor<'c>>(
		&self,
		executor: E,
		params: &InsertManyParams,
	) -> Result<JobRow, JobError> {
		let InsertOpts {
			queue,
			max_attempts,
			priority,
			scheduled_at,
			tags,
		} = params.opts.clone();

		let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
		let state = if scheduled_at > Utc::now() {
			JobState::Scheduled
		} else {
			JobState::Available
		};

		let job = sqlx::query_as(&format!(
			"INSERT INTO jobs (kind, queue, state, priority, args, max_attempts, scheduled_at, tags) \
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
			RETURNING {JOB_COLUMNS}"
		))
		.bind(params.kind)
		.bind(queue.as_deref().unwrap_or(DEFAULT_QUEUE))
		.bind(state)
		.bind(priority.unwrap_or(DEFAULT_PRIORITY))
		.bind(sqlx::types::Json(&params.args))
		.bind(max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
		.bind(scheduled_at)
		.bind(tags.unwrap_or_default())
		.fetch_one(executor)
		.await?;

		Ok(job)
	}

	/// Inserts a batch atomically; either every job is enqueued or none.
	pub async fn insert_many(&self, batch: &[InsertManyParams]) -> Result<u64, JobError> {
		let mut tx = self.pool.begin().await?;

		let mut inserted = 0;
		for params in batch {
			self.insert(&mut *tx, params).await?;
			inserted += 1;
		}

		tx.commit().await?;

		Ok(inserted)
	}

	pub async fn get(&self, id: i64) -> Result<Option<JobRow>, JobError> {
		let job = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		Ok(job)
	}

	/// Atomically claims the next due job of a queue, if any. The row lock
	/// plus `SKIP LOCKED` keeps concurrent pools from double-claiming.
	pub async fn claim_one(
		&self,
		queue: &str,
		client_id: &str,
	) -> Result<Option<JobRow>, JobError> {
		let job = sqlx::query_as(&format!(
			"UPDATE jobs SET \
				state = 'running', \
				attempt = attempt + 1, \
				attempted_at = now(), \
				attempted_by = array_append(attempted_by, $2) \
			WHERE id = ( \
				SELECT id FROM jobs \
				WHERE queue = $1 \
				AND ( \
					state = 'available' \
					OR (state IN ('scheduled', 'retryable') AND scheduled_at <= now()) \
				) \
				ORDER BY priority, scheduled_at, id \
				FOR UPDATE SKIP LOCKED \
				LIMIT 1 \
			) \
			RETURNING {JOB_COLUMNS}"
		))
		.bind(queue)
		.bind(client_id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(job)
	}

	pub async fn complete(&self, id: i64) -> Result<(), JobError> {
		sqlx::query("UPDATE jobs SET state = 'completed', finalized_at = now() WHERE id = $1")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(())
	}

	/// Records a failed attempt: re-enqueues with backoff until the attempt
	/// budget is exhausted, then discards.
	pub async fn fail(&self, job: &JobRow, error: &JobError) -> Result<(), JobError> {
		let entry = serde_json::to_value(AttemptError {
			at: Utc::now(),
			attempt: job.attempt,
			error: error.to_string(),
		})?;

		sqlx::query(
			"UPDATE jobs SET \
				state = CASE WHEN attempt >= max_attempts \
					THEN 'discarded'::job_state ELSE 'retryable'::job_state END, \
				finalized_at = CASE WHEN attempt >= max_attempts THEN now() ELSE NULL END, \
				scheduled_at = now() + make_interval(secs => $2), \
				errors = errors || jsonb_build_array($3::jsonb) \
			WHERE id = $1",
		)
		.bind(job.id)
		.bind(backoff_seconds(job.attempt))
		.bind(sqlx::types::Json(entry))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	pub async fn cancel(&self, job: &JobRow, reason: &str) -> Result<(), JobError> {
		let entry = serde_json::to_value(AttemptError {
			at: Utc::now(),
			attempt: job.attempt,
			error: reason.to_string(),
		})?;

		sqlx::query(
			"UPDATE jobs SET \
				state = 'cancelled', \
				finalized_at = now(), \
				errors = errors || jsonb_build_array($2::jsonb) \
			WHERE id = $1",
		)
		.bind(job.id)
		.bind(sqlx::types::Json(entry))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Pauses one queue, or every queue when `name` is `*`. Pools for paused
	/// queues stop claiming; running jobs drain normally.
	pub async fn pause(&self, name: &str) -> Result<(), JobError> {
		if name == "*" {
			sqlx::query("UPDATE queues SET paused_at = now(), updated_at = now()")
				.execute(&self.pool)
				.await?;
			return Ok(());
		}

		let result = sqlx::query(
			"UPDATE queues SET paused_at = COALESCE(paused_at, now()), updated_at = now() \
			WHERE name = $1",
		)
		.bind(name)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(JobError::QueueNotFound(name.to_string()));
		}

		Ok(())
	}

	pub async fn resume(&self, name: &str) -> Result<(), JobError> {
		if name == "*" {
			sqlx::query("UPDATE queues SET paused_at = NULL, updated_at = now()")
				.execute(&self.pool)
				.await?;
			return Ok(());
		}

		let result =
			sqlx::query("UPDATE queues SET paused_at = NULL, updated_at = now() WHERE name = $1")
				.bind(name)
				.execute(&self.pool)
				.await?;

		if result.rows_affected() == 0 {
			return Err(JobError::QueueNotFound(name.to_string()));
		}

		Ok(())
	}

	pub async fn is_paused(&self, name: &str) -> Result<bool, JobError> {
		let paused: Option<bool> =
			sqlx::query_scalar("SELECT paused_at IS NOT NULL FROM queues WHERE name = $1")
				.bind(name)
				.fetch_optional(&self.pool)
				.await?;

		Ok(paused.unwrap_or(false))
	}
}
