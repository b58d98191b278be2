//! Core types for the durable job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Lifecycle state of a job row.
///
/// ```text
/// scheduled -time-> available -claim-> running -ok--> completed
///                                        |-err-----> retryable -backoff-> available
///                                        |-err at max attempts----------> discarded
///                                        '-cancel--> cancelled
/// ```
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
	Pending,
	Scheduled,
	Available,
	Running,
	Retryable,
	Completed,
	Discarded,
	Cancelled,
}

impl JobState {
	pub fn is_final(&self) -> bool {
		matches!(self, Self::Completed | Self::Discarded | Self::Cancelled)
	}
}

/// One recorded failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptError {
	pub at: DateTime<Utc>,
	pub attempt: i16,
	pub error: String,
}

/// A persisted job row.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
	pub id: i64,
	pub kind: String,
	pub queue: String,
	pub state: JobState,
	pub priority: i16,
	pub args: Json<serde_json::Value>,
	pub attempt: i16,
	pub max_attempts: i16,
	pub attempted_by: Vec<String>,
	pub attempted_at: Option<DateTime<Utc>>,
	pub scheduled_at: DateTime<Utc>,
	pub finalized_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub errors: Json<Vec<AttemptError>>,
	pub tags: Vec<String>,
	pub metadata: Json<serde_json::Value>,
}

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_ATTEMPTS: i16 = 25;
pub const DEFAULT_PRIORITY: i16 = 1;

/// Insertion options. Unset fields fall back to the job kind's defaults and
/// then to the queue-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct InsertOpts {
	pub queue: Option<String>,
	pub max_attempts: Option<i16>,
	pub priority: Option<i16>,
	pub scheduled_at: Option<DateTime<Utc>>,
	pub tags: Option<Vec<String>>,
}

impl InsertOpts {
	/// Overlays `self` on top of `defaults`, field by field.
	pub fn merged_with(self, defaults: InsertOpts) -> InsertOpts {
		InsertOpts {
			queue: self.queue.or(defaults.queue),
			max_attempts: self.max_attempts.or(defaults.max_attempts),
			priority: self.priority.or(defaults.priority),
			scheduled_at: self.scheduled_at.or(defaults.scheduled_at),
			tags: self.tags.or(defaults.tags),
		}
	}
}

/// One entry of a batched insert.
#[derive(Debug, Clone)]
pub struct InsertManyParams {
	pub kind: &'static str,
	pub args: serde_json::Value,
	pub opts: InsertOpts,
}

impl InsertManyParams {
	pub fn new<A: super::JobArgs>(args: &A) -> Result<Self, serde_json::Error> {
		Ok(Self {
			kind: A::KIND,
			args: serde_json::to_value(args)?,
			opts: A::insert_opts(),
		})
	}

	pub fn with_opts<A: super::JobArgs>(
		args: &A,
		opts: InsertOpts,
	) -> Result<Self, serde_json::Error> {
		Ok(Self {
			kind: A::KIND,
			args: serde_json::to_value(args)?,
			opts: opts.merged_with(A::insert_opts()),
		})
	}
}

/// Worker-pool sizing for one named queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
	pub name: String,
	pub max_workers: usize,
}

impl QueueConfig {
	pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
		Self {
			name: name.into(),
			max_workers,
		}
	}
}

/// Retry delay: grows with the fourth power of the attempt number.
pub fn backoff_seconds(attempt: i16) -> f64 {
	f64::from(i32::from(attempt.max(1))).powi(4)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_polynomially() {
		assert_eq!(backoff_seconds(1), 1.0);
		assert_eq!(backoff_seconds(2), 16.0);
		assert_eq!(backoff_seconds(3), 81.0);
		assert_eq!(backoff_seconds(4), 256.0);
	}

	#[test]
	fn insert_opts_overlay_field_by_field() {
		let defaults = InsertOpts {
			queue: Some("sync-extension-high-priority".into()),
			max_attempts: Some(5),
			..Default::default()
		};

		let merged = InsertOpts {
			queue: Some("sync-extension-low-priority".into()),
			..Default::default()
		}
		.merged_with(defaults);

		assert_eq!(merged.queue.as_deref(), Some("sync-extension-low-priority"));
		assert_eq!(merged.max_attempts, Some(5));
		assert_eq!(merged.priority, None);
	}

	#[test]
	fn job_state_serializes_lowercase() {
		assert_eq!(
			serde_json::to_string(&JobState::Available).unwrap(),
			"\"available\""
		);
		assert_eq!(
			serde_json::to_string(&JobState::Discarded).unwrap(),
			"\"discarded\""
		);
	}
}
