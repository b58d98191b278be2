//! Job kinds: scanning the marketplace, syncing extensions, refreshing
//! statistics.

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::error;

use crate::{
	catalog::{CatalogStore, UpsertExtension},
	job::{ErrorHandler, JobError, JobRow, PeriodicJob, QueueConfig, Workers},
	marketplace::{self, ExtensionResult},
	preview::PreviewRenderer,
	storage::ObjectStore,
};

mod scan_extensions;
mod sync_extension;
mod update_all_extensions_stats;
mod update_extension_stats;

pub use scan_extensions::{ScanExtensionsArgs, ScanExtensionsWorker, ScanPriority};
pub use sync_extension::{SyncExtensionArgs, SyncExtensionWorker};
pub use update_all_extensions_stats::{
	UpdateAllExtensionsStatsArgs, UpdateAllExtensionsStatsWorker,
};
pub use update_extension_stats::{UpdateExtensionStatsArgs, UpdateExtensionStatsWorker};

pub const SCAN_EXTENSIONS_QUEUE: &str = "scan-extensions";
pub const SYNC_EXTENSION_HIGH_PRIORITY_QUEUE: &str = "sync-extension-high-priority";
pub const SYNC_EXTENSION_LOW_PRIORITY_QUEUE: &str = "sync-extension-low-priority";
pub const UPDATE_EXTENSION_STATS_QUEUE: &str = "update-extension-stats";

/// Courtesy delay before every upstream gallery call.
pub(crate) const RATE_LIMIT_DELAY: Duration = Duration::from_secs(2);

/// The production pipeline is strictly serial within each queue.
pub fn queue_config() -> Vec<QueueConfig> {
	vec![
		QueueConfig::new(SCAN_EXTENSIONS_QUEUE, 1),
		QueueConfig::new(SYNC_EXTENSION_HIGH_PRIORITY_QUEUE, 1),
		QueueConfig::new(SYNC_EXTENSION_LOW_PRIORITY_QUEUE, 1),
		QueueConfig::new(UPDATE_EXTENSION_STATS_QUEUE, 1),
	]
}

/// Long-lived handles shared by the worker handlers.
#[derive(Clone)]
pub struct WorkerDeps {
	pub marketplace: marketplace::Client,
	pub http: reqwest::Client,
	pub directory: PathBuf,
	pub disable_cleanup: bool,
	pub object_store: ObjectStore,
	pub renderer: PreviewRenderer,
	pub catalog: CatalogStore,
}

pub fn register_workers(deps: WorkerDeps) -> Workers {
	let mut workers = Workers::new();

	workers.register(ScanExtensionsWorker {
		marketplace: deps.marketplace.clone(),
		catalog: deps.catalog.clone(),
	});

	workers.register(SyncExtensionWorker {
		marketplace: deps.marketplace.clone(),
		http: deps.http,
		directory: deps.directory,
		disable_cleanup: deps.disable_cleanup,
		object_store: deps.object_store,
		renderer: deps.renderer,
		catalog: deps.catalog.clone(),
	});

	workers.register(UpdateAllExtensionsStatsWorker {
		catalog: deps.catalog.clone(),
	});

	workers.register(UpdateExtensionStatsWorker {
		marketplace: deps.marketplace,
		catalog: deps.catalog,
	});

	workers
}

/// Periodic triggers: an incremental delta scan, and the fortnightly
/// statistics refresh fan-out.
pub fn periodic_jobs(scan_interval: Duration, max_extensions: Option<u64>) -> Vec<PeriodicJob> {
	vec![
		PeriodicJob::new(scan_interval, move || {
			crate::job::InsertManyParams::new(&ScanExtensionsArgs {
				max_extensions,
				sort_by: marketplace::SortBy::LastUpdated,
				sort_direction: marketplace::Direction::Desc,
				priority: ScanPriority::Low,
				batch_size: 50,
				stop_at_equal_published_date: true,
				force: false,
			})
			.expect("scan args are serializable")
		})
		.run_on_start(true),
		PeriodicJob::new(Duration::from_secs(14 * 24 * 60 * 60), || {
			crate::job::InsertManyParams::new(&UpdateAllExtensionsStatsArgs)
				.expect("stats args are serializable")
		}),
	]
}

/// Logs every job failure; retry behavior stays with the runtime.
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
	fn on_error(&self, job: &JobRow, error: &JobError) {
		error!(job_id = job.id, kind = %job.kind, attempt = job.attempt, "job errored: {error}");
	}

	fn on_panic(&self, job: &JobRow, message: &str) {
		error!(job_id = job.id, kind = %job.kind, "job panicked: {message}");
	}
}

pub(crate) fn parse_timestamp(value: &str) -> Result<NaiveDateTime, JobError> {
	chrono::DateTime::parse_from_rfc3339(value)
		.map(|parsed| parsed.naive_utc())
		.map_err(|source| JobError::Timestamp {
			value: value.to_string(),
			source,
		})
}

/// The delta gate: an extension is up to date when its saved `published_at`
/// matches the upstream payload exactly. A missing row counts as stale.
pub(crate) async fn is_extension_up_to_date(
	catalog: &CatalogStore,
	extension: &ExtensionResult,
) -> Result<bool, JobError> {
	let Some(saved) = catalog
		.get_extension_published_at(
			&extension.publisher.publisher_name,
			&extension.extension_name,
		)
		.await?
	else {
		return Ok(false);
	};

	Ok(saved == parse_timestamp(&extension.published_date)?)
}

/// Builds the extension upsert payload, pulling the five named statistics
/// out of the gallery's statistics array.
pub(crate) fn convert_upsert_extension(
	extension: &ExtensionResult,
) -> Result<UpsertExtension, JobError> {
	let decimal_statistic =
		|name: &str| Decimal::try_from(extension.statistic(name)).unwrap_or_default();

	Ok(UpsertExtension {
		upstream_id: extension.extension_id.clone(),
		name: extension.extension_name.clone(),
		display_name: extension.display_name.clone(),
		short_description: extension.short_description.clone(),
		publisher_id: extension.publisher.publisher_id.clone(),
		publisher_name: extension.publisher.publisher_name.clone(),
		publisher_display_name: extension.publisher.display_name.clone(),
		installs: extension.statistic("install") as i32,
		trending_daily: decimal_statistic("trendingdaily"),
		trending_weekly: decimal_statistic("trendingweekly"),
		trending_monthly: decimal_statistic("trendingmonthly"),
		weighted_rating: decimal_statistic("weightedRating"),
		published_at: parse_timestamp(&extension.published_date)?,
		released_at: parse_timestamp(&extension.release_date)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::marketplace::PublisherResult;

	fn extension_result() -> ExtensionResult {
		ExtensionResult {
			publisher: PublisherResult {
				publisher_id: "p-1".into(),
				publisher_name: "sdras".into(),
				display_name: "Sarah Drasner".into(),
			},
			extension_id: "e-1".into(),
			extension_name: "night-owl".into(),
			display_name: "Night Owl".into(),
			published_date: "2024-01-01T00:00:00Z".into(),
			release_date: "2018-06-15T00:00:00Z".into(),
			short_description: Some("A theme for night owls".into()),
			versions: Vec::new(),
			statistics: vec![
				crate::marketplace::StatisticResult {
					statistic_name: "install".into(),
					value: 1_500_000.0,
				},
				crate::marketplace::StatisticResult {
					statistic_name: "weightedRating".into(),
					value: 4.8,
				},
			],
		}
	}

	#[test]
	fn upsert_payload_extracts_named_statistics() {
		let payload = convert_upsert_extension(&extension_result()).unwrap();

		assert_eq!(payload.installs, 1_500_000);
		assert_eq!(payload.weighted_rating, Decimal::try_from(4.8).unwrap());
		assert_eq!(payload.trending_daily, Decimal::ZERO);
		assert_eq!(
			payload.published_at,
			parse_timestamp("2024-01-01T00:00:00Z").unwrap()
		);
	}

	#[test]
	fn bad_timestamps_are_rejected() {
		let mut extension = extension_result();
		extension.published_date = "yesterday".into();

		assert!(matches!(
			convert_upsert_extension(&extension),
			Err(JobError::Timestamp { .. })
		));
	}

	#[test]
	fn every_queue_runs_serial_by_default() {
		let queues = queue_config();
		assert_eq!(queues.len(), 4);
		assert!(queues.iter().all(|queue| queue.max_workers == 1));
	}
}
