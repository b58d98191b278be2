//! Walks marketplace pages and enqueues sync jobs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
	catalog::CatalogStore,
	job::{InsertManyParams, InsertOpts, JobArgs, JobContext, JobError, JobHandler},
	marketplace::{self, Direction, QueryOptions, SortBy},
};

use super::{
	is_extension_up_to_date, SyncExtensionArgs, RATE_LIMIT_DELAY, SCAN_EXTENSIONS_QUEUE,
	SYNC_EXTENSION_HIGH_PRIORITY_QUEUE, SYNC_EXTENSION_LOW_PRIORITY_QUEUE,
};

const DEFAULT_BATCH_SIZE: u32 = 50;

/// Which sync queue the scan feeds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPriority {
	High,
	#[default]
	Low,
}

impl ScanPriority {
	pub fn sync_queue(&self) -> &'static str {
		match self {
			Self::High => SYNC_EXTENSION_HIGH_PRIORITY_QUEUE,
			Self::Low => SYNC_EXTENSION_LOW_PRIORITY_QUEUE,
		}
	}
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanExtensionsArgs {
	pub priority: ScanPriority,
	pub sort_by: SortBy,
	pub sort_direction: Direction,
	pub batch_size: u32,
	/// `None` scans every page the gallery returns.
	pub max_extensions: Option<u64>,
	/// Stop at the first extension whose saved `published_at` matches
	/// upstream. Combined with a last-updated descending sort this makes
	/// the periodic scan an incremental delta sync.
	pub stop_at_equal_published_date: bool,
	pub force: bool,
}

impl Default for ScanExtensionsArgs {
	fn default() -> Self {
		Self {
			priority: ScanPriority::Low,
			sort_by: SortBy::LastUpdated,
			sort_direction: Direction::Desc,
			batch_size: DEFAULT_BATCH_SIZE,
			max_extensions: None,
			stop_at_equal_published_date: false,
			force: false,
		}
	}
}

impl JobArgs for ScanExtensionsArgs {
	const KIND: &'static str = "scanExtensions";

	// Scanning is cheap to retry on the next periodic tick; a failed scan
	// must not pile up behind itself.
	fn insert_opts() -> InsertOpts {
		InsertOpts {
			queue: Some(SCAN_EXTENSIONS_QUEUE.into()),
			max_attempts: Some(1),
			..Default::default()
		}
	}
}

pub struct ScanExtensionsWorker {
	pub marketplace: marketplace::Client,
	pub catalog: CatalogStore,
}

#[async_trait]
impl JobHandler for ScanExtensionsWorker {
	type Args = ScanExtensionsArgs;

	fn timeout(&self) -> Duration {
		Duration::from_secs(5 * 60)
	}

	async fn run(&self, args: ScanExtensionsArgs, ctx: &JobContext) -> Result<(), JobError> {
		let insert_queue = args.priority.sync_queue();
		let batch_size = if args.batch_size > 0 {
			args.batch_size
		} else {
			DEFAULT_BATCH_SIZE
		};
		let max_extensions = args.max_extensions.unwrap_or(u64::MAX);

		let mut scanned: u64 = 0;
		let mut page_number = 1;
		let mut stop_scanning = false;

		while !stop_scanning {
			info!("scanning page {page_number}");

			ctx.sleep(RATE_LIMIT_DELAY).await?;

			let results = ctx
				.cancellable(self.marketplace.query(QueryOptions {
					sort_by: args.sort_by,
					direction: args.sort_direction,
					criteria: QueryOptions::theme_criteria(),
					page_number,
					page_size: batch_size,
				}))
				.await?;

			if results.is_empty() {
				info!("no more extensions found, stopping scan");
				break;
			}

			page_number += 1;

			let mut batch = Vec::new();
			for extension in results {
				if scanned >= max_extensions {
					info!("reached max extensions, stopping scan");
					stop_scanning = true;
					break;
				}

				if args.stop_at_equal_published_date
					&& is_extension_up_to_date(&self.catalog, &extension).await?
				{
					info!(
						"extension {}.{} is up to date, stopping scan",
						extension.publisher.publisher_name, extension.extension_name
					);
					stop_scanning = true;
					break;
				}

				debug!(
					"adding extension to batch: {}.{}",
					extension.publisher.publisher_name, extension.extension_name
				);

				batch.push(InsertManyParams::with_opts(
					&SyncExtensionArgs {
						publisher_name: extension.publisher.publisher_name,
						extension_name: extension.extension_name,
						force: args.force,
					},
					InsertOpts {
						queue: Some(insert_queue.into()),
						..Default::default()
					},
				)?);

				scanned += 1;
			}

			if !batch.is_empty() {
				ctx.cancellable(ctx.queue().insert_many(&batch)).await?;
			}

			info!("scanned {} extensions in batch, {scanned} total", batch.len());
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn priority_selects_the_sync_queue() {
		assert_eq!(
			ScanPriority::High.sync_queue(),
			SYNC_EXTENSION_HIGH_PRIORITY_QUEUE
		);
		assert_eq!(
			ScanPriority::Low.sync_queue(),
			SYNC_EXTENSION_LOW_PRIORITY_QUEUE
		);
	}

	#[test]
	fn args_round_trip_through_json() {
		let args = ScanExtensionsArgs {
			priority: ScanPriority::High,
			sort_by: SortBy::Installs,
			sort_direction: Direction::Desc,
			batch_size: 25,
			max_extensions: Some(100),
			stop_at_equal_published_date: true,
			force: true,
		};

		let json = serde_json::to_value(&args).unwrap();
		assert_eq!(json["priority"], "high");
		assert_eq!(json["sortBy"], 4);
		assert_eq!(json["sortDirection"], 2);

		let decoded: ScanExtensionsArgs = serde_json::from_value(json).unwrap();
		assert_eq!(decoded.batch_size, 25);
		assert_eq!(decoded.max_extensions, Some(100));
	}

	#[test]
	fn omitted_fields_fall_back_to_defaults() {
		let decoded: ScanExtensionsArgs = serde_json::from_value(serde_json::json!({})).unwrap();

		assert_eq!(decoded.priority, ScanPriority::Low);
		assert_eq!(decoded.sort_by, SortBy::LastUpdated);
		assert_eq!(decoded.batch_size, DEFAULT_BATCH_SIZE);
		assert_eq!(decoded.max_extensions, None);
		assert!(!decoded.stop_at_equal_published_date);
	}

	#[test]
	fn scan_jobs_never_retry() {
		assert_eq!(ScanExtensionsArgs::insert_opts().max_attempts, Some(1));
		assert_eq!(
			ScanExtensionsArgs::insert_opts().queue.as_deref(),
			Some(SCAN_EXTENSIONS_QUEUE)
		);
	}
}
