//! Lightweight non-image refresh of one extension's statistics.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
	catalog::CatalogStore,
	job::{InsertOpts, JobArgs, JobContext, JobError, JobHandler},
	marketplace::{self, QueryOptions},
};

use super::{convert_upsert_extension, RATE_LIMIT_DELAY, UPDATE_EXTENSION_STATS_QUEUE};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExtensionStatsArgs {
	pub publisher_name: String,
	pub extension_name: String,
}

impl JobArgs for UpdateExtensionStatsArgs {
	const KIND: &'static str = "updateExtensionStats";

	fn insert_opts() -> InsertOpts {
		InsertOpts {
			queue: Some(UPDATE_EXTENSION_STATS_QUEUE.into()),
			max_attempts: Some(5),
			..Default::default()
		}
	}
}

pub struct UpdateExtensionStatsWorker {
	pub marketplace: marketplace::Client,
	pub catalog: CatalogStore,
}

#[async_trait]
impl JobHandler for UpdateExtensionStatsWorker {
	type Args = UpdateExtensionStatsArgs;

	fn timeout(&self) -> Duration {
		Duration::from_secs(60)
	}

	async fn run(&self, args: UpdateExtensionStatsArgs, ctx: &JobContext) -> Result<(), JobError> {
		let slug = format!("{}.{}", args.publisher_name, args.extension_name);
		info!("updating extension stats: {slug}");

		ctx.sleep(RATE_LIMIT_DELAY).await?;

		let mut results = ctx
			.cancellable(self.marketplace.query(QueryOptions::by_slug(&slug)))
			.await?;
		if results.is_empty() {
			return Err(JobError::ExtensionNotFound);
		}
		let extension = results.swap_remove(0);

		let upsert = convert_upsert_extension(&extension)?;

		info!("saving extension stats to database");
		ctx.cancellable(self.catalog.upsert_extension(&upsert))
			.await?;
		info!("extension stats saved to database");

		Ok(())
	}
}
