//! Fans the periodic statistics refresh out into one job per extension.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
	catalog::CatalogStore,
	job::{InsertManyParams, InsertOpts, JobArgs, JobContext, JobError, JobHandler},
};

use super::{UpdateExtensionStatsArgs, UPDATE_EXTENSION_STATS_QUEUE};

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct UpdateAllExtensionsStatsArgs;

impl JobArgs for UpdateAllExtensionsStatsArgs {
	const KIND: &'static str = "updateAllExtensionsStats";

	fn insert_opts() -> InsertOpts {
		InsertOpts {
			queue: Some(UPDATE_EXTENSION_STATS_QUEUE.into()),
			max_attempts: Some(5),
			..Default::default()
		}
	}
}

pub struct UpdateAllExtensionsStatsWorker {
	pub catalog: CatalogStore,
}

#[async_trait]
impl JobHandler for UpdateAllExtensionsStatsWorker {
	type Args = UpdateAllExtensionsStatsArgs;

	fn timeout(&self) -> Duration {
		Duration::from_secs(5 * 60)
	}

	async fn run(
		&self,
		_args: UpdateAllExtensionsStatsArgs,
		ctx: &JobContext,
	) -> Result<(), JobError> {
		info!("getting all extensions for stats update");

		let extensions = ctx
			.cancellable(self.catalog.list_extensions_for_update())
			.await?;

		let batch = extensions
			.into_iter()
			.map(|extension| {
				InsertManyParams::new(&UpdateExtensionStatsArgs {
					publisher_name: extension.publisher_name,
					extension_name: extension.name,
				})
			})
			.collect::<Result<Vec<_>, _>>()?;

		if !batch.is_empty() {
			ctx.cancellable(ctx.queue().insert_many(&batch)).await?;
		}

		info!("updating {} extensions in batch", batch.len());

		Ok(())
	}
}
