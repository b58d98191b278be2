//! Runtime configuration for the two server roles.

use std::{path::PathBuf, time::Duration};

use crate::storage::ObjectStoreConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
	pub host: String,
	pub port: u16,
	pub database_url: String,
	pub public_key_path: PathBuf,
	pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	pub database_url: String,
	/// Root of the per-job scratch directories (`<dir>/jobs/<job_id>`).
	pub directory: PathBuf,
	pub object_store: ObjectStoreConfig,
	pub disable_cleanup: bool,
	/// Page-walk budget for the periodic scan; `None` scans everything.
	pub max_extensions: Option<u64>,
	pub scan_interval: Duration,
	/// Command line of the preview renderer, e.g. `npx vscodethemes`.
	pub renderer_command: String,
	/// Working directory the renderer runs in.
	pub renderer_dir: PathBuf,
}
