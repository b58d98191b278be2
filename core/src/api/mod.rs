//! HTTP surface: a thin authenticated adapter over the catalog and the job
//! queue.

use std::sync::Arc;

use axum::{
	extract::State,
	routing::{get, post},
	Json, Router,
};

use crate::{catalog::CatalogStore, job::Queue};

mod auth;
mod colors;
mod error;
mod extensions;
mod jobs;

pub use auth::{AuthVerifier, Claims};
pub use error::ApiError;

#[derive(Clone)]
pub struct ApiState {
	pub catalog: CatalogStore,
	pub queue: Queue,
	pub auth: Arc<AuthVerifier>,
}

pub fn router(state: ApiState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/extensions/search", get(extensions::search))
		.route("/extensions/scan", post(extensions::scan))
		.route("/extensions/force-sync", post(extensions::force_sync))
		.route(
			"/extensions/{publisher}/{name}",
			get(extensions::get_extension),
		)
		.route(
			"/extensions/{publisher}/{name}/sync",
			post(extensions::sync_extension),
		)
		.route("/jobs/{id}", get(jobs::get_job))
		.route("/jobs/pause", post(jobs::pause))
		.route("/jobs/resume", post(jobs::resume))
		.route("/themes/colors", get(colors::get_colors))
		.with_state(state)
}

async fn health(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
	sqlx::query("SELECT 1").execute(state.catalog.pool()).await?;

	Ok(Json(serde_json::json!({})))
}
