//! Job inspection and queue pause/resume.

use axum::{
	extract::{Path, Query, State},
	http::HeaderMap,
	Json,
};
use serde::Deserialize;

use super::{error::ApiError, extensions::JobResponse, ApiState};

pub async fn get_job(
	State(state): State<ApiState>,
	Path(id): Path<i64>,
) -> Result<Json<JobResponse>, ApiError> {
	let job = state
		.queue
		.get(id)
		.await?
		.ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

	Ok(Json(JobResponse { job }))
}

#[derive(Deserialize)]
pub struct QueueQuery {
	/// Queue name, or `*` for every queue.
	pub queue: Option<String>,
}

pub async fn pause(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Query(query): Query<QueueQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
	state.auth.authorize(&headers, &["jobs:write"])?;

	let queue = query
		.queue
		.ok_or_else(|| ApiError::BadRequest("Missing queue parameter".to_string()))?;
	state.queue.pause(&queue).await?;

	Ok(Json(serde_json::json!({})))
}

pub async fn resume(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Query(query): Query<QueueQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
	state.auth.authorize(&headers, &["jobs:write"])?;

	let queue = query
		.queue
		.ok_or_else(|| ApiError::BadRequest("Missing queue parameter".to_string()))?;
	state.queue.resume(&queue).await?;

	Ok(Json(serde_json::json!({})))
}
