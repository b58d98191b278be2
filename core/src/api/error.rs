use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::json;
use tracing::error;

use crate::{catalog::CatalogError, job::JobError};

/// API error taxonomy; everything unknown collapses into a generic 500.
#[derive(Debug)]
pub enum ApiError {
	BadRequest(String),
	NotFound(String),
	Unauthorized,
	Forbidden,
	Internal,
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, message) = match self {
			Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
			Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
			Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
			Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
			Self::Internal => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"Internal server error".to_string(),
			),
		};

		(status, Json(json!({ "error": message }))).into_response()
	}
}

impl From<CatalogError> for ApiError {
	fn from(error: CatalogError) -> Self {
		error!("catalog error: {error}");
		Self::Internal
	}
}

impl From<JobError> for ApiError {
	fn from(error: JobError) -> Self {
		match error {
			JobError::QueueNotFound(name) => Self::NotFound(format!("Queue not found: {name}")),
			other => {
				error!("job queue error: {other}");
				Self::Internal
			}
		}
	}
}

impl From<sqlx::Error> for ApiError {
	fn from(error: sqlx::Error) -> Self {
		error!("database error: {error}");
		Self::Internal
	}
}
