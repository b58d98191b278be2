use std::time::Duration;

use thiserror::Error;

use crate::{
	catalog::CatalogError, marketplace::MarketplaceError, preview::PreviewError,
	storage::StorageError, vsix::VsixError,
};

use super::JobRow;

#[derive(Error, Debug)]
pub enum JobError {
	// Runtime errors
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("job args serialization error: {0}")]
	ArgsSerialization(#[from] serde_json::Error),
	#[error("unknown job kind: {0}")]
	UnknownKind(String),
	#[error("queue not found: {0}")]
	QueueNotFound(String),
	#[error("job timed out after {0:?}")]
	Timeout(Duration),
	#[error("job cancelled")]
	Cancelled,
	#[error("job panicked: {0}")]
	Panic(String),

	// Worker errors
	#[error("extension not found")]
	ExtensionNotFound,
	#[error("extension package not found")]
	PackageMissing,
	#[error(transparent)]
	Marketplace(#[from] MarketplaceError),
	#[error(transparent)]
	Vsix(#[from] VsixError),
	#[error(transparent)]
	Preview(#[from] PreviewError),
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Catalog(#[from] CatalogError),
	#[error("invalid color: {0}")]
	Color(#[from] themedex_colorspace::ColorError),
	#[error("invalid timestamp {value:?}: {source}")]
	Timestamp {
		value: String,
		source: chrono::ParseError,
	},
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
}

/// Runtime-level hook receiving every job failure. The default
/// implementations leave the retry behavior unchanged.
pub trait ErrorHandler: Send + Sync {
	fn on_error(&self, _job: &JobRow, _error: &JobError) {}

	fn on_panic(&self, _job: &JobRow, _message: &str) {}
}

/// Handler used when none is configured.
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {}
