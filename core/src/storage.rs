//! Object store client for rendered preview images.

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use base64::Engine;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
	#[error("failed to read object body: {0}")]
	Body(#[from] std::io::Error),
	#[error("failed to upload object {key}: {message}")]
	Upload { key: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
	pub endpoint: String,
	pub bucket: String,
	pub region: String,
	pub access_key_id: String,
	pub access_key_secret: String,
	pub cdn_base_url: String,
}

/// S3-compatible store. Blobs are append-only; concurrent syncs never
/// overwrite each other because every key carries a per-job cache-bust token.
#[derive(Clone)]
pub struct ObjectStore {
	client: aws_sdk_s3::Client,
	bucket: String,
	cdn_base_url: String,
}

impl ObjectStore {
	pub async fn new(config: ObjectStoreConfig) -> Self {
		let credentials = Credentials::new(
			config.access_key_id,
			config.access_key_secret,
			None,
			None,
			"static",
		);

		let sdk_config = aws_config::defaults(BehaviorVersion::latest())
			.credentials_provider(credentials)
			.region(Region::new(config.region))
			.endpoint_url(&config.endpoint)
			.load()
			.await;

		Self {
			client: aws_sdk_s3::Client::new(&sdk_config),
			bucket: config.bucket,
			cdn_base_url: config.cdn_base_url,
		}
	}

	pub async fn put(
		&self,
		key: &str,
		body: ByteStream,
		content_type: &str,
		cache_control: &str,
	) -> Result<(), StorageError> {
		self.client
			.put_object()
			.bucket(&self.bucket)
			.key(key)
			.body(body)
			.content_type(content_type)
			.cache_control(cache_control)
			.send()
			.await
			.map_err(|e| StorageError::Upload {
				key: key.to_string(),
				message: DisplayErrorContext(&e).to_string(),
			})?;

		Ok(())
	}

	/// Public URL the CDN serves this key under.
	pub fn public_url(&self, key: &str) -> String {
		format!("{}/{}", self.cdn_base_url, key)
	}
}

/// URL-safe token derived from the job id, injected into every uploaded key
/// so CDN caches invalidate atomically per sync.
pub fn cache_bust_token(job_id: i64) -> String {
	let bytes = job_id.to_be_bytes();
	let significant: Vec<u8> = bytes.iter().copied().skip_while(|byte| *byte == 0).collect();

	base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(significant)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cache_bust_token_strips_leading_zero_bytes() {
		assert_eq!(cache_bust_token(1), "AQ");
		assert_eq!(cache_bust_token(256), "AQA");
		assert_eq!(cache_bust_token(0), "");
	}

	#[test]
	fn cache_bust_token_differs_per_job() {
		assert_ne!(cache_bust_token(41), cache_bust_token(42));
	}
}
