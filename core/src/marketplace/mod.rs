//! Client for the upstream extension gallery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod query;

pub use query::{Criterion, Direction, FilterType, QueryOptions, SortBy};

const DEFAULT_BASE_URL: &str = "https://marketplace.visualstudio.com/_apis";
const VSIX_ASSET_TYPE: &str = "Microsoft.VisualStudio.Services.VSIXPackage";

#[derive(Error, Debug)]
pub enum MarketplaceError {
	#[error("gallery request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("gallery responded with unexpected status code: {0}")]
	Status(u16),
	#[error("gallery response contained no results")]
	EmptyResponse,
}

#[derive(Clone)]
pub struct Client {
	base_url: String,
	http: reqwest::Client,
}

impl Default for Client {
	fn default() -> Self {
		Self::new()
	}
}

impl Client {
	pub fn new() -> Self {
		Self::with_base_url(DEFAULT_BASE_URL)
	}

	/// Point the client at a different gallery, used by tests and staging.
	pub fn with_base_url(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			http: reqwest::Client::new(),
		}
	}

	/// POSTs one paged extension query and decodes the response envelope.
	pub async fn query(
		&self,
		options: QueryOptions,
	) -> Result<Vec<ExtensionResult>, MarketplaceError> {
		let body = QueryBody {
			filters: vec![options],
			flags: 870,
		};

		let response = self
			.http
			.post(format!("{}/public/gallery/extensionquery", self.base_url))
			.header(
				"Accept",
				"application/json;api-version=5.2-preview.1;excludeUrls=true",
			)
			.json(&body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(MarketplaceError::Status(response.status().as_u16()));
		}

		let mut decoded: QueryResponse = response.json().await?;
		if decoded.results.is_empty() {
			return Err(MarketplaceError::EmptyResponse);
		}

		Ok(decoded.results.swap_remove(0).extensions)
	}
}

#[derive(Serialize, Debug)]
struct QueryBody {
	filters: Vec<QueryOptions>,
	flags: i32,
}

#[derive(Deserialize, Debug)]
struct QueryResponse {
	#[serde(default)]
	results: Vec<QueryResult>,
}

#[derive(Deserialize, Debug)]
struct QueryResult {
	#[serde(default)]
	extensions: Vec<ExtensionResult>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionResult {
	pub publisher: PublisherResult,
	pub extension_id: String,
	pub extension_name: String,
	pub display_name: String,
	pub published_date: String,
	pub release_date: String,
	#[serde(default)]
	pub short_description: Option<String>,
	#[serde(default)]
	pub versions: Vec<VersionResult>,
	#[serde(default)]
	pub statistics: Vec<StatisticResult>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublisherResult {
	pub publisher_id: String,
	pub publisher_name: String,
	pub display_name: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
	pub version: String,
	pub last_updated: DateTime<Utc>,
	#[serde(default)]
	pub files: Vec<AssetFile>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetFile {
	pub asset_type: String,
	pub source: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatisticResult {
	pub statistic_name: String,
	pub value: f64,
}

impl ExtensionResult {
	/// The version with the most recent `lastUpdated` timestamp.
	pub fn latest_version(&self) -> Option<&VersionResult> {
		self.versions.iter().max_by_key(|version| version.last_updated)
	}

	/// Download URL of the VSIX package asset, or `""` when absent.
	pub fn package_url(&self) -> &str {
		self.latest_version()
			.and_then(|version| {
				version
					.files
					.iter()
					.find(|file| file.asset_type == VSIX_ASSET_TYPE)
			})
			.map(|file| file.source.as_str())
			.unwrap_or("")
	}

	/// Named statistic value, defaulting to 0 when the gallery omits it.
	pub fn statistic(&self, name: &str) -> f64 {
		self.statistics
			.iter()
			.find(|statistic| statistic.statistic_name == name)
			.map(|statistic| statistic.value)
			.unwrap_or(0.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ENVELOPE: &str = r#"{
		"results": [{
			"extensions": [{
				"publisher": {
					"publisherId": "p-1",
					"publisherName": "sdras",
					"displayName": "Sarah Drasner"
				},
				"extensionId": "e-1",
				"extensionName": "night-owl",
				"displayName": "Night Owl",
				"publishedDate": "2024-01-01T00:00:00Z",
				"releaseDate": "2018-06-15T00:00:00Z",
				"shortDescription": "A theme for night owls",
				"versions": [
					{
						"version": "2.0.0",
						"lastUpdated": "2024-01-01T00:00:00Z",
						"files": [
							{"assetType": "Microsoft.VisualStudio.Services.Icons.Default", "source": "https://cdn.test/icon.png"},
							{"assetType": "Microsoft.VisualStudio.Services.VSIXPackage", "source": "https://cdn.test/night-owl-2.vsix"}
						]
					},
					{
						"version": "1.0.0",
						"lastUpdated": "2018-06-15T00:00:00Z",
						"files": [
							{"assetType": "Microsoft.VisualStudio.Services.VSIXPackage", "source": "https://cdn.test/night-owl-1.vsix"}
						]
					}
				],
				"statistics": [
					{"statisticName": "install", "value": 1500000},
					{"statisticName": "weightedRating", "value": 4.8}
				]
			}]
		}]
	}"#;

	fn decode() -> ExtensionResult {
		let mut response: QueryResponse = serde_json::from_str(ENVELOPE).unwrap();
		response.results.swap_remove(0).extensions.swap_remove(0)
	}

	#[test]
	fn latest_version_picks_newest_last_updated() {
		let extension = decode();
		assert_eq!(extension.latest_version().unwrap().version, "2.0.0");
	}

	#[test]
	fn package_url_targets_the_vsix_asset() {
		let extension = decode();
		assert_eq!(extension.package_url(), "https://cdn.test/night-owl-2.vsix");
	}

	#[test]
	fn package_url_is_empty_without_versions() {
		let mut extension = decode();
		extension.versions.clear();
		assert_eq!(extension.package_url(), "");
	}

	#[test]
	fn statistics_default_to_zero() {
		let extension = decode();
		assert_eq!(extension.statistic("install"), 1_500_000.0);
		assert_eq!(extension.statistic("trendingdaily"), 0.0);
	}

	#[test]
	fn query_body_serializes_enums_as_integers() {
		let body = QueryBody {
			filters: vec![QueryOptions {
				sort_by: SortBy::Installs,
				direction: Direction::Desc,
				criteria: vec![Criterion::new(FilterType::Slug, "sdras.night-owl")],
				..QueryOptions::default()
			}],
			flags: 870,
		};

		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json["flags"], 870);
		assert_eq!(json["filters"][0]["sortBy"], 4);
		assert_eq!(json["filters"][0]["direction"], 2);
		assert_eq!(json["filters"][0]["criteria"][0]["filterType"], 7);
		assert_eq!(json["filters"][0]["pageNumber"], 1);
		assert_eq!(json["filters"][0]["pageSize"], 100);
	}
}
