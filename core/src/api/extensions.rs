//! Extension endpoints: search, lookup, and the enqueueing operations.

use axum::{
	extract::{Path, Query, State},
	http::HeaderMap,
	Json,
};
use serde::{Deserialize, Serialize};
use themedex_colorspace::{hex_to_lab_string, lab_string_to_hex, ColorError};
use tracing::error;

use crate::{
	catalog::{SearchParams, SearchRow, SearchTheme, SearchThemePartial},
	job::{InsertManyParams, InsertOpts, JobRow},
	marketplace::{Direction, SortBy},
	workers::{
		ScanExtensionsArgs, SyncExtensionArgs, SYNC_EXTENSION_LOW_PRIORITY_QUEUE,
	},
};

use super::{error::ApiError, ApiState};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
	pub text: String,
	pub editor_background: String,
	pub language: String,
	pub sort_by: String,
	pub color_distance: i32,
	pub publisher_name: String,
	pub extension_name: String,
	pub theme_name: String,
	pub extensions_page_number: i32,
	pub extensions_page_size: i32,
	pub themes_page_number: i32,
	pub themes_page_size: i32,
}

impl Default for SearchQuery {
	fn default() -> Self {
		Self {
			text: String::new(),
			editor_background: String::new(),
			language: "js".to_string(),
			sort_by: "relevance".to_string(),
			color_distance: 10,
			publisher_name: String::new(),
			extension_name: String::new(),
			theme_name: String::new(),
			extensions_page_number: 1,
			extensions_page_size: 10,
			themes_page_number: 1,
			themes_page_size: 10,
		}
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
	pub total: i64,
	pub extensions: Vec<ExtensionPayload>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionPayload {
	pub name: String,
	pub display_name: String,
	pub publisher_name: String,
	pub publisher_display_name: String,
	pub short_description: Option<String>,
	pub themes: Vec<ThemePartialPayload>,
	pub total_themes: i64,
	pub theme: Option<ThemePayload>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemePartialPayload {
	pub name: String,
	pub display_name: String,
	pub editor_background: String,
	pub activity_bar_badge_background: String,
	pub url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemePayload {
	pub url: String,
	pub name: String,
	pub display_name: String,
	pub editor_background: String,
	pub editor_foreground: String,
	pub activity_bar_background: String,
	pub activity_bar_foreground: String,
	pub activity_bar_in_active_foreground: String,
	pub activity_bar_border: Option<String>,
	pub activity_bar_active_border: String,
	pub activity_bar_active_background: Option<String>,
	pub activity_bar_badge_background: String,
	pub activity_bar_badge_foreground: String,
	pub tabs_container_background: Option<String>,
	pub tabs_container_border: Option<String>,
	pub status_bar_background: Option<String>,
	pub status_bar_foreground: String,
	pub status_bar_border: Option<String>,
	pub tab_active_background: Option<String>,
	pub tab_inactive_background: Option<String>,
	pub tab_active_foreground: String,
	pub tab_border: String,
	pub tab_active_border: Option<String>,
	pub tab_active_border_top: Option<String>,
	pub title_bar_active_background: String,
	pub title_bar_active_foreground: String,
	pub title_bar_border: Option<String>,
}

pub async fn search(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
	state.auth.authorize(&headers, &["extension:read"])?;

	let editor_background = if query.editor_background.is_empty() {
		String::new()
	} else {
		hex_to_lab_string(&query.editor_background)
			.map_err(|_| ApiError::BadRequest("Invalid editorBackground".to_string()))?
	};

	let rows = state
		.catalog
		.search(&SearchParams {
			text: query.text,
			editor_background,
			language: query.language,
			sort_by: query.sort_by,
			color_distance: query.color_distance,
			publisher_name: query.publisher_name,
			extension_name: query.extension_name,
			theme_name: query.theme_name,
			extensions_page_number: query.extensions_page_number,
			extensions_page_size: query.extensions_page_size,
			themes_page_number: query.themes_page_number,
			themes_page_size: query.themes_page_size,
		})
		.await?;

	let total = rows.first().map(|row| row.total).unwrap_or(0);
	let extensions = rows.into_iter().map(build_extension_payload).collect();

	Ok(Json(SearchResponse { total, extensions }))
}

/// Converts one search row back to the hex wire format. Themes whose stored
/// colors fail to parse are dropped (logged), never the whole extension.
fn build_extension_payload(row: SearchRow) -> ExtensionPayload {
	let theme = row.theme.as_ref().and_then(|theme| {
		convert_theme(&theme.0)
			.map_err(|e| log_theme_error(&row, &theme.0.name, e))
			.ok()
	});

	let themes = row
		.themes
		.0
		.iter()
		.filter_map(|partial| {
			convert_theme_partial(partial)
				.map_err(|e| log_theme_error(&row, &partial.name, e))
				.ok()
		})
		.collect();

	ExtensionPayload {
		name: row.name,
		display_name: row.display_name,
		publisher_name: row.publisher_name,
		publisher_display_name: row.publisher_display_name,
		short_description: row.short_description,
		themes,
		total_themes: row.total_themes,
		theme,
	}
}

fn log_theme_error(row: &SearchRow, theme_name: &str, error: ColorError) {
	error!(
		theme_name,
		extension_name = %row.name,
		publisher_name = %row.publisher_name,
		"failed to convert stored color to hex: {error}"
	);
}

fn convert_theme_partial(
	theme: &SearchThemePartial,
) -> Result<ThemePartialPayload, ColorError> {
	Ok(ThemePartialPayload {
		name: theme.name.clone(),
		display_name: theme.display_name.clone(),
		editor_background: lab_string_to_hex(&theme.editor_background)?,
		activity_bar_badge_background: lab_string_to_hex(&theme.activity_bar_badge_background)?,
		url: theme.url.clone(),
	})
}

fn convert_theme(theme: &SearchTheme) -> Result<ThemePayload, ColorError> {
	let hex = lab_string_to_hex;
	let hex_opt = |lab: &Option<String>| lab.as_deref().map(hex).transpose();

	Ok(ThemePayload {
		url: theme.url.clone(),
		name: theme.name.clone(),
		display_name: theme.display_name.clone(),
		editor_background: hex(&theme.editor_background)?,
		editor_foreground: hex(&theme.editor_foreground)?,
		activity_bar_background: hex(&theme.activity_bar_background)?,
		activity_bar_foreground: hex(&theme.activity_bar_foreground)?,
		activity_bar_in_active_foreground: hex(&theme.activity_bar_in_active_foreground)?,
		activity_bar_border: hex_opt(&theme.activity_bar_border)?,
		activity_bar_active_border: hex(&theme.activity_bar_active_border)?,
		activity_bar_active_background: hex_opt(&theme.activity_bar_active_background)?,
		activity_bar_badge_background: hex(&theme.activity_bar_badge_background)?,
		activity_bar_badge_foreground: hex(&theme.activity_bar_badge_foreground)?,
		tabs_container_background: hex_opt(&theme.tabs_container_background)?,
		tabs_container_border: hex_opt(&theme.tabs_container_border)?,
		status_bar_background: hex_opt(&theme.status_bar_background)?,
		status_bar_foreground: hex(&theme.status_bar_foreground)?,
		status_bar_border: hex_opt(&theme.status_bar_border)?,
		tab_active_background: hex_opt(&theme.tab_active_background)?,
		tab_inactive_background: hex_opt(&theme.tab_inactive_background)?,
		tab_active_foreground: hex(&theme.tab_active_foreground)?,
		tab_border: hex(&theme.tab_border)?,
		tab_active_border: hex_opt(&theme.tab_active_border)?,
		tab_active_border_top: hex_opt(&theme.tab_active_border_top)?,
		title_bar_active_background: hex(&theme.title_bar_active_background)?,
		title_bar_active_foreground: hex(&theme.title_bar_active_foreground)?,
		title_bar_border: hex_opt(&theme.title_bar_border)?,
	})
}

#[derive(Deserialize)]
pub struct GetExtensionQuery {
	#[serde(default = "default_language")]
	pub language: String,
}

fn default_language() -> String {
	"js".to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetExtensionResponse {
	pub extension: GetExtensionPayload,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetExtensionPayload {
	pub name: String,
	pub display_name: String,
	pub publisher_name: String,
	pub publisher_display_name: String,
	pub short_description: Option<String>,
	pub themes: Vec<GetExtensionTheme>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetExtensionTheme {
	pub name: String,
	pub display_name: String,
	pub editor_background: String,
	pub url: Option<String>,
}

pub async fn get_extension(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Path((publisher, name)): Path<(String, String)>,
	Query(query): Query<GetExtensionQuery>,
) -> Result<Json<GetExtensionResponse>, ApiError> {
	state.auth.authorize(&headers, &["extension:read"])?;

	let extension = state
		.catalog
		.get_extension(&publisher, &name, &query.language)
		.await?
		.ok_or_else(|| ApiError::NotFound("Extension not found".to_string()))?;

	let themes = extension
		.themes
		.0
		.into_iter()
		.filter_map(|theme| {
			let editor_background = lab_string_to_hex(&theme.editor_background).ok()?;
			Some(GetExtensionTheme {
				name: theme.name,
				display_name: theme.display_name,
				editor_background,
				url: theme.url,
			})
		})
		.collect();

	Ok(Json(GetExtensionResponse {
		extension: GetExtensionPayload {
			name: extension.name,
			display_name: extension.display_name,
			publisher_name: extension.publisher_name,
			publisher_display_name: extension.publisher_display_name,
			short_description: extension.short_description,
			themes,
		},
	}))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQuery {
	#[serde(rename = "type", default = "default_scan_type")]
	pub scan_type: String,
	#[serde(default)]
	pub max_extensions: Option<u64>,
}

fn default_scan_type() -> String {
	"lastUpdated".to_string()
}

#[derive(Serialize)]
pub struct JobResponse {
	pub job: JobRow,
}

pub async fn scan(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Query(query): Query<ScanQuery>,
) -> Result<Json<JobResponse>, ApiError> {
	state.auth.authorize(&headers, &["extension:write"])?;

	let sort_by = match query.scan_type.as_str() {
		"lastUpdated" => SortBy::LastUpdated,
		"mostInstalled" => SortBy::Installs,
		unknown => {
			return Err(ApiError::BadRequest(format!("Unknown scan type: {unknown}")));
		}
	};

	let args = ScanExtensionsArgs {
		max_extensions: query.max_extensions,
		sort_by,
		sort_direction: Direction::Desc,
		..Default::default()
	};

	let mut tx = state.catalog.pool().begin().await?;
	let job = state.queue.insert_tx(&mut tx, &args, None).await?;
	tx.commit().await?;

	Ok(Json(JobResponse { job }))
}

pub async fn sync_extension(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Path((publisher, name)): Path<(String, String)>,
) -> Result<Json<JobResponse>, ApiError> {
	state.auth.authorize(&headers, &["extension:write"])?;

	// Publisher and extension names never contain dots; a dotted publisher
	// would make the object-store key scheme ambiguous.
	if publisher.is_empty() || name.is_empty() || publisher.contains('.') || name.contains('.') {
		return Err(ApiError::BadRequest("Invalid slug format".to_string()));
	}

	let args = SyncExtensionArgs {
		publisher_name: publisher,
		extension_name: name,
		force: false,
	};

	let mut tx = state.catalog.pool().begin().await?;
	let job = state.queue.insert_tx(&mut tx, &args, None).await?;
	tx.commit().await?;

	Ok(Json(JobResponse { job }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceSyncResponse {
	pub extensions_to_sync: usize,
}

/// Re-enqueues every known extension with `force`, on the low-priority
/// queue so interactive syncs keep precedence.
pub async fn force_sync(
	State(state): State<ApiState>,
	headers: HeaderMap,
) -> Result<Json<ForceSyncResponse>, ApiError> {
	state.auth.authorize(&headers, &["extension:write"])?;

	let extensions = state.catalog.list_extensions_for_update().await?;

	let batch = extensions
		.iter()
		.map(|extension| {
			InsertManyParams::with_opts(
				&SyncExtensionArgs {
					publisher_name: extension.publisher_name.clone(),
					extension_name: extension.name.clone(),
					force: true,
				},
				InsertOpts {
					queue: Some(SYNC_EXTENSION_LOW_PRIORITY_QUEUE.into()),
					..Default::default()
				},
			)
		})
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| {
			error!("failed to serialize sync args: {e}");
			ApiError::Internal
		})?;

	if !batch.is_empty() {
		state.queue.insert_many(&batch).await?;
	}

	Ok(Json(ForceSyncResponse {
		extensions_to_sync: extensions.len(),
	}))
}
