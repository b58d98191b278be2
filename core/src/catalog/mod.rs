//! Catalog persistence: extensions, themes, preview images.
//!
//! Every theme color column is a `cube` 3-vector in the database, written
//! and read as the textual `"(L, a, b)"` triple so the color-distance index
//! stays usable across writers.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{types::Json, PgExecutor, PgPool};
use thiserror::Error;

mod search;

pub use search::{SearchParams, SearchRow, SearchTheme, SearchThemePartial};

#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct UpsertExtension {
	pub upstream_id: String,
	pub name: String,
	pub display_name: String,
	pub short_description: Option<String>,
	pub publisher_id: String,
	pub publisher_name: String,
	pub publisher_display_name: String,
	pub installs: i32,
	pub trending_daily: Decimal,
	pub trending_weekly: Decimal,
	pub trending_monthly: Decimal,
	pub weighted_rating: Decimal,
	pub published_at: NaiveDateTime,
	pub released_at: NaiveDateTime,
}

/// Theme payload for one upsert. Color fields hold `"(L, a, b)"` triples;
/// the parent extension id is injected inside the save transaction.
#[derive(Debug, Clone)]
pub struct UpsertTheme {
	pub path: String,
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

#[derive(Debug, Clone)]
pub struct UpsertImage {
	pub language: String,
	pub kind: String,
	pub format: String,
	pub url: String,
}

#[derive(Debug, Clone)]
pub struct ThemeWithImages {
	pub theme: UpsertTheme,
	pub images: Vec<UpsertImage>,
}

#[derive(sqlx::FromRow, Debug)]
pub struct ExtensionSummary {
	pub publisher_name: String,
	pub name: String,
}

#[derive(sqlx::FromRow, Debug)]
pub struct ExtensionWithThemes {
	pub name: String,
	pub display_name: String,
	pub publisher_name: String,
	pub publisher_display_name: String,
	pub short_description: Option<String>,
	pub themes: Json<Vec<ThemeSummary>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ThemeSummary {
	pub name: String,
	pub display_name: String,
	pub editor_background: String,
	pub url: Option<String>,
}

#[derive(Clone)]
pub struct CatalogStore {
	pool: PgPool,
}

impl CatalogStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// `published_at` of the saved extension, used by the sync delta gate.
	/// A missing row reads as "not up to date".
	pub async fn get_extension_published_at(
		&self,
		publisher_name: &str,
		name: &str,
	) -> Result<Option<NaiveDateTime>, CatalogError> {
		let published_at = sqlx::query_scalar(
			"SELECT published_at FROM extensions WHERE publisher_name = $1 AND name = $2",
		)
		.bind(publisher_name)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(published_at)
	}

	pub async fn get_extension(
		&self,
		publisher_name: &str,
		name: &str,
		language: &str,
	) -> Result<Option<ExtensionWithThemes>, CatalogError> {
		let extension = sqlx::query_as(
			r#"
			SELECT
				e.name,
				e.display_name,
				e.publisher_name,
				e.publisher_display_name,
				e.short_description,
				COALESCE(
					jsonb_agg(jsonb_build_object(
						'name', t.name,
						'display_name', t.display_name,
						'editor_background', t.editor_background,
						'url', i.url
					)) FILTER (WHERE t.id IS NOT NULL),
					'[]'
				) AS themes
			FROM extensions e
			LEFT JOIN themes t ON t.extension_id = e.id
			LEFT JOIN images i
				ON i.theme_id = t.id
				AND i.language = $3
				AND i.type = 'preview'
				AND i.format = 'svg'
			WHERE e.publisher_name = $1 AND e.name = $2
			GROUP BY e.id
			"#,
		)
		.bind(publisher_name)
		.bind(name)
		.bind(language)
		.fetch_optional(&self.pool)
		.await?;

		Ok(extension)
	}

	/// Every known (publisher, name) pair, for stats refresh and force-sync.
	pub async fn list_extensions_for_update(&self) -> Result<Vec<ExtensionSummary>, CatalogError> {
		let extensions = sqlx::query_as("SELECT publisher_name, name FROM extensions ORDER BY id")
			.fetch_all(&self.pool)
			.await?;

		Ok(extensions)
	}

	/// Editor-background histogram source: one row per distinct color.
	pub async fn get_color_counts(&self) -> Result<Vec<(String, i64)>, CatalogError> {
		let counts = sqlx::query_as(
			r#"
			SELECT t.editor_background::text AS color, count(*) AS count
			FROM themes t
			GROUP BY t.editor_background
			ORDER BY count DESC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(counts)
	}

	pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchRow>, CatalogError> {
		search::search_extensions(&self.pool, params).await
	}

	/// Upserts the extension alone, used by the stats refresh.
	pub async fn upsert_extension(&self, extension: &UpsertExtension) -> Result<i64, CatalogError> {
		upsert_extension(&self.pool, extension).await
	}

	/// Persists one sync result atomically: the extension, its themes, and
	/// their images commit in a single transaction so no partial catalog
	/// state is ever observable.
	pub async fn save_extension(
		&self,
		extension: &UpsertExtension,
		themes: &[ThemeWithImages],
	) -> Result<(), CatalogError> {
		let mut tx = self.pool.begin().await?;

		let extension_id = upsert_extension(&mut *tx, extension).await?;

		for entry in themes {
			let theme_id = upsert_theme(&mut *tx, extension_id, extension, &entry.theme).await?;

			for image in &entry.images {
				upsert_image(&mut *tx, theme_id, image).await?;
			}
		}

		tx.commit().await?;

		Ok(())
	}
}

async fn upsert_extension<'c, E: PgExecutor<'c>>(
	executor: E,
	extension: &UpsertExtension,
) -> Result<i64, CatalogError> {
	let id = sqlx::query_scalar(
		r#"
		INSERT INTO extensions (
			upstream_id,
			name,
			display_name,
			short_description,
			publisher_id,
			publisher_name,
			publisher_display_name,
			installs,
			trending_daily,
			trending_weekly,
			trending_monthly,
			weighted_rating,
			published_at,
			released_at
		)
		VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
		ON CONFLICT (publisher_name, name) DO UPDATE SET
			upstream_id = EXCLUDED.upstream_id,
			display_name = EXCLUDED.display_name,
			short_description = EXCLUDED.short_description,
			publisher_id = EXCLUDED.publisher_id,
			publisher_display_name = EXCLUDED.publisher_display_name,
			installs = EXCLUDED.installs,
			trending_daily = EXCLUDED.trending_daily,
			trending_weekly = EXCLUDED.trending_weekly,
			trending_monthly = EXCLUDED.trending_monthly,
			weighted_rating = EXCLUDED.weighted_rating,
			published_at = EXCLUDED.published_at,
			released_at = EXCLUDED.released_at,
			updated_at = now()
		RETURNING id
		"#,
	)
	.bind(&extension.upstream_id)
	.bind(&extension.name)
	.bind(&extension.display_name)
	.bind(&extension.short_description)
	.bind(&extension.publisher_id)
	.bind(&extension.publisher_name)
	.bind(&extension.publisher_display_name)
	.bind(extension.installs)
	.bind(extension.trending_daily)
	.bind(extension.trending_weekly)
	.bind(extension.trending_monthly)
	.bind(extension.weighted_rating)
	.bind(extension.published_at)
	.bind(extension.released_at)
	.fetch_one(executor)
	.await?;

	Ok(id)
}

async fn upsert_theme<'c, E: PgExecutor<'c>>(
	executor: E,
	extension_id: i64,
	extension: &UpsertExtension,
	theme: &UpsertTheme,
) -> Result<i64, CatalogError> {
	// The tsv column indexes the theme name together with the extension's
	// display name and description, so it is rebuilt on every upsert.
	let id = sqlx::query_scalar(
		r#"
		INSERT INTO themes (
			extension_id,
			path,
			name,
			display_name,
			editor_background,
			editor_foreground,
			activity_bar_background,
			activity_bar_foreground,
			activity_bar_in_active_foreground,
			activity_bar_border,
			activity_bar_active_border,
			activity_bar_active_background,
			activity_bar_badge_background,
			activity_bar_badge_foreground,
			tabs_container_background,
			tabs_container_border,
			status_bar_background,
			status_bar_foreground,
			status_bar_border,
			tab_active_background,
			tab_inactive_background,
			tab_active_foreground,
			tab_border,
			tab_active_border,
			tab_active_border_top,
			title_bar_active_background,
			title_bar_active_foreground,
			title_bar_border,
			tsv
		)
		VALUES (
			$1, $2, $3, $4,
			$5::cube, $6::cube, $7::cube, $8::cube, $9::cube, $10::cube,
			$11::cube, $12::cube, $13::cube, $14::cube, $15::cube, $16::cube,
			$17::cube, $18::cube, $19::cube, $20::cube, $21::cube, $22::cube,
			$23::cube, $24::cube, $25::cube, $26::cube, $27::cube, $28::cube,
			to_tsvector('english', $4 || ' ' || $29 || ' ' || coalesce($30, ''))
		)
		ON CONFLICT (extension_id, path) DO UPDATE SET
			name = EXCLUDED.name,
			display_name = EXCLUDED.display_name,
			editor_background = EXCLUDED.editor_background,
			editor_foreground = EXCLUDED.editor_foreground,
			activity_bar_background = EXCLUDED.activity_bar_background,
			activity_bar_foreground = EXCLUDED.activity_bar_foreground,
			activity_bar_in_active_foreground = EXCLUDED.activity_bar_in_active_foreground,
			activity_bar_border = EXCLUDED.activity_bar_border,
			activity_bar_active_border = EXCLUDED.activity_bar_active_border,
			activity_bar_active_background = EXCLUDED.activity_bar_active_background,
			activity_bar_badge_background = EXCLUDED.activity_bar_badge_background,
			activity_bar_badge_foreground = EXCLUDED.activity_bar_badge_foreground,
			tabs_container_background = EXCLUDED.tabs_container_background,
			tabs_container_border = EXCLUDED.tabs_container_border,
			status_bar_background = EXCLUDED.status_bar_background,
			status_bar_foreground = EXCLUDED.status_bar_foreground,
			status_bar_border = EXCLUDED.status_bar_border,
			tab_active_background = EXCLUDED.tab_active_background,
			tab_inactive_background = EXCLUDED.tab_inactive_background,
			tab_active_foreground = EXCLUDED.tab_active_foreground,
			tab_border = EXCLUDED.tab_border,
			tab_active_border = EXCLUDED.tab_active_border,
			tab_active_border_top = EXCLUDED.tab_active_border_top,
			title_bar_active_background = EXCLUDED.title_bar_active_background,
			title_bar_active_foreground = EXCLUDED.title_bar_active_foreground,
			title_bar_border = EXCLUDED.title_bar_border,
			tsv = EXCLUDED.tsv,
			updated_at = now()
		RETURNING id
		"#,
	)
	.bind(extension_id)
	.bind(&theme.path)
	.bind(&theme.name)
	.bind(&theme.display_name)
	.bind(&theme.editor_background)
	.bind(&theme.editor_foreground)
	.bind(&theme.activity_bar_background)
	.bind(&theme.activity_bar_foreground)
	.bind(&theme.activity_bar_in_active_foreground)
	.bind(&theme.activity_bar_border)
	.bind(&theme.activity_bar_active_border)
	.bind(&theme.activity_bar_active_background)
	.bind(&theme.activity_bar_badge_background)
	.bind(&theme.activity_bar_badge_foreground)
	.bind(&theme.tabs_container_background)
	.bind(&theme.tabs_container_border)
	.bind(&theme.status_bar_background)
	.bind(&theme.status_bar_foreground)
	.bind(&theme.status_bar_border)
	.bind(&theme.tab_active_background)
	.bind(&theme.tab_inactive_background)
	.bind(&theme.tab_active_foreground)
	.bind(&theme.tab_border)
	.bind(&theme.tab_active_border)
	.bind(&theme.tab_active_border_top)
	.bind(&theme.title_bar_active_background)
	.bind(&theme.title_bar_active_foreground)
	.bind(&theme.title_bar_border)
	.bind(&extension.display_name)
	.bind(&extension.short_description)
	.fetch_one(executor)
	.await?;

	Ok(id)
}

async fn upsert_image<'c, E: PgExecutor<'c>>(
	executor: E,
	theme_id: i64,
	image: &UpsertImage,
) -> Result<i64, CatalogError> {
	let id = sqlx::query_scalar(
		r#"
		INSERT INTO images (theme_id, language, type, format, url)
		VALUES ($1, $2, $3, $4, $5)
		ON CONFLICT (theme_id, language, type, format) DO UPDATE SET
			url = EXCLUDED.url,
			updated_at = now()
		RETURNING id
		"#,
	)
	.bind(theme_id)
	.bind(&image.language)
	.bind(&image.kind)
	.bind(&image.format)
	.bind(&image.url)
	.fetch_one(executor)
	.await?;

	Ok(id)
}
