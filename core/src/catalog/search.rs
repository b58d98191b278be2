//! The composed search query: full-text rank plus color distance, one
//! representative theme per extension, paged sibling themes per row.

use serde::Deserialize;
use sqlx::{types::Json, PgPool};

use super::CatalogError;

#[derive(Debug, Clone)]
pub struct SearchParams {
	/// Free-text query; empty disables text ranking.
	pub text: String,
	/// Editor background as a `"(L, a, b)"` triple; empty disables color
	/// filtering.
	pub editor_background: String,
	/// Language scoping the preview images, e.g. `js`.
	pub language: String,
	pub sort_by: String,
	/// Maximum L*a*b* Euclidean distance for color matches.
	pub color_distance: i32,
	pub publisher_name: String,
	pub extension_name: String,
	pub theme_name: String,
	pub extensions_page_number: i32,
	pub extensions_page_size: i32,
	pub themes_page_number: i32,
	pub themes_page_size: i32,
}

#[derive(sqlx::FromRow, Debug)]
pub struct SearchRow {
	pub total: i64,
	pub name: String,
	pub display_name: String,
	pub short_description: Option<String>,
	pub publisher_name: String,
	pub publisher_display_name: String,
	pub total_themes: i64,
	pub themes: Json<Vec<SearchThemePartial>>,
	pub theme: Option<Json<SearchTheme>>,
}

/// Sibling-theme entry of the paged per-extension list.
#[derive(Deserialize, Debug, Clone)]
pub struct SearchThemePartial {
	pub name: String,
	pub url: String,
	pub display_name: String,
	pub editor_background: String,
	pub activity_bar_badge_background: String,
}

/// Full color payload, materialized only when a theme name is requested.
#[derive(Deserialize, Debug, Clone)]
pub struct SearchTheme {
	pub name: String,
	pub url: String,
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

/// Maps the public sort mode onto the window ordering of the extension page.
/// Unknown modes fall back to installs.
fn order_by_clause(sort_by: &str) -> &'static str {
	match sort_by {
		"relevance" => "text_rank DESC, color_distance ASC, installs DESC",
		"trendingDaily" => "trending_daily DESC",
		"trendingWeekly" => "trending_weekly DESC",
		"trendingMonthly" => "trending_monthly DESC",
		"rating" => "weighted_rating DESC",
		"updatedAt" => "updated_at DESC",
		_ => "installs DESC",
	}
}

pub(super) async fn search_extensions(
	pool: &PgPool,
	params: &SearchParams,
) -> Result<Vec<SearchRow>, CatalogError> {
	// Bind order: $1 text, $2 editor background, $3 language, $4 color
	// distance, $5 publisher, $6 extension, $7 theme, $8/$9 extension
	// offset/limit, $10/$11 theme offset/limit. The sort mode is a closed
	// set of clauses interpolated into the window ordering.
	let query = format!(
		r#"
		SELECT
			r.total,
			e.name,
			e.display_name,
			e.short_description,
			e.publisher_name,
			e.publisher_display_name,
			CASE
				WHEN $7 = '' THEN COALESCE(max(t2.total), 0)
				ELSE COALESCE(max(t2.total), 0) + 1 END AS total_themes,
			COALESCE(
				jsonb_agg(to_jsonb(t2.*) - 'extension_id' - 'id' - 'total')
					FILTER (WHERE t2.id IS NOT NULL),
				'[]'
			) AS themes,
			(jsonb_agg(to_jsonb(t3.*) - 'extension_id')
				FILTER (WHERE t3.extension_id IS NOT NULL)) -> 0 AS theme
		FROM extensions e
		JOIN (
			WITH results AS (
				SELECT
					CASE
						WHEN $1 = '' THEN 0
						ELSE TS_RANK_CD(t.tsv, query, 32) END AS text_rank,
					CASE
						WHEN $2 = '' THEN 0
						ELSE ($2::cube <-> t.editor_background) END AS color_distance,
					ROW_NUMBER() OVER(
						PARTITION BY t.extension_id
						ORDER BY
							CASE
								WHEN $1 = '' THEN 0
								ELSE TS_RANK_CD(t.tsv, query, 32) END DESC,
							CASE
								WHEN $2 = '' THEN 0
								ELSE ($2::cube <-> t.editor_background) END ASC,
							t.name ASC
					) AS row_number,
					t.id,
					t.extension_id,
					e.installs,
					e.trending_daily,
					e.trending_weekly,
					e.trending_monthly,
					e.weighted_rating,
					e.updated_at
				FROM themes t
				LEFT JOIN extensions e ON e.id = t.extension_id,
					WEBSEARCH_TO_TSQUERY($1) query
				WHERE
					CASE WHEN $5 = '' THEN true
					ELSE e.publisher_name = $5 END
				AND
					CASE WHEN $6 = '' THEN true
					ELSE e.name = $6 END
				AND
					CASE
						WHEN $1 = '' THEN true
						ELSE query @@ t.tsv END
				AND
					CASE
						WHEN $2 = '' THEN true
						ELSE $2::cube <-> t.editor_background <= $4 END
			)
			SELECT
				COUNT(*) OVER() total,
				ROW_NUMBER() OVER(ORDER BY {order_by}) AS row_number,
				extension_id,
				color_distance
			FROM results
			WHERE row_number = 1
			ORDER BY row_number
			OFFSET $8
			LIMIT $9
		) r ON r.extension_id = e.id
		LEFT JOIN LATERAL (
			SELECT
				COUNT(*) OVER() total,
				t.extension_id,
				t.id,
				t.name,
				t.display_name,
				t.editor_background,
				t.activity_bar_badge_background,
				i.url
			FROM themes t
			JOIN images i
				ON i.theme_id = t.id
				AND i.language = $3
				AND i.type = 'preview'
				AND i.format = 'svg'
			WHERE e.id = t.extension_id
			AND
				CASE WHEN $7 = '' THEN true
				ELSE t.name != $7 END
			ORDER BY
				CASE
					WHEN $2 = '' THEN 0
					ELSE ($2::cube <-> t.editor_background) END ASC,
				t.name ASC
			OFFSET $10
			LIMIT $11
		) t2 ON t2.extension_id = e.id
		LEFT JOIN LATERAL (
			SELECT
				t.extension_id,
				t.name,
				t.display_name,
				t.editor_background,
				t.editor_foreground,
				t.activity_bar_background,
				t.activity_bar_foreground,
				t.activity_bar_in_active_foreground,
				t.activity_bar_border,
				t.activity_bar_active_border,
				t.activity_bar_active_background,
				t.activity_bar_badge_background,
				t.activity_bar_badge_foreground,
				t.tabs_container_background,
				t.tabs_container_border,
				t.status_bar_background,
				t.status_bar_foreground,
				t.status_bar_border,
				t.tab_active_background,
				t.tab_inactive_background,
				t.tab_active_foreground,
				t.tab_border,
				t.tab_active_border,
				t.tab_active_border_top,
				t.title_bar_active_background,
				t.title_bar_active_foreground,
				t.title_bar_border,
				i.url
			FROM themes t
			JOIN images i
				ON i.theme_id = t.id
				AND i.language = $3
				AND i.type = 'preview'
				AND i.format = 'svg'
			WHERE e.id = t.extension_id
			AND t.name = $7
			OFFSET 0
			LIMIT 1
		) t3 ON t3.extension_id = e.id AND $7 != ''
		GROUP BY r.total, r.row_number, e.id
		ORDER BY r.row_number ASC
		"#,
		order_by = order_by_clause(&params.sort_by),
	);

	// Page numbers start at 1.
	let extensions_offset = (params.extensions_page_number - 1).max(0) * params.extensions_page_size;
	let themes_offset = (params.themes_page_number - 1).max(0) * params.themes_page_size;

	let rows = sqlx::query_as(&query)
		.bind(&params.text)
		.bind(&params.editor_background)
		.bind(&params.language)
		.bind(params.color_distance)
		.bind(&params.publisher_name)
		.bind(&params.extension_name)
		.bind(&params.theme_name)
		.bind(extensions_offset)
		.bind(params.extensions_page_size)
		.bind(themes_offset)
		.bind(params.themes_page_size)
		.fetch_all(pool)
		.await?;

	Ok(rows)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sort_modes_map_to_window_orderings() {
		assert_eq!(
			order_by_clause("relevance"),
			"text_rank DESC, color_distance ASC, installs DESC"
		);
		assert_eq!(order_by_clause("installs"), "installs DESC");
		assert_eq!(order_by_clause("trendingWeekly"), "trending_weekly DESC");
		assert_eq!(order_by_clause("rating"), "weighted_rating DESC");
		assert_eq!(order_by_clause("updatedAt"), "updated_at DESC");
	}

	#[test]
	fn unknown_sort_falls_back_to_installs() {
		assert_eq!(order_by_clause(""), "installs DESC");
		assert_eq!(order_by_clause("nonsense"), "installs DESC");
	}
}
