//! Editor-background color histogram.

use axum::{
	extract::{Query, State},
	http::HeaderMap,
	Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use themedex_colorspace::{lab_string_to_xyz, rgb_to_hex, xyz_to_rgb};
use tracing::error;

use super::{error::ApiError, ApiState};

#[derive(Deserialize)]
pub struct ColorsQuery {
	/// Closest multiple each XYZ component is rounded to before grouping.
	#[serde(default = "default_anchor")]
	pub anchor: i32,
}

fn default_anchor() -> i32 {
	10
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ColorBucket {
	pub hex: String,
	pub count: i64,
}

#[derive(Serialize)]
pub struct ColorsResponse {
	pub colors: Vec<ColorBucket>,
}

pub async fn get_colors(
	State(state): State<ApiState>,
	headers: HeaderMap,
	Query(query): Query<ColorsQuery>,
) -> Result<Json<ColorsResponse>, ApiError> {
	state.auth.authorize(&headers, &["colors:read"])?;

	let rows = state.catalog.get_color_counts().await?;

	Ok(Json(ColorsResponse {
		colors: bucket_colors(rows, query.anchor),
	}))
}

/// Re-keys the per-color counts by XYZ rounded to the anchor, summing
/// counts per bucket. The displayed hex comes from the first (unrounded)
/// color seen in each bucket. Unparseable rows are logged and skipped.
fn bucket_colors(rows: Vec<(String, i64)>, anchor: i32) -> Vec<ColorBucket> {
	let mut buckets: HashMap<(i64, i64, i64), ColorBucket> = HashMap::new();

	for (color, count) in rows {
		let (x, y, z) = match lab_string_to_xyz(&color) {
			Ok(xyz) => xyz,
			Err(e) => {
				error!(color, "failed to convert stored color to xyz: {e}");
				continue;
			}
		};

		let key = (
			round_to_anchor(x, anchor),
			round_to_anchor(y, anchor),
			round_to_anchor(z, anchor),
		);

		buckets
			.entry(key)
			.and_modify(|bucket| bucket.count += count)
			.or_insert_with(|| {
				let (r, g, b) = xyz_to_rgb(x, y, z);
				ColorBucket {
					hex: rgb_to_hex(r, g, b),
					count,
				}
			});
	}

	let mut colors: Vec<ColorBucket> = buckets.into_values().collect();
	colors.sort_by(|a, b| b.count.cmp(&a.count));
	colors
}

fn round_to_anchor(value: f64, anchor: i32) -> i64 {
	if anchor == 0 {
		return value as i64;
	}

	i64::from(anchor) * (value / f64::from(anchor)).round() as i64
}

#[cfg(test)]
mod tests {
	use super::*;

	use themedex_colorspace::hex_to_lab_string;

	#[test]
	fn rounding_snaps_to_the_nearest_multiple() {
		assert_eq!(round_to_anchor(14.9, 10), 10);
		assert_eq!(round_to_anchor(15.1, 10), 20);
		assert_eq!(round_to_anchor(-4.2, 10), 0);
		assert_eq!(round_to_anchor(7.8, 0), 7);
	}

	#[test]
	fn nearby_colors_share_a_bucket() {
		// #000000 and #010101 land on the same rounded XYZ triple.
		let rows = vec![
			(hex_to_lab_string("#000000").unwrap(), 3),
			(hex_to_lab_string("#010101").unwrap(), 2),
			(hex_to_lab_string("#ffffff").unwrap(), 1),
		];

		let buckets = bucket_colors(rows, 10);

		assert_eq!(buckets.len(), 2);
		assert_eq!(buckets[0].count, 5);
		assert_eq!(buckets[0].hex, "#000000");
		assert_eq!(buckets[1].count, 1);
	}

	#[test]
	fn unparseable_rows_are_skipped() {
		let rows = vec![
			("garbage".to_string(), 7),
			(hex_to_lab_string("#123456").unwrap(), 1),
		];

		let buckets = bucket_colors(rows, 10);
		assert_eq!(buckets.len(), 1);
		assert_eq!(buckets[0].count, 1);
	}
}
