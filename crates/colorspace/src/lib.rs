//! Conversions between sRGB hex colors and CIE L*a*b*, plus the textual
//! `"(L, a, b)"` triple the catalog stores on disk.
//!
//! The math follows EasyRGB (<http://www.easyrgb.com/en/math.php>) with the
//! D65-1931 reference white, so two writers always produce byte-identical
//! triples for the same input color.

use thiserror::Error;

// D65-1931 reference white (Daylight, sRGB, Adobe-RGB).
const REF_X: f64 = 95.047;
const REF_Y: f64 = 100.0;
const REF_Z: f64 = 108.883;

#[derive(Error, Debug)]
pub enum ColorError {
	#[error("invalid hex color: {0:?}")]
	InvalidHex(String),
	#[error("invalid lab string: {0:?}")]
	InvalidLab(String),
}

/// Parses a `#rrggbb` hex literal.
pub fn hex_to_rgb(hex: &str) -> Result<(u8, u8, u8), ColorError> {
	let digits = hex
		.strip_prefix('#')
		.ok_or_else(|| ColorError::InvalidHex(hex.to_string()))?;
	if digits.len() != 6 || !digits.is_ascii() {
		return Err(ColorError::InvalidHex(hex.to_string()));
	}

	let channel = |range| {
		u8::from_str_radix(&digits[range], 16).map_err(|_| ColorError::InvalidHex(hex.to_string()))
	};

	Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

pub fn rgb_to_hex(r: u8, g: u8, b: u8) -> String {
	format!("#{r:02x}{g:02x}{b:02x}")
}

/// Standard-RGB -> XYZ.
pub fn rgb_to_xyz(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
	let linear = |c: u8| {
		let c = f64::from(c) / 255.0;
		let c = if c > 0.04045 {
			((c + 0.055) / 1.055).powf(2.4)
		} else {
			c / 12.92
		};
		c * 100.0
	};

	let (r, g, b) = (linear(r), linear(g), linear(b));

	(
		r * 0.4124 + g * 0.3576 + b * 0.1805,
		r * 0.2126 + g * 0.7152 + b * 0.0722,
		r * 0.0193 + g * 0.1192 + b * 0.9505,
	)
}

/// XYZ -> Standard-RGB, the inverse of [`rgb_to_xyz`].
pub fn xyz_to_rgb(x: f64, y: f64, z: f64) -> (u8, u8, u8) {
	let (x, y, z) = (x / 100.0, y / 100.0, z / 100.0);

	let r = x * 3.2406 + y * -1.5372 + z * -0.4986;
	let g = x * -0.9689 + y * 1.8758 + z * 0.0415;
	let b = x * 0.0557 + y * -0.2040 + z * 1.0570;

	let gamma = |c: f64| {
		let c = if c > 0.0031308 {
			1.055 * c.powf(1.0 / 2.4) - 0.055
		} else {
			12.92 * c
		};
		(c * 255.0).round().clamp(0.0, 255.0) as u8
	};

	(gamma(r), gamma(g), gamma(b))
}

/// XYZ -> CIE-L*a*b*.
pub fn xyz_to_lab(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
	let f = |t: f64| {
		if t > 0.008856 {
			t.cbrt()
		} else {
			7.787 * t + 16.0 / 116.0
		}
	};

	let (x, y, z) = (f(x / REF_X), f(y / REF_Y), f(z / REF_Z));

	(116.0 * y - 16.0, 500.0 * (x - y), 200.0 * (y - z))
}

/// CIE-L*a*b* -> XYZ, the inverse of [`xyz_to_lab`].
pub fn lab_to_xyz(l: f64, a: f64, b: f64) -> (f64, f64, f64) {
	let y = (l + 16.0) / 116.0;
	let x = a / 500.0 + y;
	let z = y - b / 200.0;

	let f = |t: f64| {
		let cubed = t * t * t;
		if cubed > 0.008856 {
			cubed
		} else {
			(t - 16.0 / 116.0) / 7.787
		}
	};

	(f(x) * REF_X, f(y) * REF_Y, f(z) * REF_Z)
}

pub fn hex_to_lab(hex: &str) -> Result<(f64, f64, f64), ColorError> {
	let (r, g, b) = hex_to_rgb(hex)?;
	let (x, y, z) = rgb_to_xyz(r, g, b);
	Ok(xyz_to_lab(x, y, z))
}

/// Converts a `#rrggbb` literal to the stored `"(L, a, b)"` triple.
pub fn hex_to_lab_string(hex: &str) -> Result<String, ColorError> {
	let (l, a, b) = hex_to_lab(hex)?;
	Ok(format_lab(l, a, b))
}

pub fn lab_string_to_hex(s: &str) -> Result<String, ColorError> {
	let (x, y, z) = lab_string_to_xyz(s)?;
	let (r, g, b) = xyz_to_rgb(x, y, z);
	Ok(rgb_to_hex(r, g, b))
}

pub fn lab_string_to_xyz(s: &str) -> Result<(f64, f64, f64), ColorError> {
	let (l, a, b) = parse_lab_string(s)?;
	Ok(lab_to_xyz(l, a, b))
}

/// Formats the on-disk triple. Three decimals, comma-space separated; the
/// database's `cube` input routine accepts this form verbatim.
pub fn format_lab(l: f64, a: f64, b: f64) -> String {
	format!("({l:.3}, {a:.3}, {b:.3})")
}

/// Parses `"(L, a, b)"`. Accepts both comma-space and bare-comma separators
/// since `cube` output drops the space.
pub fn parse_lab_string(s: &str) -> Result<(f64, f64, f64), ColorError> {
	let invalid = || ColorError::InvalidLab(s.to_string());

	let inner = s
		.trim()
		.strip_prefix('(')
		.and_then(|rest| rest.strip_suffix(')'))
		.ok_or_else(invalid)?;

	let mut parts = inner.split(',').map(str::trim);
	let mut component = || {
		parts
			.next()
			.and_then(|part| part.parse::<f64>().ok())
			.filter(|value| value.is_finite())
			.ok_or_else(invalid)
	};

	let lab = (component()?, component()?, component()?);
	if parts.next().is_some() {
		return Err(invalid());
	}

	Ok(lab)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn black_and_white_are_exact() {
		assert_eq!(hex_to_lab_string("#000000").unwrap(), "(0.000, 0.000, 0.000)");

		// The sRGB matrix rows don't sum exactly to the reference white, so
		// white lands a hair off the neutral axis.
		let (l, a, b) = hex_to_lab("#ffffff").unwrap();
		assert!((l - 100.0).abs() < 1e-9);
		assert!(a.abs() < 0.01);
		assert!(b.abs() < 0.02);
	}

	#[test]
	fn identical_backgrounds_share_a_triple() {
		assert_eq!(
			hex_to_lab_string("#1e1e2e").unwrap(),
			hex_to_lab_string("#1e1e2e").unwrap()
		);
	}

	#[test]
	fn round_trip_is_within_one_unit_per_channel() {
		// Sampling every 17th value per channel covers the full cube cheaply.
		for r in (0..=255u16).step_by(17) {
			for g in (0..=255u16).step_by(17) {
				for b in (0..=255u16).step_by(17) {
					let hex = rgb_to_hex(r as u8, g as u8, b as u8);
					let lab = hex_to_lab_string(&hex).unwrap();
					let back = lab_string_to_hex(&lab).unwrap();

					let (r2, g2, b2) = hex_to_rgb(&back).unwrap();
					assert!(i16::from(r2).abs_diff(r as i16) <= 1, "{hex} -> {back}");
					assert!(i16::from(g2).abs_diff(g as i16) <= 1, "{hex} -> {back}");
					assert!(i16::from(b2).abs_diff(b as i16) <= 1, "{hex} -> {back}");
				}
			}
		}
	}

	#[test]
	fn parses_both_separator_styles() {
		let spaced = parse_lab_string("(32.100, -4.500, 12.000)").unwrap();
		let bare = parse_lab_string("(32.1,-4.5,12)").unwrap();
		assert_eq!(spaced, bare);
	}

	#[test]
	fn rejects_malformed_input() {
		assert!(parse_lab_string("32.1, -4.5, 12").is_err());
		assert!(parse_lab_string("(32.1, -4.5)").is_err());
		assert!(parse_lab_string("(a, b, c)").is_err());
		assert!(parse_lab_string("(1, 2, 3, 4)").is_err());

		assert!(hex_to_rgb("112233").is_err());
		assert!(hex_to_rgb("#1122").is_err());
		assert!(hex_to_rgb("#11223g").is_err());
	}
}
