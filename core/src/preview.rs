//! Adapter around the external preview-rendering command.
//!
//! The renderer is treated as a black box: it receives an unpacked extension
//! plus one theme contribution and prints JSON on stdout. Everything here is
//! command construction, decode, and stderr propagation.

use std::{
	path::{Path, PathBuf},
	process::Stdio,
};

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum PreviewError {
	#[error("failed to spawn renderer: {0}")]
	Spawn(#[from] std::io::Error),
	#[error("renderer failed: {stderr}")]
	Subprocess { stderr: String },
	#[error("failed to decode renderer output: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("renderer cancelled")]
	Cancelled,
}

/// Handle on the rendering command. The command line and its working
/// directory come from worker configuration so deployments can relocate the
/// renderer; the default production command is `npx vscodethemes`.
#[derive(Clone)]
pub struct PreviewRenderer {
	program: String,
	base_args: Vec<String>,
	working_dir: PathBuf,
}

impl PreviewRenderer {
	pub fn new(
		program: impl Into<String>,
		base_args: Vec<String>,
		working_dir: impl Into<PathBuf>,
	) -> Self {
		Self {
			program: program.into(),
			base_args,
			working_dir: working_dir.into(),
		}
	}

	/// Builds a renderer from a space-separated command line like
	/// `npx vscodethemes`.
	pub fn from_command(command: &str, working_dir: impl Into<PathBuf>) -> Self {
		let mut parts = command.split_whitespace().map(str::to_string);
		let program = parts.next().unwrap_or_else(|| "npx".to_string());

		Self::new(program, parts.collect(), working_dir)
	}

	/// Reads extension metadata and the list of theme contributions.
	pub async fn get_info(
		&self,
		extension_path: &Path,
		token: &CancellationToken,
	) -> Result<ExtensionInfo, PreviewError> {
		let output = self
			.run(&["info", "--dir", &extension_path.to_string_lossy()], token)
			.await?;

		Ok(serde_json::from_slice(&output)?)
	}

	/// Renders per-language preview images for one theme contribution.
	pub async fn generate_images(
		&self,
		extension_path: &Path,
		contribute: &ThemeContribute,
		output_dir: &Path,
		token: &CancellationToken,
	) -> Result<ImagesResult, PreviewError> {
		let extension_path = extension_path.to_string_lossy();
		let output_dir = output_dir.to_string_lossy();

		let mut args = vec![
			"images",
			"--dir",
			&extension_path,
			"--uiTheme",
			&contribute.ui_theme,
			"--path",
			&contribute.path,
			"--output",
			&output_dir,
		];
		if let Some(label) = &contribute.label {
			args.push("--label");
			args.push(label);
		}

		let output = self.run(&args, token).await?;

		Ok(serde_json::from_slice(&output)?)
	}

	async fn run(&self, args: &[&str], token: &CancellationToken) -> Result<Vec<u8>, PreviewError> {
		let child = Command::new(&self.program)
			.args(&self.base_args)
			.args(args)
			.current_dir(&self.working_dir)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;

		// Dropping the child on the cancelled branch kills the process.
		let output = tokio::select! {
			output = child.wait_with_output() => output?,
			_ = token.cancelled() => return Err(PreviewError::Cancelled),
		};

		if !output.status.success() {
			return Err(PreviewError::Subprocess {
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}

		Ok(output.stdout)
	}
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
	pub extension: ExtensionMetadata,
	#[serde(default)]
	pub theme_contributes: Vec<ThemeContribute>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionMetadata {
	pub display_name: String,
	pub description: String,
	#[serde(default)]
	pub github_link: Option<String>,
}

/// One theme declaration from the extension manifest.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThemeContribute {
	pub path: String,
	pub ui_theme: String,
	#[serde(default)]
	pub label: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImagesResult {
	pub theme: RenderedTheme,
	#[serde(default)]
	pub languages: Vec<LanguageResult>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RenderedTheme {
	pub path: String,
	pub display_name: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub colors: ThemeColors,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
	pub editor_background: String,
	pub editor_foreground: String,
	pub activity_bar_background: String,
	pub activity_bar_foreground: String,
	pub activity_bar_in_active_foreground: String,
	#[serde(default)]
	pub activity_bar_border: Option<String>,
	pub activity_bar_active_border: String,
	#[serde(default)]
	pub activity_bar_active_background: Option<String>,
	pub activity_bar_badge_background: String,
	pub activity_bar_badge_foreground: String,
	#[serde(default)]
	pub tabs_container_background: Option<String>,
	#[serde(default)]
	pub tabs_container_border: Option<String>,
	#[serde(default)]
	pub status_bar_background: Option<String>,
	pub status_bar_foreground: String,
	#[serde(default)]
	pub status_bar_border: Option<String>,
	#[serde(default)]
	pub tab_active_background: Option<String>,
	#[serde(default)]
	pub tab_inactive_background: Option<String>,
	pub tab_active_foreground: String,
	pub tab_border: String,
	#[serde(default)]
	pub tab_active_border: Option<String>,
	#[serde(default)]
	pub tab_active_border_top: Option<String>,
	pub title_bar_active_background: String,
	pub title_bar_active_foreground: String,
	#[serde(default)]
	pub title_bar_border: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LanguageResult {
	pub language: Language,
	#[serde(default)]
	pub tokens: serde_json::Value,
	pub svg_path: String,
	#[serde(default)]
	pub png_path: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Language {
	pub name: String,
	pub ext_name: String,
	pub scope_name: String,
	pub grammar: String,
	pub template: String,
	pub tab_name: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_renderer_output() {
		let json = r##"{
			"theme": {
				"path": "/tmp/ext/themes/night-owl.json",
				"displayName": "Night Owl",
				"type": "dark",
				"colors": {
					"editorBackground": "#011627",
					"editorForeground": "#d6deeb",
					"activityBarBackground": "#011627",
					"activityBarForeground": "#5f7e97",
					"activityBarInActiveForeground": "#5f7e97",
					"activityBarActiveBorder": "#82aaff",
					"activityBarBadgeBackground": "#44596b",
					"activityBarBadgeForeground": "#ffffff",
					"statusBarForeground": "#5f7e97",
					"tabActiveForeground": "#d2dee7",
					"tabBorder": "#272b3b",
					"titleBarActiveBackground": "#011627",
					"titleBarActiveForeground": "#eeefff",
					"statusBarBorder": null
				}
			},
			"languages": [{
				"language": {
					"name": "javascript",
					"extName": "js",
					"scopeName": "source.js",
					"grammar": "javascript.tmLanguage.json",
					"template": "example.js",
					"tabName": "example.js"
				},
				"tokens": [],
				"svgPath": "/tmp/images/night-owl-js.svg",
				"pngPath": null
			}]
		}"##;

		let result: ImagesResult = serde_json::from_str(json).unwrap();
		assert_eq!(result.theme.display_name, "Night Owl");
		assert_eq!(result.theme.kind, "dark");
		assert_eq!(result.theme.colors.activity_bar_border, None);
		assert_eq!(result.languages[0].language.ext_name, "js");
	}

	#[test]
	fn from_command_splits_program_and_args() {
		let renderer = PreviewRenderer::from_command("npx vscodethemes", "cli");
		assert_eq!(renderer.program, "npx");
		assert_eq!(renderer.base_args, vec!["vscodethemes".to_string()]);
	}

	#[tokio::test]
	async fn propagates_stderr_on_failure() {
		let renderer = PreviewRenderer::new("sh", Vec::new(), std::env::temp_dir());
		let token = CancellationToken::new();

		// `sh info ...` exits non-zero with a script error on stderr.
		let err = renderer
			.get_info(Path::new("/nonexistent"), &token)
			.await
			.unwrap_err();

		assert!(matches!(err, PreviewError::Subprocess { .. }));
	}
}
