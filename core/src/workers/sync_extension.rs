//! Materializes one extension: download, unpack, render previews per
//! language, upload, persist.

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
	catalog::{CatalogStore, ThemeWithImages, UpsertImage, UpsertTheme},
	job::{InsertOpts, JobArgs, JobContext, JobError, JobHandler},
	marketplace::{self, QueryOptions},
	preview::{LanguageResult, PreviewRenderer, RenderedTheme},
	storage::{cache_bust_token, ObjectStore},
	vsix::PackageFetcher,
};

use super::{
	convert_upsert_extension, is_extension_up_to_date, RATE_LIMIT_DELAY,
	SYNC_EXTENSION_HIGH_PRIORITY_QUEUE,
};

/// Image generation and uploads fan out across themes and languages, capped
/// at this many in-flight tasks.
const MAX_FANOUT: usize = 10;

const IMAGE_TYPE: &str = "preview";
const IMAGE_FORMAT: &str = "svg";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SyncExtensionArgs {
	pub publisher_name: String,
	pub extension_name: String,
	#[serde(default)]
	pub force: bool,
}

impl JobArgs for SyncExtensionArgs {
	const KIND: &'static str = "syncExtension";

	fn insert_opts() -> InsertOpts {
		InsertOpts {
			queue: Some(SYNC_EXTENSION_HIGH_PRIORITY_QUEUE.into()),
			max_attempts: Some(5),
			..Default::default()
		}
	}
}

pub struct SyncExtensionWorker {
	pub marketplace: marketplace::Client,
	pub http: reqwest::Client,
	pub directory: PathBuf,
	pub disable_cleanup: bool,
	pub object_store: ObjectStore,
	pub renderer: PreviewRenderer,
	pub catalog: CatalogStore,
}

#[async_trait]
impl JobHandler for SyncExtensionWorker {
	type Args = SyncExtensionArgs;

	fn timeout(&self) -> Duration {
		Duration::from_secs(5 * 60)
	}

	async fn run(&self, args: SyncExtensionArgs, ctx: &JobContext) -> Result<(), JobError> {
		let slug = format!("{}.{}", args.publisher_name, args.extension_name);
		info!("syncing extension package: {slug}");

		ctx.sleep(RATE_LIMIT_DELAY).await?;

		let mut results = ctx
			.cancellable(self.marketplace.query(QueryOptions::by_slug(&slug)))
			.await?;
		if results.is_empty() {
			return Err(JobError::ExtensionNotFound);
		}
		let extension = results.swap_remove(0);

		if is_extension_up_to_date(&self.catalog, &extension).await? && !args.force {
			info!("extension is up to date, skipping");
			return Ok(());
		}

		let upsert_extension = convert_upsert_extension(&extension)?;

		let package_url = extension.package_url().to_string();
		if package_url.is_empty() {
			return Err(JobError::PackageMissing);
		}

		// Scratch directory owned exclusively by this job.
		let job_dir = self.directory.join("jobs").join(ctx.job_id.to_string());
		tokio::fs::create_dir_all(&job_dir).await?;

		let result = self
			.sync_package(ctx, &slug, &package_url, &job_dir, upsert_extension)
			.await;

		if !self.disable_cleanup {
			info!("cleaning up job directory: {}", job_dir.display());
			let _ = tokio::fs::remove_dir_all(&job_dir).await;
		}

		result
	}
}

impl SyncExtensionWorker {
	async fn sync_package(
		&self,
		ctx: &JobContext,
		slug: &str,
		package_url: &str,
		job_dir: &Path,
		upsert_extension: crate::catalog::UpsertExtension,
	) -> Result<(), JobError> {
		let fetcher = PackageFetcher::new(job_dir, slug);

		info!("downloading package: {package_url}");
		ctx.cancellable(fetcher.download(&self.http, package_url))
			.await?;

		info!("extracting package: {}", fetcher.package_path.display());
		ctx.cancellable(fetcher.extract()).await?;

		let extension_path = tokio::fs::canonicalize(&fetcher.extract_dir).await?;

		info!("reading extension info: {}", extension_path.display());
		let extension_info = self.renderer.get_info(&extension_path, ctx.token()).await?;

		let images_dir = job_dir.join("images");

		let image_results = self
			.generate_theme_images(ctx, &extension_path, &images_dir, extension_info)
			.await?;

		if image_results.is_empty() {
			info!("no images generated, skipping extension");
			return Ok(());
		}

		// Slugs are assigned in first-seen order so collisions get stable
		// `-2`, `-3` suffixes.
		let mut next_slug = theme_slug_generator();
		let mut themes = Vec::with_capacity(image_results.len());
		for result in &image_results {
			let theme_slug = next_slug(&result.theme.display_name);
			themes.push(ThemeWithImages {
				theme: convert_upsert_theme(theme_slug, &result.theme)?,
				images: Vec::new(),
			});
		}

		self.upload_theme_images(ctx, slug, &mut themes, image_results)
			.await?;

		info!("saving extension to database");
		ctx.cancellable(self.catalog.save_extension(&upsert_extension, &themes))
			.await?;
		info!("extension saved to database");

		Ok(())
	}

	/// Renders previews for every `.json` theme contribution, at most
	/// [`MAX_FANOUT`] at a time. The first failure cancels its siblings.
	async fn generate_theme_images(
		&self,
		ctx: &JobContext,
		extension_path: &Path,
		images_dir: &Path,
		extension_info: crate::preview::ExtensionInfo,
	) -> Result<Vec<crate::preview::ImagesResult>, JobError> {
		let fan_token = ctx.token().child_token();
		let slots = Arc::new(Semaphore::new(MAX_FANOUT));
		let mut tasks = JoinSet::new();

		for contribute in extension_info.theme_contributes {
			if Path::new(&contribute.path).extension() != Some("json".as_ref()) {
				info!("skipping theme: {}", contribute.path);
				continue;
			}

			let renderer = self.renderer.clone();
			let slots = slots.clone();
			let token = fan_token.clone();
			let extension_path = extension_path.to_path_buf();
			let images_dir = images_dir.to_path_buf();

			tasks.spawn(async move {
				let _permit = slots
					.acquire_owned()
					.await
					.map_err(|_| JobError::Cancelled)?;
				if token.is_cancelled() {
					return Err(JobError::Cancelled);
				}

				info!("generating images for theme: {}", contribute.path);
				let mut result = renderer
					.generate_images(&extension_path, &contribute, &images_dir, &token)
					.await?;

				// Persistence keys on the stable relative path, not the
				// absolute path the renderer echoes back.
				result.theme.path = contribute.path;

				Ok(result)
			});
		}

		collect_fanout(&mut tasks, &fan_token).await
	}

	/// Uploads every rendered SVG, at most [`MAX_FANOUT`] themes at a time.
	/// All keys share one cache-bust token so the CDN flips atomically.
	async fn upload_theme_images(
		&self,
		ctx: &JobContext,
		slug: &str,
		themes: &mut [ThemeWithImages],
		image_results: Vec<crate::preview::ImagesResult>,
	) -> Result<(), JobError> {
		let cache_bust = cache_bust_token(ctx.job_id);
		let fan_token = ctx.token().child_token();
		let slots = Arc::new(Semaphore::new(MAX_FANOUT));
		let mut tasks = JoinSet::new();

		for (theme_index, result) in image_results.into_iter().enumerate() {
			let object_store = self.object_store.clone();
			let slots = slots.clone();
			let token = fan_token.clone();
			let theme_slug = themes[theme_index].theme.name.clone();
			let extension_slug = slug.to_string();
			let cache_bust = cache_bust.clone();

			tasks.spawn(async move {
				let _permit = slots
					.acquire_owned()
					.await
					.map_err(|_| JobError::Cancelled)?;

				info!("uploading images for theme: {}", result.theme.path);

				let mut images = Vec::with_capacity(result.languages.len());
				for language in &result.languages {
					if token.is_cancelled() {
						return Err(JobError::Cancelled);
					}

					images.push(
						upload_language_image(
							&object_store,
							&extension_slug,
							&theme_slug,
							&cache_bust,
							language,
						)
						.await?,
					);
				}

				Ok((theme_index, images))
			});
		}

		let uploaded = collect_fanout(&mut tasks, &fan_token).await?;
		for (theme_index, images) in uploaded {
			themes[theme_index].images = images;
		}

		Ok(())
	}
}

async fn upload_language_image(
	object_store: &ObjectStore,
	extension_slug: &str,
	theme_slug: &str,
	cache_bust: &str,
	language: &LanguageResult,
) -> Result<UpsertImage, JobError> {
	let file_name = format!(
		"{theme_slug}-{}-{IMAGE_TYPE}-{cache_bust}.{IMAGE_FORMAT}",
		language.language.ext_name
	);
	let key = format!("{extension_slug}/{file_name}");

	debug!("uploading SVG image at {} to {key}", language.svg_path);

	let body = tokio::fs::read(&language.svg_path).await?;
	object_store
		.put(
			&key,
			ByteStream::from(body),
			"image/svg+xml",
			"public, max-age=31536000",
		)
		.await?;

	let url = object_store.public_url(&key);
	debug!("SVG image uploaded: {url}");

	Ok(UpsertImage {
		language: language.language.ext_name.clone(),
		kind: IMAGE_TYPE.into(),
		format: IMAGE_FORMAT.into(),
		url,
	})
}

/// Drains a fan-out join set. On the first error the shared token is
/// cancelled and the remaining siblings are awaited before returning.
async fn collect_fanout<T: 'static>(
	tasks: &mut JoinSet<Result<T, JobError>>,
	fan_token: &CancellationToken,
) -> Result<Vec<T>, JobError> {
	let mut collected = Vec::new();

	while let Some(joined) = tasks.join_next().await {
		let failure = match joined {
			Ok(Ok(value)) => {
				collected.push(value);
				continue;
			}
			Ok(Err(error)) => error,
			Err(join_error) => JobError::Panic(join_error.to_string()),
		};

		fan_token.cancel();
		while tasks.join_next().await.is_some() {}

		return Err(failure);
	}

	Ok(collected)
}

/// Slug generator scoped to one extension: repeated display names get `-2`,
/// `-3`, ... suffixes in first-seen order.
fn theme_slug_generator() -> impl FnMut(&str) -> String {
	let mut counts: HashMap<String, u32> = HashMap::new();

	move |display_name| {
		let base = slug::slugify(display_name);
		let count = counts.entry(base.clone()).or_insert(0);
		*count += 1;

		if *count == 1 {
			base
		} else {
			format!("{base}-{count}")
		}
	}
}

fn convert_upsert_theme(theme_slug: String, theme: &RenderedTheme) -> Result<UpsertTheme, JobError> {
	let lab = themedex_colorspace::hex_to_lab_string;
	let lab_opt = |hex: &Option<String>| -> Result<Option<String>, JobError> {
		hex.as_deref().map(lab).transpose().map_err(JobError::from)
	};

	let colors = &theme.colors;

	Ok(UpsertTheme {
		path: theme.path.clone(),
		name: theme_slug,
		display_name: theme.display_name.clone(),
		editor_background: lab(&colors.editor_background)?,
		editor_foreground: lab(&colors.editor_foreground)?,
		activity_bar_background: lab(&colors.activity_bar_background)?,
		activity_bar_foreground: lab(&colors.activity_bar_foreground)?,
		activity_bar_in_active_foreground: lab(&colors.activity_bar_in_active_foreground)?,
		activity_bar_border: lab_opt(&colors.activity_bar_border)?,
		activity_bar_active_border: lab(&colors.activity_bar_active_border)?,
		activity_bar_active_background: lab_opt(&colors.activity_bar_active_background)?,
		activity_bar_badge_background: lab(&colors.activity_bar_badge_background)?,
		activity_bar_badge_foreground: lab(&colors.activity_bar_badge_foreground)?,
		tabs_container_background: lab_opt(&colors.tabs_container_background)?,
		tabs_container_border: lab_opt(&colors.tabs_container_border)?,
		status_bar_background: lab_opt(&colors.status_bar_background)?,
		status_bar_foreground: lab(&colors.status_bar_foreground)?,
		status_bar_border: lab_opt(&colors.status_bar_border)?,
		tab_active_background: lab_opt(&colors.tab_active_background)?,
		tab_inactive_background: lab_opt(&colors.tab_inactive_background)?,
		tab_active_foreground: lab(&colors.tab_active_foreground)?,
		tab_border: lab(&colors.tab_border)?,
		tab_active_border: lab_opt(&colors.tab_active_border)?,
		tab_active_border_top: lab_opt(&colors.tab_active_border_top)?,
		title_bar_active_background: lab(&colors.title_bar_active_background)?,
		title_bar_active_foreground: lab(&colors.title_bar_active_foreground)?,
		title_bar_border: lab_opt(&colors.title_bar_border)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::preview::ThemeColors;

	#[test]
	fn colliding_display_names_get_numbered_slugs() {
		let mut next_slug = theme_slug_generator();

		assert_eq!(next_slug("Night Owl"), "night-owl");
		assert_eq!(next_slug("Night Owl"), "night-owl-2");
		assert_eq!(next_slug("Night Owl"), "night-owl-3");
		assert_eq!(next_slug("Light Owl"), "light-owl");
	}

	#[test]
	fn slugs_fold_case_and_punctuation() {
		let mut next_slug = theme_slug_generator();

		assert_eq!(next_slug("Ayu Dark (bordered)"), "ayu-dark-bordered");
		assert_eq!(next_slug("Café Noir"), "cafe-noir");
	}

	fn rendered_theme() -> RenderedTheme {
		RenderedTheme {
			path: "themes/night-owl.json".into(),
			display_name: "Night Owl".into(),
			kind: "dark".into(),
			colors: ThemeColors {
				editor_background: "#011627".into(),
				editor_foreground: "#d6deeb".into(),
				activity_bar_background: "#011627".into(),
				activity_bar_foreground: "#5f7e97".into(),
				activity_bar_in_active_foreground: "#5f7e97".into(),
				activity_bar_border: None,
				activity_bar_active_border: "#82aaff".into(),
				activity_bar_active_background: None,
				activity_bar_badge_background: "#44596b".into(),
				activity_bar_badge_foreground: "#ffffff".into(),
				tabs_container_background: None,
				tabs_container_border: None,
				status_bar_background: Some("#011627".into()),
				status_bar_foreground: "#5f7e97".into(),
				status_bar_border: None,
				tab_active_background: None,
				tab_inactive_background: None,
				tab_active_foreground: "#d2dee7".into(),
				tab_border: "#272b3b".into(),
				tab_active_border: None,
				tab_active_border_top: None,
				title_bar_active_background: "#011627".into(),
				title_bar_active_foreground: "#eeefff".into(),
				title_bar_border: None,
			},
		}
	}

	#[test]
	fn theme_conversion_stores_lab_triples() {
		let theme = convert_upsert_theme("night-owl".into(), &rendered_theme()).unwrap();

		assert_eq!(theme.name, "night-owl");
		assert_eq!(theme.path, "themes/night-owl.json");
		assert_eq!(
			theme.editor_background,
			themedex_colorspace::hex_to_lab_string("#011627").unwrap()
		);
		assert_eq!(theme.activity_bar_border, None);
		assert!(theme.status_bar_background.is_some());
	}

	#[test]
	fn theme_conversion_rejects_bad_hex() {
		let mut theme = rendered_theme();
		theme.colors.editor_background = "not-a-color".into();

		assert!(matches!(
			convert_upsert_theme("x".into(), &theme),
			Err(JobError::Color(_))
		));
	}
}
