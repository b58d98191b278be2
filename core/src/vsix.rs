//! Downloads a VSIX package and extracts it into a scratch directory.

use std::{
	fs::{self, File},
	io,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum VsixError {
	#[error("failed to download package: {0}")]
	Download(#[from] reqwest::Error),
	#[error("failed to read package archive: {0}")]
	Archive(#[from] zip::result::ZipError),
	#[error("archive entry escapes the extract directory: {0:?}")]
	IllegalPath(String),
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	#[error("extraction task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

/// One extension package on disk: the downloaded `.VSIXPackage` file and the
/// directory its contents are extracted into.
pub struct PackageFetcher {
	pub package_path: PathBuf,
	pub extract_dir: PathBuf,
}

impl PackageFetcher {
	pub fn new(dir: &Path, slug: &str) -> Self {
		Self {
			package_path: dir.join(format!("{slug}.VSIXPackage")),
			extract_dir: dir.join(slug),
		}
	}

	/// Streams the package body to `package_path`.
	pub async fn download(&self, http: &reqwest::Client, url: &str) -> Result<(), VsixError> {
		let mut response = http.get(url).send().await?.error_for_status()?;

		let mut file = tokio::fs::File::create(&self.package_path).await?;
		while let Some(chunk) = response.chunk().await? {
			file.write_all(&chunk).await?;
		}
		file.flush().await?;

		Ok(())
	}

	/// Extracts the package ZIP, rejecting entries whose resolved path would
	/// land outside the extract directory (ZipSlip).
	pub async fn extract(&self) -> Result<(), VsixError> {
		let package_path = self.package_path.clone();
		let extract_dir = self.extract_dir.clone();

		tokio::task::spawn_blocking(move || extract_archive(&package_path, &extract_dir)).await?
	}
}

fn extract_archive(package_path: &Path, extract_dir: &Path) -> Result<(), VsixError> {
	let mut archive = zip::ZipArchive::new(File::open(package_path)?)?;

	fs::create_dir_all(extract_dir)?;

	for index in 0..archive.len() {
		let mut entry = archive.by_index(index)?;

		// `enclosed_name` refuses absolute paths and any `..` component.
		let Some(relative) = entry.enclosed_name() else {
			return Err(VsixError::IllegalPath(entry.name().to_string()));
		};
		let target = extract_dir.join(relative);

		if entry.is_dir() {
			fs::create_dir_all(&target)?;
			continue;
		}

		if let Some(parent) = target.parent() {
			fs::create_dir_all(parent)?;
		}

		let mut file = File::create(&target)?;
		io::copy(&mut entry, &mut file)?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::io::Write;

	use zip::write::SimpleFileOptions;

	fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
		let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
		for (name, body) in entries {
			writer
				.start_file(*name, SimpleFileOptions::default())
				.unwrap();
			writer.write_all(body).unwrap();
		}
		writer.finish().unwrap();
	}

	#[tokio::test]
	async fn extracts_nested_entries() {
		let dir = tempfile::tempdir().unwrap();
		let fetcher = PackageFetcher::new(dir.path(), "sdras.night-owl");

		write_zip(
			&fetcher.package_path,
			&[
				("extension/package.json", br#"{"name":"night-owl"}"#),
				("extension/themes/night-owl.json", b"{}"),
			],
		);

		fetcher.extract().await.unwrap();

		assert!(fetcher.extract_dir.join("extension/package.json").is_file());
		assert!(fetcher
			.extract_dir
			.join("extension/themes/night-owl.json")
			.is_file());
	}

	#[tokio::test]
	async fn rejects_path_traversal_entries() {
		let dir = tempfile::tempdir().unwrap();
		let fetcher = PackageFetcher::new(dir.path(), "evil.extension");

		write_zip(&fetcher.package_path, &[("../escape.txt", b"nope")]);

		let err = fetcher.extract().await.unwrap_err();
		assert!(matches!(err, VsixError::IllegalPath(_)));
		assert!(!dir.path().join("escape.txt").exists());
	}
}
