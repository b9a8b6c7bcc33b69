use anyhow::{Context, Result};
use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use url::Url;

use super::{urls::find_registry_link, Fetch};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::process::find_tabular_entry;

fn file_name_of(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Download `url` into `dest_dir` under its original file name.
/// An existing file of that name is left untouched and reported as skipped.
pub fn download_archive(
    fetcher: &dyn Fetch,
    url: &Url,
    dest_dir: impl AsRef<Path>,
) -> Result<(PathBuf, bool)> {
    let dest_dir = dest_dir.as_ref();
    let dest_path = dest_dir.join(file_name_of(url, "download.zip"));

    if dest_path.exists() {
        debug!(path = %dest_path.display(), "already downloaded");
        return Ok((dest_path, false));
    }

    fs::create_dir_all(dest_dir).with_context(|| format!("creating {:?}", dest_dir))?;
    let bytes = fetcher.get_bytes(url.as_str())?;
    fs::write(&dest_path, &bytes).with_context(|| format!("writing {:?}", dest_path))?;
    info!(path = %dest_path.display(), bytes = bytes.len(), "downloaded");
    Ok((dest_path, true))
}

/// Locate the registry file on its listing page, download it and cache its
/// delimited text at `paths.registry_file`. Zipped registries are unpacked.
#[tracing::instrument(level = "info", skip(fetcher, cfg))]
pub fn fetch_registry(fetcher: &dyn Fetch, cfg: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    let sources = &cfg.sources;
    let net = |url: &str, e: anyhow::Error| PipelineError::network(url, format!("{:#}", e));

    let base = Url::parse(&sources.registry_url)
        .map_err(|e| PipelineError::network(&sources.registry_url, e))?;
    let html = fetcher
        .get_text(base.as_str())
        .map_err(|e| net(base.as_str(), e))?;
    let link = find_registry_link(&html, &base, &sources.registry_link_marker).ok_or_else(|| {
        PipelineError::network(
            base.as_str(),
            format!("no link containing `{}`", sources.registry_link_marker),
        )
    })?;

    let body = fetcher
        .get_bytes(link.as_str())
        .map_err(|e| net(link.as_str(), e))?;
    let name = file_name_of(&link, "registry.csv");
    let bytes = if name.to_lowercase().ends_with(".zip") {
        find_tabular_entry(&name, Cursor::new(body), &cfg.input)?.bytes
    } else {
        body
    };

    let dest = &cfg.paths.registry_file;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {:?}", parent))
            .map_err(|e| net(link.as_str(), e))?;
    }
    fs::write(dest, &bytes)
        .with_context(|| format!("writing {:?}", dest))
        .map_err(|e| net(link.as_str(), e))?;
    info!(url = %link, path = %dest.display(), bytes = bytes.len(), "registry cached");
    Ok(dest.clone())
}
