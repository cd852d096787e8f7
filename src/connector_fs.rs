//! Filesystem connector.
//!
//! Walks a local directory and offers its files for upload in place: the
//! connector root doubles as the local folder, so sidecars are written next
//! to the source files.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.filesystem.docs]
//! root = "./docs"
//! include_globs = ["**/*.pdf", "**/*.docx"]
//! exclude_globs = ["drafts/**"]
//! follow_symlinks = false
//! ```
//!
//! Hidden files and directories (any path component starting with `.`) and
//! sidecar files are never offered.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::FilesystemConnectorConfig;
use crate::models::{ScanResult, SourceItem};
use crate::sidecar::is_sidecar_path;
use crate::traits::Connector;

/// A filesystem connector instance.
pub struct FilesystemConnector {
    name: String,
    config: FilesystemConnectorConfig,
    sidecar_extension: String,
}

impl FilesystemConnector {
    pub fn new(name: String, config: FilesystemConnectorConfig, sidecar_extension: String) -> Self {
        Self {
            name,
            config,
            sidecar_extension,
        }
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Upload files from a local directory"
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    fn local_folder(&self) -> PathBuf {
        self.config.root.clone()
    }

    async fn scan(&self, since: Option<DateTime<Utc>>) -> Result<ScanResult> {
        let config = self.config.clone();
        let name = self.name.clone();
        let ext = self.sidecar_extension.clone();
        tokio::task::spawn_blocking(move || scan_filesystem(&name, &config, &ext, since)).await?
    }
}

/// Walk `config.root` and describe every matching file.
pub fn scan_filesystem(
    name: &str,
    config: &FilesystemConnectorConfig,
    sidecar_extension: &str,
    since: Option<DateTime<Utc>>,
) -> Result<ScanResult> {
    let root = &config.root;
    if !root.is_dir() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut result = ScanResult::default();

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Cannot read entry under {}: {}", root.display(), e);
                result.download_errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if is_sidecar_path(path, sidecar_extension) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let item = match file_to_source_item(name, path, &rel_str) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", path.display(), e);
                result.download_errors += 1;
                continue;
            }
        };
        if let Some(cutoff) = since {
            if item.updated_at < cutoff {
                continue;
            }
        }
        result.items.push(item);
    }

    // Sort for deterministic ordering
    result.items.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    tracing::info!(
        "filesystem:{} found {} files under {}",
        name,
        result.items.len(),
        root.display()
    );
    Ok(result)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn file_to_source_item(name: &str, path: &Path, relative_path: &str) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)?;
    let updated_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_type = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut meta = Map::new();
    meta.insert("file_name".into(), Value::String(file_name.clone()));
    meta.insert("file_path".into(), Value::String(relative_path.to_string()));
    meta.insert("file_type".into(), Value::String(file_type));
    meta.insert("file_size".into(), Value::from(metadata.len()));
    meta.insert(
        "last_modified_date".into(),
        Value::String(updated_at.to_rfc3339()),
    );

    Ok(SourceItem {
        source: format!("filesystem:{}", name),
        source_id: relative_path.to_string(),
        path: path.to_path_buf(),
        source_url: Some(format!("file://{}", path.display())),
        title: Some(file_name),
        updated_at,
        metadata: meta,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
