//! TOML configuration parsing and validation.
//!
//! The whole file is parsed into typed structs once, validated in
//! [`load_config`], and then passed by reference into each component.
//! Optional sections fall back to their `Default` impls.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::IndexStatus;

/// Environment variable consulted when `api.api_token` is not set in the file.
pub const API_TOKEN_ENV: &str = "INGEST_API_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub reprocess: ReprocessConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    pub profile: String,
    #[serde(default = "default_max_parallel")]
    pub max_parallel_executions: usize,
    #[serde(default)]
    pub upload_operation_log: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Page size used when listing profile documents.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_max_parallel() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_page_size() -> usize {
    1000
}

impl ApiConfig {
    /// The bearer token, from the file or from [`API_TOKEN_ENV`].
    pub fn token(&self) -> Option<String> {
        self.api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(API_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
    /// Sidecar extension without the leading dot.
    #[serde(default = "default_metadata_extension")]
    pub metadata_extension: String,
    #[serde(default)]
    pub delete_local_folder: bool,
    #[serde(default)]
    pub detect_file_duplication: bool,
    /// Write the upload response as a sidecar after each successful upload.
    #[serde(default = "default_true")]
    pub save_answer: bool,
    /// Sidecar field holding the remote document id.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
            metadata_extension: default_metadata_extension(),
            delete_local_folder: false,
            detect_file_duplication: false,
            save_answer: true,
            id_field: default_id_field(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./data/downloads")
}
fn default_metadata_extension() -> String {
    "metadata".to_string()
}
fn default_id_field() -> String {
    "id".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReprocessConfig {
    #[serde(default)]
    pub reprocess_failed_files: bool,
    #[serde(default = "default_valid_status_list")]
    pub reprocess_valid_status_list: Vec<String>,
    #[serde(default)]
    pub reprocess_status_detail_list_contains: Vec<String>,
    #[serde(default)]
    pub reprocess_failed_files_exclude: Vec<String>,
}

impl Default for ReprocessConfig {
    fn default() -> Self {
        Self {
            reprocess_failed_files: false,
            reprocess_valid_status_list: default_valid_status_list(),
            reprocess_status_detail_list_contains: Vec::new(),
            reprocess_failed_files_exclude: Vec::new(),
        }
    }
}

fn default_valid_status_list() -> Vec<String> {
    vec!["Failed".to_string()]
}

impl ReprocessConfig {
    pub fn valid_statuses(&self) -> Vec<IndexStatus> {
        self.reprocess_valid_status_list
            .iter()
            .map(|s| IndexStatus::from(s.as_str()))
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
    #[serde(default)]
    pub s3: BTreeMap<String, S3ConnectorConfig>,
}

impl ConnectorsConfig {
    pub fn is_empty(&self) -> bool {
        self.filesystem.is_empty() && self.s3.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3ConnectorConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    // Validate api
    if config.api.base_url.trim().is_empty() {
        bail!("api.base_url must not be empty");
    }
    if config.api.profile.trim().is_empty() {
        bail!("api.profile must not be empty");
    }
    if config.api.token().is_none() {
        bail!(
            "api.api_token must be set (or export {} in the environment)",
            API_TOKEN_ENV
        );
    }
    if config.api.max_parallel_executions == 0 {
        bail!("api.max_parallel_executions must be >= 1");
    }
    if config.api.page_size == 0 {
        bail!("api.page_size must be >= 1");
    }

    // Validate download
    let ext = &config.download.metadata_extension;
    if ext.is_empty() || ext.starts_with('.') {
        bail!(
            "download.metadata_extension must be non-empty and without a leading dot (got '{}')",
            ext
        );
    }
    if config.download.id_field.trim().is_empty() {
        bail!("download.id_field must not be empty");
    }

    // Validate reprocess
    if config.reprocess.reprocess_failed_files
        && config.reprocess.reprocess_valid_status_list.is_empty()
    {
        bail!("reprocess.reprocess_valid_status_list must not be empty when reprocessing");
    }

    Ok(())
}
