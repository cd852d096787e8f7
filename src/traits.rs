//! Connector trait and registry.
//!
//! A connector brings content files into a local folder and describes them
//! as [`SourceItem`]s. Everything after the scan (sidecars, reconciliation,
//! duplicate detection, upload) is shared by all connectors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌────────────┐ ┌────────┐ ┌──────────┐ │
//! │  │ filesystem │ │   S3   │ │  Custom  │ │
//! │  │  (in place)│ │(downld)│ │  (Rust)  │ │
//! │  └────────────┘ └────────┘ └──────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          run_sync() → delete / upload plan
//! ```
//!
//! # Usage
//!
//! ```rust
//! use ingest_harness::traits::ConnectorRegistry;
//!
//! let mut connectors = ConnectorRegistry::new();
//! // connectors.register(Box::new(MyConnector::new()));
//! assert!(connectors.is_empty());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::config::Config;
use crate::models::ScanResult;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A data source that materializes documents as local files.
///
/// # Lifecycle
///
/// 1. The connector is registered via [`ConnectorRegistry::register`].
/// 2. [`scan`](Connector::scan) is called during `ingest sync <type>:<name>`.
/// 3. The returned items' files are planned against their sidecars and
///    uploaded.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use chrono::{DateTime, Utc};
/// use ingest_harness::models::ScanResult;
/// use ingest_harness::traits::Connector;
/// use std::path::PathBuf;
///
/// pub struct WikiConnector {
///     export_dir: PathBuf,
/// }
///
/// #[async_trait]
/// impl Connector for WikiConnector {
///     fn name(&self) -> &str { "wiki" }
///     fn description(&self) -> &str { "Export wiki pages to disk" }
///     fn local_folder(&self) -> PathBuf { self.export_dir.clone() }
///
///     async fn scan(&self, _since: Option<DateTime<Utc>>) -> Result<ScanResult> {
///         // ... export pages into export_dir and describe them
///         Ok(ScanResult::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector instance name (e.g. `"docs"`, `"runbooks"`).
    fn name(&self) -> &str;

    /// Returns a one-line description of what this connector does.
    fn description(&self) -> &str;

    /// Returns the connector type identifier (e.g. `"filesystem"`, `"s3"`).
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// Returns the source label: `"{connector_type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Folder holding this connector's content files and their sidecars.
    fn local_folder(&self) -> PathBuf;

    /// Bring the source's files into [`local_folder`](Connector::local_folder)
    /// and describe them. Items last modified before `since` are left out.
    ///
    /// Individual items that cannot be fetched are counted in
    /// [`ScanResult::download_errors`] rather than failing the scan.
    async fn scan(&self, since: Option<DateTime<Utc>>) -> Result<ScanResult>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry for connectors (built-in and custom).
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry pre-loaded with every connector in the config.
    ///
    /// S3 connectors download into `<download.dir>/<name>`.
    pub fn from_config(config: &Config) -> Self {
        use crate::connector_fs::FilesystemConnector;
        use crate::connector_s3::S3Connector;

        let mut registry = Self::new();

        for (name, cfg) in &config.connectors.filesystem {
            registry.register(Box::new(FilesystemConnector::new(
                name.clone(),
                cfg.clone(),
                config.download.metadata_extension.clone(),
            )));
        }
        for (name, cfg) in &config.connectors.s3 {
            registry.register(Box::new(S3Connector::new(
                name.clone(),
                cfg.clone(),
                config.download.dir.join(name),
            )));
        }

        registry
    }

    /// Register a connector.
    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    /// Get all registered connectors.
    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Get connectors filtered by type (e.g. `"s3"`, `"filesystem"`).
    pub fn connectors_by_type(&self, connector_type: &str) -> Vec<&dyn Connector> {
        self.connectors
            .iter()
            .filter(|c| c.connector_type() == connector_type)
            .map(|c| c.as_ref())
            .collect()
    }

    /// Find a specific connector by type and name.
    pub fn find(&self, connector_type: &str, name: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.connector_type() == connector_type && c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Resolve a CLI connector specifier: `all`, a type (`s3`), or an
    /// instance (`s3:runbooks`).
    pub fn select(&self, spec: &str) -> Result<Vec<&dyn Connector>> {
        let selected: Vec<&dyn Connector> = if spec == "all" {
            self.connectors.iter().map(|c| c.as_ref()).collect()
        } else if let Some((kind, name)) = spec.split_once(':') {
            self.find(kind, name).into_iter().collect()
        } else {
            self.connectors_by_type(spec)
        };

        if selected.is_empty() {
            let available: Vec<String> =
                self.connectors.iter().map(|c| c.source_label()).collect();
            if available.is_empty() {
                bail!("No connectors configured. Add a [connectors.<type>.<name>] section.");
            }
            bail!(
                "Unknown connector: '{}'. Available: {}",
                spec,
                available.join(", ")
            );
        }
        Ok(selected)
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Return the count of registered connectors.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
