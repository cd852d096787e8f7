//! Sync pipeline orchestration.
//!
//! Coordinates the full flow for one or more connectors:
//!
//! ```text
//! validate profile → scan connector → plan → dedup → delete/upload → report
//! ```
//!
//! Planning has two modes:
//!
//! | Mode | Plan |
//! |------|------|
//! | incremental (default) | per scanned file: unchanged hash → skip; sidecar id → delete + upload; no sidecar → upload |
//! | reprocess (`reprocess_failed_files`) | list remote documents and [`reconcile`] them against the scanned files |
//!
//! Only setup errors (bad profile, unreachable API, failed listing or scan)
//! are returned as `Err`; per-file failures end up in the counters.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{IngestionClient, IngestionSink};
use crate::config::Config;
use crate::dedup::{detect_duplicates, Duplicate};
use crate::fingerprint::hash_file;
use crate::models::{ReconciliationDecision, RemoteDocument, RunCounters};
use crate::orchestrator::{Orchestrator, OrchestratorOptions, RunLog, WorkerPool};
use crate::progress::{ProgressMode, SyncProgressEvent};
use crate::reconcile::{reconcile, ReprocessPolicy};
use crate::sidecar::{string_field, SidecarStore, CONTENT_HASH_FIELD};
use crate::traits::{Connector, ConnectorRegistry};

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Only consider items modified (or, when reprocessing, indexed) on or
    /// after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Print the plan without deleting or uploading anything.
    pub dry_run: bool,
    /// Ignore recorded content hashes and re-upload every scanned file.
    pub full: bool,
    pub progress: ProgressMode,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            since: None,
            dry_run: false,
            full: false,
            progress: ProgressMode::Off,
        }
    }
}

/// What one run will do for one connector.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub to_delete: Vec<String>,
    pub to_upload: Vec<PathBuf>,
    /// Files whose content matches their sidecar's recorded hash.
    pub unchanged: Vec<PathBuf>,
    pub duplicates: Vec<Duplicate>,
    pub download_errors: u64,
}

impl SyncPlan {
    pub fn from_decision(decision: ReconciliationDecision) -> Self {
        Self {
            to_delete: decision.to_delete,
            to_upload: decision.to_insert,
            ..Default::default()
        }
    }

    /// Counts settled before execution: skips and download failures.
    pub fn prior_counts(&self) -> RunCounters {
        let mut counters = RunCounters::new();
        counters.add_skipped((self.unchanged.len() + self.duplicates.len()) as u64);
        counters.add_download_errors(self.download_errors);
        counters
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_upload.is_empty()
    }

    fn print(&self, label: &str, found: usize) {
        println!("sync {} (dry-run)", label);
        println!("  files found: {}", found);
        println!("  unchanged: {}", self.unchanged.len());
        println!("  duplicates: {}", self.duplicates.len());
        println!("  download errors: {}", self.download_errors);
        println!("  to delete: {}", self.to_delete.len());
        for id in &self.to_delete {
            println!("    - {}", id);
        }
        println!("  to upload: {}", self.to_upload.len());
        for path in &self.to_upload {
            println!("    + {}", path.display());
        }
        for dup in &self.duplicates {
            println!("    = {} (same content as {})", dup.path.display(), dup.surviving_id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Planning
// ═══════════════════════════════════════════════════════════════════════

/// Incremental plan for files a connector just produced.
///
/// With `full`, recorded hashes are ignored and every file is re-uploaded
/// (deleting its previous document first).
pub fn plan_local_changes(paths: &[PathBuf], store: &SidecarStore, full: bool) -> SyncPlan {
    if full {
        return SyncPlan {
            to_delete: store.ids_to_delete(paths),
            to_upload: paths.to_vec(),
            ..Default::default()
        };
    }

    let mut plan = SyncPlan::default();
    for path in paths {
        let Some(sidecar) = store.read(path) else {
            plan.to_upload.push(path.clone());
            continue;
        };

        if let Some(recorded) = string_field(&sidecar, CONTENT_HASH_FIELD) {
            match hash_file(path) {
                Ok(current) if current == recorded => {
                    tracing::debug!("{} unchanged", path.display());
                    plan.unchanged.push(path.clone());
                    continue;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if let Some(id) = string_field(&sidecar, store.id_field()) {
            plan.to_delete.push(id);
        }
        plan.to_upload.push(path.clone());
    }

    tracing::info!(
        "To Delete: {} To Insert: {} Unchanged: {}",
        plan.to_delete.len(),
        plan.to_upload.len(),
        plan.unchanged.len()
    );
    plan
}

/// Drop uploads whose content is already indexed. Superseded ids join the
/// delete set.
pub fn apply_dedup(plan: &mut SyncPlan, local_folder: &Path, store: &SidecarStore) {
    let queued: HashSet<String> = plan.to_delete.iter().cloned().collect();
    let report = detect_duplicates(&plan.to_upload, local_folder, store, &queued);
    for id in report.superseded_ids {
        if !queued.contains(&id) {
            plan.to_delete.push(id);
        }
    }
    plan.to_upload = report.kept;
    plan.duplicates = report.duplicates;
}

/// Reprocess plan from local sidecars alone: every sidecar under `folder`
/// whose recorded status and detail pass `policy`.
pub fn plan_local_reprocess(
    folder: &Path,
    store: &SidecarStore,
    policy: &ReprocessPolicy,
) -> SyncPlan {
    let statuses: Vec<_> = policy.valid_statuses.iter().cloned().collect();
    let mut plan = SyncPlan::default();

    for failed in store.search_failed_files(folder, &statuses) {
        let doc: RemoteDocument = match serde_json::from_value(Value::Object(failed.data.clone())) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("Unreadable sidecar for {}: {}", failed.content_path.display(), e);
                continue;
            }
        };
        if let Some(reason) = policy.skip_reason(&doc) {
            tracing::debug!("{}: {}", failed.content_path.display(), reason);
            continue;
        }
        let Some(id) = failed.id else {
            tracing::warn!("{} has no recorded id, skipping", failed.content_path.display());
            continue;
        };
        if !failed.content_path.exists() {
            tracing::warn!("Could not find {}", failed.content_path.display());
            continue;
        }
        plan.to_delete.push(id);
        plan.to_upload.push(failed.content_path);
    }

    tracing::info!(
        "To Delete: {} To Insert: {}",
        plan.to_delete.len(),
        plan.to_upload.len()
    );
    plan
}

// ═══════════════════════════════════════════════════════════════════════
// Runs
// ═══════════════════════════════════════════════════════════════════════

/// Sync every connector matching `connector_spec` (`all`, a type, or
/// `type:name`). Returns the counters summed over connectors.
pub async fn run_sync(
    config: &Config,
    connector_spec: &str,
    options: SyncOptions,
) -> Result<RunCounters> {
    let registry = ConnectorRegistry::from_config(config);
    let connectors = registry.select(connector_spec)?;
    run_connectors(config, &connectors, options).await
}

/// Sync the given connectors with one client and one worker pool.
pub async fn run_connectors(
    config: &Config,
    connectors: &[&dyn Connector],
    options: SyncOptions,
) -> Result<RunCounters> {
    let client = IngestionClient::new(&config.api)?;
    let needs_api = !options.dry_run || config.reprocess.reprocess_failed_files;
    if needs_api {
        validate_profile(&client).await?;
    }

    let pool = WorkerPool::new(config.api.max_parallel_executions);
    let mut totals = RunCounters::new();
    for connector in connectors {
        totals += sync_connector(config, &client, &pool, *connector, options).await?;
    }
    Ok(totals)
}

async fn validate_profile(client: &IngestionClient) -> Result<()> {
    client
        .validate_profile()
        .await
        .with_context(|| format!("Invalid profile '{}'", client.profile()))
}

async fn sync_connector(
    config: &Config,
    client: &IngestionClient,
    pool: &WorkerPool,
    connector: &dyn Connector,
    options: SyncOptions,
) -> Result<RunCounters> {
    let label = connector.source_label();
    let store = SidecarStore::from_config(&config.download);
    let local_folder = connector.local_folder();
    let progress = options.progress.reporter();

    progress.report(SyncProgressEvent::Discovering {
        connector: label.clone(),
    });
    let scan = connector
        .scan(options.since)
        .await
        .with_context(|| format!("Scan of {} failed", label))?;
    let paths: Vec<PathBuf> = scan.items.iter().map(|i| i.path.clone()).collect();

    let mut plan = if config.reprocess.reprocess_failed_files {
        let docs = client
            .list_all_documents()
            .await
            .context("Failed to list profile documents")?;
        let policy = ReprocessPolicy::from_config(&config.reprocess, options.since);
        SyncPlan::from_decision(reconcile(&docs, Some(paths.as_slice()), &local_folder, &policy))
    } else {
        plan_local_changes(&paths, &store, options.full)
    };
    plan.download_errors = scan.download_errors;

    if config.download.detect_file_duplication {
        apply_dedup(&mut plan, &local_folder, &store);
    }

    if options.dry_run {
        plan.print(&label, scan.items.len());
        return Ok(RunCounters::new());
    }

    let metadata: HashMap<PathBuf, Map<String, Value>> = scan
        .items
        .iter()
        .map(|item| (item.path.clone(), item.upload_metadata()))
        .collect();

    let counters = execute_plan(config, client, pool, &label, &local_folder, plan, metadata, options)
        .await;

    println!("sync {}", label);
    println!("  files found: {}", scan.items.len());
    println!("  {}", counters.summary_line());
    println!("ok");
    Ok(counters)
}

#[allow(clippy::too_many_arguments)]
async fn execute_plan(
    config: &Config,
    client: &IngestionClient,
    pool: &WorkerPool,
    label: &str,
    local_folder: &Path,
    plan: SyncPlan,
    metadata: HashMap<PathBuf, Map<String, Value>>,
    options: SyncOptions,
) -> RunCounters {
    // Only a connector's own download folder may be removed.
    let delete_local_folder = if config.download.delete_local_folder {
        if local_folder.starts_with(&config.download.dir) && local_folder != config.download.dir {
            Some(local_folder.to_path_buf())
        } else {
            tracing::warn!(
                "Not removing {}: not a connector download folder",
                local_folder.display()
            );
            None
        }
    } else {
        None
    };

    let run_log = RunLog::new();
    for dup in &plan.duplicates {
        run_log.push(format!(
            "{},Duplicate,{}",
            dup.path.display(),
            dup.surviving_id
        ));
    }

    let sink = Arc::new(IngestionSink::new(client.clone(), &config.download).with_metadata(metadata));
    let orchestrator = Orchestrator::new(
        pool.clone(),
        OrchestratorOptions {
            delete_local_folder,
            upload_operation_log: config.api.upload_operation_log,
            label: label.to_string(),
        },
    )
    .with_progress(options.progress.reporter())
    .with_run_log(run_log)
    .with_prior_counts(plan.prior_counts());

    orchestrator
        .run_sync(plan.to_delete, plan.to_upload, sink)
        .await
}

/// Reprocess straight from the sidecars under the download folder, without
/// scanning any connector.
pub async fn run_reprocess_local(config: &Config, options: SyncOptions) -> Result<RunCounters> {
    let client = IngestionClient::new(&config.api)?;
    if !options.dry_run {
        validate_profile(&client).await?;
    }

    let store = SidecarStore::from_config(&config.download);
    let folder = &config.download.dir;
    let policy = ReprocessPolicy::from_config(&config.reprocess, options.since);
    let plan = plan_local_reprocess(folder, &store, &policy);
    let label = "reprocess".to_string();

    if options.dry_run {
        plan.print(&label, plan.to_upload.len());
        return Ok(RunCounters::new());
    }

    let pool = WorkerPool::new(config.api.max_parallel_executions);
    let counters = execute_plan(
        config,
        &client,
        &pool,
        &label,
        folder,
        plan,
        HashMap::new(),
        options,
    )
    .await;

    println!("reprocess {}", folder.display());
    println!("  {}", counters.summary_line());
    println!("ok");
    Ok(counters)
}
