//! Bounded-concurrency delete and upload execution.
//!
//! A sync run hands the orchestrator the ids to delete and the files to
//! upload. Both phases run on the same [`WorkerPool`]: every delete is
//! awaited before the first upload starts, and within a phase tasks finish
//! in any order. Workers only return values; counters and the run log are
//! touched by the orchestrating task alone.
//!
//! ```text
//!   to_delete ──▶ WorkerPool ──▶ sink.delete()   (failures logged, never fatal)
//!                     │
//!   to_upload ──▶ WorkerPool ──▶ sink.upload()  ──▶ RunCounters
//!                                                     │
//!                                   operation log ◀───┘ (best effort)
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::api::LogEntry;
use crate::models::{RunCounters, UploadOutcome};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};

/// Where deletes and uploads are sent.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn delete(&self, id: &str) -> anyhow::Result<()>;

    /// Upload one file. `Err` and [`UploadOutcome::Failed`] are both counted
    /// as failures.
    async fn upload(&self, path: &Path) -> anyhow::Result<UploadOutcome>;

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Worker pool
// ═══════════════════════════════════════════════════════════════════════

/// Fixed-size pool: at most `size` tasks run at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` for every input and hand each result to `on_complete` in
    /// completion order. A panicked task surfaces as `Err(JoinError)`.
    pub async fn run_all<I, T, F, Fut, C>(&self, inputs: Vec<I>, task: F, mut on_complete: C)
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnMut(Result<T, JoinError>),
    {
        let mut set = JoinSet::new();
        for input in inputs {
            let permits = Arc::clone(&self.permits);
            let fut = task(input);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                fut.await
            });
        }
        while let Some(result) = set.join_next().await {
            on_complete(result);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Run log
// ═══════════════════════════════════════════════════════════════════════

/// Lines accumulated during one run, flushed to the operation log at the end.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Folder removed once both phases are done.
    pub delete_local_folder: Option<PathBuf>,
    /// Push one summary entry to the operation log after the run.
    pub upload_operation_log: bool,
    /// Label used in progress lines (e.g. `filesystem:docs`).
    pub label: String,
}

pub struct Orchestrator {
    pool: WorkerPool,
    options: OrchestratorOptions,
    progress: Box<dyn SyncProgressReporter>,
    run_log: RunLog,
    prior: RunCounters,
}

impl Orchestrator {
    pub fn new(pool: WorkerPool, options: OrchestratorOptions) -> Self {
        Self {
            pool,
            options,
            progress: Box::new(NoProgress),
            run_log: RunLog::new(),
            prior: RunCounters::new(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = run_log;
        self
    }

    /// Counts decided before execution (skips, download errors) that belong
    /// in this run's totals.
    pub fn with_prior_counts(mut self, prior: RunCounters) -> Self {
        self.prior = prior;
        self
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    /// Delete every id, then upload every path. Individual failures are
    /// counted and logged; nothing here aborts the run.
    pub async fn run_sync(
        &self,
        to_delete: Vec<String>,
        to_upload: Vec<PathBuf>,
        sink: Arc<dyn DocumentSink>,
    ) -> RunCounters {
        let started = Instant::now();
        let mut counters = self.prior;

        self.delete_phase(to_delete, &sink).await;
        self.upload_phase(to_upload, &sink, &mut counters).await;

        if let Some(folder) = &self.options.delete_local_folder {
            match std::fs::remove_dir_all(folder) {
                Ok(()) => tracing::info!("Removed local folder {}", folder.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!("Cannot remove {}: {}", folder.display(), e),
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let summary = counters.summary_line();
        tracing::info!("{}", summary);
        self.run_log.push(summary.clone());

        if self.options.upload_operation_log {
            let entry = LogEntry {
                step: "ALL".to_string(),
                level: 0,
                name: format!("bulk ingest ({:.2}s) {}", elapsed, summary),
                data: self.run_log.render(),
            };
            if let Err(e) = sink.append_log(entry).await {
                tracing::warn!("Operation log upload failed: {}", e);
            }
        }

        counters
    }

    async fn delete_phase(&self, ids: Vec<String>, sink: &Arc<dyn DocumentSink>) {
        if ids.is_empty() {
            return;
        }
        let total = ids.len() as u64;
        let mut done = 0u64;
        let mut failed = 0u64;

        self.pool
            .run_all(
                ids,
                |id| {
                    let sink = Arc::clone(sink);
                    async move {
                        let result = sink.delete(&id).await;
                        (id, result)
                    }
                },
                |joined| {
                    done += 1;
                    match joined {
                        Ok((_, Ok(()))) => {}
                        Ok((id, Err(e))) => {
                            failed += 1;
                            tracing::warn!("Error deleting {}: {}", id, e);
                            self.run_log.push(format!("{},DeleteError,{}", id, e));
                        }
                        Err(e) => {
                            failed += 1;
                            tracing::error!("Delete task panicked: {}", e);
                        }
                    }
                    self.progress.report(SyncProgressEvent::Deleting {
                        connector: self.options.label.clone(),
                        n: done,
                        total,
                    });
                },
            )
            .await;

        tracing::info!("Deleted {} of {} documents", total - failed, total);
    }

    async fn upload_phase(
        &self,
        paths: Vec<PathBuf>,
        sink: &Arc<dyn DocumentSink>,
        counters: &mut RunCounters,
    ) {
        let total = paths.len() as u64;
        let mut done = 0u64;

        self.pool
            .run_all(
                paths,
                |path| {
                    let sink = Arc::clone(sink);
                    async move {
                        let result = sink.upload(&path).await;
                        (path, result)
                    }
                },
                |joined| {
                    done += 1;
                    match joined {
                        Ok((path, Ok(outcome))) => {
                            match &outcome {
                                UploadOutcome::Uploaded { id, status } => {
                                    self.run_log
                                        .push(format!("{},{},{}", path.display(), status, id));
                                }
                                UploadOutcome::Skipped(reason) => {
                                    tracing::info!("Skipped {}: {}", path.display(), reason);
                                }
                                UploadOutcome::Failed(e) => {
                                    self.run_log
                                        .push(format!("{},Error,{}", path.display(), e));
                                }
                            }
                            counters.record(&outcome);
                        }
                        Ok((path, Err(e))) => {
                            tracing::error!("Error uploading {}: {}", path.display(), e);
                            self.run_log.push(format!("{},Error,{}", path.display(), e));
                            counters.record_failure();
                        }
                        Err(e) => {
                            tracing::error!("Upload task panicked: {}", e);
                            counters.record_failure();
                        }
                    }
                    self.progress.report(SyncProgressEvent::Uploading {
                        connector: self.options.label.clone(),
                        n: done,
                        total,
                    });
                },
            )
            .await;
    }
}
