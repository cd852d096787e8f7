//! Sync progress reporting.
//!
//! Reports observable progress during `ingest sync` and `ingest reprocess`
//! so users see what is being scanned and how many deletes and uploads are
//! left. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Connector is scanning or downloading. Total unknown.
    Discovering { connector: String },
    /// Delete phase: n ids processed out of total.
    Deleting { connector: String, n: u64, total: u64 },
    /// Upload phase: n files processed out of total.
    Uploading { connector: String, n: u64, total: u64 },
}

impl SyncProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            SyncProgressEvent::Discovering { .. } => "discovering",
            SyncProgressEvent::Deleting { .. } => "deleting",
            SyncProgressEvent::Uploading { .. } => "uploading",
        }
    }
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync filesystem:docs  uploading  12 / 1,500 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { connector } => {
                format!("sync {}  discovering...\n", connector)
            }
            SyncProgressEvent::Deleting { connector, n, total } => format!(
                "sync {}  deleting  {} / {} documents\n",
                connector,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Uploading { connector, n, total } => format!(
                "sync {}  uploading  {} / {} files\n",
                connector,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering { connector } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": event.phase()
            }),
            SyncProgressEvent::Deleting { connector, n, total }
            | SyncProgressEvent::Uploading { connector, n, total } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": event.phase(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phase_names() {
        let c = "fs:docs".to_string();
        assert_eq!(
            SyncProgressEvent::Discovering { connector: c.clone() }.phase(),
            "discovering"
        );
        assert_eq!(
            SyncProgressEvent::Uploading { connector: c, n: 1, total: 2 }.phase(),
            "uploading"
        );
    }
}
