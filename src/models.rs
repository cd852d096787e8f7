//! Core data models used throughout the ingestion harness.
//!
//! These types represent the remote documents reported by the ingestion API,
//! the items produced by connectors, and the plans and counters that flow
//! through a sync run.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;

/// Index status reported by the ingestion API for a document.
///
/// Statuses the API may add later are kept verbatim in [`IndexStatus::Other`]
/// so they can still be matched against configured status lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndexStatus {
    Success,
    Failed,
    Processing,
    #[default]
    Unknown,
    Other(String),
}

impl IndexStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IndexStatus::Success => "Success",
            IndexStatus::Failed => "Failed",
            IndexStatus::Processing => "Processing",
            IndexStatus::Unknown => "Unknown",
            IndexStatus::Other(s) => s,
        }
    }
}

impl From<&str> for IndexStatus {
    fn from(s: &str) -> Self {
        match s {
            "Success" => IndexStatus::Success,
            "Failed" => IndexStatus::Failed,
            "Processing" => IndexStatus::Processing,
            "Unknown" | "" => IndexStatus::Unknown,
            other => IndexStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for IndexStatus {
    fn from(s: String) -> Self {
        IndexStatus::from(s.as_str())
    }
}

impl From<IndexStatus> for String {
    fn from(status: IndexStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as listed by the ingestion API for a profile.
///
/// Every field tolerates `null` or absence: a record missing its `id` or
/// `timestamp` is still deserialized and later skipped by the reconciler
/// instead of failing the whole listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extension: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index_status: IndexStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub index_detail: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RemoteDocument {
    /// `name.extension`, or just `name` when the extension is empty.
    pub fn file_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }

    /// Parsed `timestamp`, if present and well-formed.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse an ISO-8601 timestamp into UTC.
///
/// Accepts RFC 3339 (`2024-01-10T00:00:00Z`, with offset), naive date-times
/// (`2024-01-10T00:00:00`, read as UTC) and bare dates (`2024-01-10`, read as
/// midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Item produced by a connector: a content file already sitting in the local
/// download folder, plus the source-specific metadata sent with its upload.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub path: PathBuf,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl SourceItem {
    /// Metadata sent with the upload: the connector's own fields plus the
    /// source identity.
    pub fn upload_metadata(&self) -> Map<String, Value> {
        let mut meta = self.metadata.clone();
        meta.entry("source")
            .or_insert_with(|| Value::String(self.source.clone()));
        if let Some(url) = &self.source_url {
            meta.entry("url").or_insert_with(|| Value::String(url.clone()));
        }
        if let Some(title) = &self.title {
            meta.entry("title")
                .or_insert_with(|| Value::String(title.clone()));
        }
        meta
    }
}

/// Result of a connector scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub items: Vec<SourceItem>,
    /// Items the connector found but could not download.
    pub download_errors: u64,
}

/// The minimal set of remote deletions and local uploads for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationDecision {
    pub to_delete: Vec<String>,
    pub to_insert: Vec<PathBuf>,
}

impl ReconciliationDecision {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }
}

/// Per-file result of an upload task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { id: String, status: IndexStatus },
    Skipped(String),
    Failed(String),
}

/// Run-level counters reported at the end of a sync.
///
/// `total` is kept equal to the sum of the other four.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub success: u64,
    pub failed: u64,
    pub skip: u64,
    /// Download failures reported by the connector.
    pub error: u64,
    pub total: u64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded { .. } => self.success += 1,
            UploadOutcome::Skipped(_) => self.skip += 1,
            UploadOutcome::Failed(_) => self.failed += 1,
        }
        self.total += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.total += 1;
    }

    pub fn add_skipped(&mut self, n: u64) {
        self.skip += n;
        self.total += n;
    }

    pub fn add_download_errors(&mut self, n: u64) {
        self.error += n;
        self.total += n;
    }

    /// True when nothing failed, either on upload or on download.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.error == 0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Success: {} Skip: {} Upload Failed: {} Download Failed: {} Total: {}",
            self.success, self.skip, self.failed, self.error, self.total
        )
    }
}

impl AddAssign for RunCounters {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.failed += other.failed;
        self.skip += other.skip;
        self.error += other.error;
        self.total += other.total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(IndexStatus::from("Failed"), IndexStatus::Failed);
        assert_eq!(IndexStatus::from(""), IndexStatus::Unknown);
        assert_eq!(
            IndexStatus::from("Quarantined"),
            IndexStatus::Other("Quarantined".to_string())
        );
        assert_eq!(IndexStatus::from("Quarantined").as_str(), "Quarantined");
    }

    #[test]
    fn remote_document_tolerates_nulls_and_missing_fields() {
        let json = r#"{"id": null, "name": "doc1", "indexStatus": null, "indexDetail": null}"#;
        let doc: RemoteDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, None);
        assert_eq!(doc.name, "doc1");
        assert_eq!(doc.extension, "");
        assert_eq!(doc.index_status, IndexStatus::Unknown);
        assert_eq!(doc.index_detail, "");
        assert_eq!(doc.timestamp_utc(), None);
        assert_eq!(doc.file_name(), "doc1");
    }

    #[test]
    fn parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(parse_timestamp("2024-01-10T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-10T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-10T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-10"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-10T00:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn counters_keep_total_in_sync() {
        let mut c = RunCounters::new();
        c.record(&UploadOutcome::Uploaded {
            id: "a".into(),
            status: IndexStatus::Success,
        });
        c.record(&UploadOutcome::Failed("boom".into()));
        c.record_failure();
        c.add_skipped(2);
        c.add_download_errors(1);
        assert_eq!(c.success, 1);
        assert_eq!(c.failed, 2);
        assert_eq!(c.skip, 2);
        assert_eq!(c.error, 1);
        assert_eq!(c.total, 6);
        assert!(!c.is_clean());
        assert_eq!(
            c.summary_line(),
            "Success: 1 Skip: 2 Upload Failed: 2 Download Failed: 1 Total: 6"
        );

        let mut sum = RunCounters::new();
        sum += c;
        sum += c;
        assert_eq!(sum.total, 12);
        assert_eq!(sum.success + sum.failed + sum.skip + sum.error, sum.total);
    }

    #[test]
    fn upload_metadata_keeps_connector_fields() {
        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::String("From connector".into()));
        let item = SourceItem {
            source: "s3:docs".into(),
            source_id: "a.pdf".into(),
            path: PathBuf::from("/dl/a.pdf"),
            source_url: Some("s3://b/a.pdf".into()),
            title: Some("a.pdf".into()),
            updated_at: Utc::now(),
            metadata,
        };
        let meta = item.upload_metadata();
        assert_eq!(meta["source"], "s3:docs");
        assert_eq!(meta["url"], "s3://b/a.pdf");
        assert_eq!(meta["title"], "From connector");
    }
}
