//! Reprocessing reconciliation.
//!
//! Given the documents a profile currently holds and the reprocess policy,
//! decides which remote documents must be deleted and which local files must
//! be uploaded again in their place.
//!
//! A document is selected only when it passes every filter, checked in this
//! order:
//!
//! | Filter | Skipped when |
//! |--------|--------------|
//! | exclusion list | `name` is listed in `reprocess_failed_files_exclude` |
//! | permanent failure | `indexDetail == "Invalid content"` |
//! | cutoff | a cutoff is set and `timestamp` is missing or earlier |
//! | status | `indexStatus` is not in `reprocess_valid_status_list` |
//! | detail | substrings are configured and `indexDetail` contains none |

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::ReprocessConfig;
use crate::models::{IndexStatus, ReconciliationDecision, RemoteDocument};

/// Index detail of documents that can never be reprocessed successfully.
pub const INVALID_CONTENT_DETAIL: &str = "Invalid content";

/// Which remote documents a reprocessing run may touch.
#[derive(Debug, Clone, Default)]
pub struct ReprocessPolicy {
    pub valid_statuses: HashSet<IndexStatus>,
    pub status_detail_substrings: Vec<String>,
    pub exclude_names: HashSet<String>,
    pub cutoff: Option<DateTime<Utc>>,
}

impl ReprocessPolicy {
    pub fn from_config(config: &ReprocessConfig, cutoff: Option<DateTime<Utc>>) -> Self {
        Self {
            valid_statuses: config.valid_statuses().into_iter().collect(),
            status_detail_substrings: config.reprocess_status_detail_list_contains.clone(),
            exclude_names: config
                .reprocess_failed_files_exclude
                .iter()
                .cloned()
                .collect(),
            cutoff,
        }
    }

    /// Why `doc` is left alone, or `None` if it must be reprocessed.
    pub fn skip_reason(&self, doc: &RemoteDocument) -> Option<&'static str> {
        if self.exclude_names.contains(&doc.name) {
            return Some("excluded by name");
        }
        if doc.index_detail == INVALID_CONTENT_DETAIL {
            return Some("invalid content");
        }
        if let Some(cutoff) = self.cutoff {
            match doc.timestamp_utc() {
                Some(ts) if ts >= cutoff => {}
                _ => return Some("before cutoff"),
            }
        }
        if !self.valid_statuses.contains(&doc.index_status) {
            return Some("status not reprocessable");
        }
        if !self.status_detail_substrings.is_empty()
            && !self
                .status_detail_substrings
                .iter()
                .any(|s| doc.index_detail.contains(s.as_str()))
        {
            return Some("detail does not match");
        }
        None
    }
}

/// Compute the delete/insert plan for a reprocessing run.
///
/// `local_candidates`, when given, are the files the connector just
/// downloaded; each selected document is matched against them by file name
/// with spaces removed. Unmatched documents fall back to `local_folder`.
pub fn reconcile(
    remote_docs: &[RemoteDocument],
    local_candidates: Option<&[PathBuf]>,
    local_folder: &Path,
    policy: &ReprocessPolicy,
) -> ReconciliationDecision {
    let mut decision = ReconciliationDecision::default();

    for doc in remote_docs {
        if let Some(reason) = policy.skip_reason(doc) {
            tracing::trace!(name = %doc.name, reason, "not reprocessing");
            continue;
        }
        let Some(id) = doc.id.as_ref().filter(|id| !id.is_empty()) else {
            tracing::warn!("Document '{}' has no id, skipping", doc.name);
            continue;
        };

        let file_name = doc.file_name();
        decision.to_delete.push(id.clone());
        decision
            .to_insert
            .push(resolve_local_path(&file_name, local_candidates, local_folder));
    }

    tracing::info!(
        "To Delete: {} To Insert: {}",
        decision.to_delete.len(),
        decision.to_insert.len()
    );
    decision
}

/// Strip spaces so names mangled by a source's download step still match.
pub fn normalize_name(name: &str) -> String {
    name.replace(' ', "")
}

fn resolve_local_path(
    file_name: &str,
    local_candidates: Option<&[PathBuf]>,
    local_folder: &Path,
) -> PathBuf {
    let Some(candidates) = local_candidates else {
        return local_folder.join(file_name);
    };
    let wanted = normalize_name(file_name);
    let found = candidates.iter().find(|p| {
        p.file_name()
            .map(|n| normalize_name(&n.to_string_lossy()) == wanted)
            .unwrap_or(false)
    });
    match found {
        Some(path) => path.clone(),
        None => {
            tracing::warn!("Could not find {}", file_name);
            local_folder.join(file_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_timestamp;

    fn doc(id: &str, name: &str, status: &str, detail: &str, ts: &str) -> RemoteDocument {
        RemoteDocument {
            id: Some(id.to_string()),
            name: name.to_string(),
            extension: "pdf".to_string(),
            index_status: IndexStatus::from(status),
            index_detail: detail.to_string(),
            timestamp: Some(ts.to_string()),
        }
    }

    fn failed_policy(cutoff: Option<&str>) -> ReprocessPolicy {
        ReprocessPolicy {
            valid_statuses: [IndexStatus::Failed].into_iter().collect(),
            cutoff: cutoff.and_then(parse_timestamp),
            ..Default::default()
        }
    }

    #[test]
    fn example_scenario() {
        let docs = vec![
            doc("a1", "doc1", "Failed", "timeout", "2024-01-10T00:00:00Z"),
            doc("a2", "doc2", "Success", "", "2024-01-11T00:00:00Z"),
        ];
        let folder = Path::new("/downloads");
        let d = reconcile(&docs, None, folder, &failed_policy(Some("2024-01-01")));
        assert_eq!(d.to_delete, vec!["a1".to_string()]);
        assert_eq!(d.to_insert, vec![folder.join("doc1.pdf")]);
    }

    #[test]
    fn empty_input_gives_empty_decision() {
        let d = reconcile(&[], None, Path::new("/x"), &failed_policy(None));
        assert!(d.is_empty());
    }

    #[test]
    fn excluded_names_and_invalid_content_never_deleted() {
        let docs = vec![
            doc("a1", "keep", "Failed", "timeout", "2024-02-01T00:00:00Z"),
            doc("a2", "broken", "Failed", INVALID_CONTENT_DETAIL, "2024-02-01T00:00:00Z"),
            doc("a3", "retry", "Failed", "timeout", "2024-02-01T00:00:00Z"),
        ];
        let mut policy = failed_policy(None);
        policy.exclude_names.insert("keep".to_string());
        let d = reconcile(&docs, None, Path::new("/d"), &policy);
        assert_eq!(d.to_delete, vec!["a3".to_string()]);
    }

    #[test]
    fn cutoff_excludes_older_and_undated_documents() {
        let mut undated = doc("a3", "c", "Failed", "", "");
        undated.timestamp = None;
        let mut garbled = doc("a4", "d", "Failed", "", "");
        garbled.timestamp = Some("not a date".to_string());
        let docs = vec![
            doc("a1", "a", "Failed", "", "2023-12-31T23:59:59Z"),
            doc("a2", "b", "Failed", "", "2024-01-01T00:00:00Z"),
            undated,
            garbled,
        ];
        let d = reconcile(&docs, None, Path::new("/d"), &failed_policy(Some("2024-01-01")));
        assert_eq!(d.to_delete, vec!["a2".to_string()]);
    }

    #[test]
    fn no_cutoff_accepts_undated_documents() {
        let mut undated = doc("a1", "a", "Failed", "", "");
        undated.timestamp = None;
        let d = reconcile(&[undated], None, Path::new("/d"), &failed_policy(None));
        assert_eq!(d.to_delete, vec!["a1".to_string()]);
    }

    #[test]
    fn only_listed_statuses_are_deleted() {
        let docs = vec![
            doc("a1", "a", "Failed", "", "2024-01-02T00:00:00Z"),
            doc("a2", "b", "Processing", "", "2024-01-02T00:00:00Z"),
            doc("a3", "c", "Unknown", "", "2024-01-02T00:00:00Z"),
            doc("a4", "d", "Success", "", "2024-01-02T00:00:00Z"),
        ];
        let mut policy = failed_policy(None);
        policy.valid_statuses.insert(IndexStatus::Unknown);
        let d = reconcile(&docs, None, Path::new("/d"), &policy);
        assert_eq!(d.to_delete, vec!["a1".to_string(), "a3".to_string()]);
        for id in &d.to_delete {
            let status = &docs.iter().find(|x| x.id.as_ref() == Some(id)).unwrap().index_status;
            assert!(policy.valid_statuses.contains(status));
        }
    }

    #[test]
    fn detail_substrings_narrow_selection() {
        let docs = vec![
            doc("a1", "a", "Failed", "Request timeout after 30s", "2024-01-02T00:00:00Z"),
            doc("a2", "b", "Failed", "Parser error", "2024-01-02T00:00:00Z"),
            doc("a3", "c", "Failed", "gateway 504", "2024-01-02T00:00:00Z"),
        ];
        let mut policy = failed_policy(None);
        policy.status_detail_substrings = vec!["timeout".to_string(), "504".to_string()];
        let d = reconcile(&docs, None, Path::new("/d"), &policy);
        assert_eq!(d.to_delete, vec!["a1".to_string(), "a3".to_string()]);
    }

    #[test]
    fn documents_without_id_are_skipped() {
        let mut no_id = doc("", "a", "Failed", "", "2024-01-02T00:00:00Z");
        no_id.id = None;
        let empty_id = doc("", "b", "Failed", "", "2024-01-02T00:00:00Z");
        let d = reconcile(&[no_id, empty_id], None, Path::new("/d"), &failed_policy(None));
        assert!(d.is_empty());
    }

    #[test]
    fn candidate_paths_match_ignoring_spaces() {
        let docs = vec![
            doc("a1", "Annual Report", "Failed", "", "2024-01-02T00:00:00Z"),
            doc("a2", "missing", "Failed", "", "2024-01-02T00:00:00Z"),
        ];
        let candidates = vec![
            PathBuf::from("/dl/sub/AnnualReport.pdf"),
            PathBuf::from("/dl/other.pdf"),
        ];
        let folder = Path::new("/dl");
        let d = reconcile(&docs, Some(candidates.as_slice()), folder, &failed_policy(None));
        assert_eq!(
            d.to_insert,
            vec![PathBuf::from("/dl/sub/AnnualReport.pdf"), folder.join("missing.pdf")]
        );
    }

    #[test]
    fn reconcile_is_idempotent() {
        let docs = vec![
            doc("a1", "a", "Failed", "timeout", "2024-01-02T00:00:00Z"),
            doc("a2", "b", "Success", "", "2024-01-02T00:00:00Z"),
            doc("a3", "c", "Failed", INVALID_CONTENT_DETAIL, "2024-01-02T00:00:00Z"),
        ];
        let policy = failed_policy(Some("2024-01-01"));
        let first = reconcile(&docs, None, Path::new("/d"), &policy);
        let second = reconcile(&docs, None, Path::new("/d"), &policy);
        let as_sets = |d: &ReconciliationDecision| {
            (
                d.to_delete.iter().cloned().collect::<HashSet<_>>(),
                d.to_insert.iter().cloned().collect::<HashSet<_>>(),
            )
        };
        assert_eq!(as_sets(&first), as_sets(&second));
    }

    #[test]
    fn policy_from_config() {
        let config = ReprocessConfig {
            reprocess_failed_files: true,
            reprocess_valid_status_list: vec!["Failed".into(), "Processing".into()],
            reprocess_status_detail_list_contains: vec!["timeout".into()],
            reprocess_failed_files_exclude: vec!["skip".into()],
        };
        let policy = ReprocessPolicy::from_config(&config, None);
        assert!(policy.valid_statuses.contains(&IndexStatus::Processing));
        assert!(policy.exclude_names.contains("skip"));
        assert_eq!(policy.status_detail_substrings, vec!["timeout".to_string()]);
    }
}
