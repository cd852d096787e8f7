//! Local sidecar metadata store.
//!
//! Every downloaded content file may have a companion JSON file named
//! `<content-file-name>.<ext>` (e.g. `report.pdf.metadata`) recording the
//! remote document id, index status and content hash returned by the last
//! successful upload. Sidecars are always rewritten whole, never patched.
//!
//! Nothing in this module propagates I/O or JSON errors: a missing or corrupt
//! sidecar is logged and treated as "no prior state".

use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DownloadConfig;
use crate::models::IndexStatus;

/// Parsed sidecar contents.
pub type Sidecar = Map<String, Value>;

/// Sidecar field holding the content fingerprint.
pub const CONTENT_HASH_FIELD: &str = "contentHash";
/// Sidecar field holding the last known index status.
pub const INDEX_STATUS_FIELD: &str = "indexStatus";

/// True when `path` carries the sidecar extension and the content file it
/// would describe (the path minus that extension) exists.
///
/// With `extension = "json"`, `report.pdf.json` next to `report.pdf` is a
/// sidecar while a standalone `data.json` is content.
pub fn is_sidecar_path(path: &Path, extension: &str) -> bool {
    path.extension().map(|e| e == extension) == Some(true) && path.with_extension("").is_file()
}

/// Serialize `data` as pretty-printed UTF-8 JSON at `path`.
///
/// Returns `false` (after logging) if the file could not be written.
pub fn write_sidecar(data: &Sidecar, path: &Path) -> bool {
    let json = match serde_json::to_string_pretty(data) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!("Cannot serialize sidecar {}: {}", path.display(), e);
            return false;
        }
    };
    match std::fs::write(path, json) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Cannot write sidecar {}: {}", path.display(), e);
            false
        }
    }
}

/// Read a sidecar. `None` when missing, unreadable, malformed, or not a JSON object.
pub fn read_sidecar(path: &Path) -> Option<Sidecar> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::error!("Cannot read sidecar {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            tracing::error!("Sidecar {} is not a JSON object", path.display());
            None
        }
        Err(e) => {
            tracing::error!("Error decoding JSON in {}: {}", path.display(), e);
            None
        }
    }
}

/// Read `key` as a string. Numeric ids are accepted and stringified.
pub fn string_field(data: &Sidecar, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A sidecar whose recorded status matched a reprocess status list.
#[derive(Debug, Clone)]
pub struct FailedFile {
    pub content_path: PathBuf,
    pub id: Option<String>,
    pub status: IndexStatus,
    pub data: Sidecar,
}

/// Sidecar access for one download folder layout: a fixed sidecar
/// extension and the field that carries the remote id.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    extension: String,
    id_field: String,
}

impl SidecarStore {
    pub fn new(extension: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            id_field: id_field.into(),
        }
    }

    pub fn from_config(download: &DownloadConfig) -> Self {
        Self::new(&download.metadata_extension, &download.id_field)
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// `<content>.<ext>`, next to the content file.
    pub fn path_for(&self, content: &Path) -> PathBuf {
        let mut s = OsString::from(content.as_os_str());
        s.push(".");
        s.push(&self.extension);
        PathBuf::from(s)
    }

    pub fn is_sidecar(&self, path: &Path) -> bool {
        is_sidecar_path(path, &self.extension)
    }

    /// Content file a sidecar belongs to (the sidecar path minus its extension).
    pub fn content_path(&self, sidecar: &Path) -> Option<PathBuf> {
        if self.is_sidecar(sidecar) {
            Some(sidecar.with_extension(""))
        } else {
            None
        }
    }

    pub fn read(&self, content: &Path) -> Option<Sidecar> {
        read_sidecar(&self.path_for(content))
    }

    pub fn write(&self, content: &Path, data: &Sidecar) -> bool {
        write_sidecar(data, &self.path_for(content))
    }

    /// Remote id recorded for `content` by a previous upload, if any.
    pub fn find_uploaded_id(&self, content: &Path) -> Option<String> {
        self.read(content)
            .and_then(|data| string_field(&data, &self.id_field))
    }

    /// Paths that have no sidecar yet.
    pub fn new_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| !self.path_for(p).exists())
            .cloned()
            .collect()
    }

    /// Ids previously recorded for `paths`; these must be deleted remotely
    /// before the paths are uploaded again.
    pub fn ids_to_delete(&self, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|p| self.find_uploaded_id(p))
            .collect()
    }

    /// All sidecar files under `dir`, sorted.
    pub fn sidecars_in(&self, dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", dir.display(), err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && self.is_sidecar(e.path()))
            .map(|e| e.into_path())
            .collect();
        found.sort();
        found
    }

    /// Sidecars under `dir` whose recorded index status is in `statuses`.
    pub fn search_failed_files(&self, dir: &Path, statuses: &[IndexStatus]) -> Vec<FailedFile> {
        let mut failed = Vec::new();
        for sidecar in self.sidecars_in(dir) {
            let Some(data) = read_sidecar(&sidecar) else {
                continue;
            };
            let status = data
                .get(INDEX_STATUS_FIELD)
                .and_then(Value::as_str)
                .map(IndexStatus::from)
                .unwrap_or_default();
            if !statuses.contains(&status) {
                continue;
            }
            let Some(content_path) = self.content_path(&sidecar) else {
                continue;
            };
            failed.push(FailedFile {
                content_path,
                id: string_field(&data, &self.id_field),
                status,
                data,
            });
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SidecarStore {
        SidecarStore::new("metadata", "id")
    }

    fn as_map(v: Value) -> Sidecar {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn write_then_read_returns_same_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf.metadata");
        let data = as_map(json!({
            "id": "a1",
            "name": "doc",
            "indexStatus": "Success",
            "contentHash": "abc",
            "tags": ["x", "y"],
            "nested": {"author": "Zoë", "pages": 3, "ratio": 0.5, "draft": false, "none": null}
        }));
        assert!(write_sidecar(&data, &path));
        assert_eq!(read_sidecar(&path), Some(data));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'), "sidecar should be pretty-printed");
    }

    #[test]
    fn read_missing_and_malformed_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_sidecar(&dir.path().join("missing.metadata")), None);

        let bad = dir.path().join("bad.metadata");
        std::fs::write(&bad, "{ not json").unwrap();
        assert_eq!(read_sidecar(&bad), None);

        let array = dir.path().join("array.metadata");
        std::fs::write(&array, "[1, 2]").unwrap();
        assert_eq!(read_sidecar(&array), None);
    }

    #[test]
    fn write_into_missing_directory_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/x.metadata");
        assert!(!write_sidecar(&Sidecar::new(), &path));
    }

    #[test]
    fn path_for_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let content = dir.path().join("report.pdf");
        std::fs::write(&content, "x").unwrap();
        let sidecar = dir.path().join("report.pdf.metadata");
        assert_eq!(s.path_for(&content), sidecar);
        assert!(s.is_sidecar(&sidecar));
        assert!(!s.is_sidecar(&content));
        assert_eq!(s.content_path(&sidecar), Some(content));
        assert!(!s.is_sidecar(&dir.path().join("orphan.pdf.metadata")));
    }

    #[test]
    fn json_extension_leaves_json_content_alone() {
        let dir = tempfile::tempdir().unwrap();
        let s = SidecarStore::new("json", "id");
        let report = dir.path().join("report.pdf");
        let data = dir.path().join("data.json");
        std::fs::write(&report, "pdf").unwrap();
        std::fs::write(&data, r#"{"rows": []}"#).unwrap();
        s.write(&report, &as_map(json!({"id": "r1", "contentHash": "h"})));

        assert!(s.is_sidecar(&dir.path().join("report.pdf.json")));
        assert!(!s.is_sidecar(&data));
        assert_eq!(s.sidecars_in(dir.path()), vec![dir.path().join("report.pdf.json")]);

        // a sidecar for the json content file itself
        s.write(&data, &as_map(json!({"id": "d1"})));
        assert!(s.is_sidecar(&dir.path().join("data.json.json")));
        assert!(!s.is_sidecar(&data));
    }

    #[test]
    fn find_uploaded_id_reads_id_field() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let content = dir.path().join("a.txt");
        std::fs::write(&content, "x").unwrap();
        assert_eq!(s.find_uploaded_id(&content), None);

        s.write(&content, &as_map(json!({"id": "doc-9"})));
        assert_eq!(s.find_uploaded_id(&content), Some("doc-9".to_string()));

        s.write(&content, &as_map(json!({"id": 42})));
        assert_eq!(s.find_uploaded_id(&content), Some("42".to_string()));

        s.write(&content, &as_map(json!({"name": "no id"})));
        assert_eq!(s.find_uploaded_id(&content), None);
    }

    #[test]
    fn custom_id_field() {
        let dir = tempfile::tempdir().unwrap();
        let s = SidecarStore::new("json", "documentid");
        let content = dir.path().join("a.txt");
        s.write(&content, &as_map(json!({"id": "wrong", "documentid": "right"})));
        assert_eq!(s.find_uploaded_id(&content), Some("right".to_string()));
    }

    #[test]
    fn new_files_and_ids_to_delete() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let seen = dir.path().join("seen.pdf");
        let fresh = dir.path().join("fresh.pdf");
        std::fs::write(&seen, "1").unwrap();
        std::fs::write(&fresh, "2").unwrap();
        s.write(&seen, &as_map(json!({"id": "old-id"})));

        let paths = vec![seen.clone(), fresh.clone()];
        assert_eq!(s.new_files(&paths), vec![fresh]);
        assert_eq!(s.ids_to_delete(&paths), vec!["old-id".to_string()]);
    }

    #[test]
    fn search_failed_files_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        let sub = dir.path().join("nested");
        std::fs::create_dir_all(&sub).unwrap();

        for content in [dir.path().join("ok.pdf"), sub.join("bad.pdf"), dir.path().join("broken.pdf")] {
            std::fs::write(content, "x").unwrap();
        }
        s.write(
            &dir.path().join("ok.pdf"),
            &as_map(json!({"id": "1", "indexStatus": "Success"})),
        );
        s.write(
            &sub.join("bad.pdf"),
            &as_map(json!({"id": "2", "indexStatus": "Failed"})),
        );
        std::fs::write(dir.path().join("broken.pdf.metadata"), "{").unwrap();

        let failed = s.search_failed_files(dir.path(), &[IndexStatus::Failed]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id.as_deref(), Some("2"));
        assert_eq!(failed[0].content_path, sub.join("bad.pdf"));
        assert_eq!(failed[0].status, IndexStatus::Failed);
    }
}
