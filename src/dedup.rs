//! Content-hash duplicate detection.
//!
//! Before uploading a batch, each candidate's SHA-256 is checked against a
//! [`HashIndex`] built from the sidecars already in the download folder. A
//! candidate whose content is already indexed under a different document is
//! dropped from the upload set.
//!
//! Precedence is first-seen-wins everywhere: the first sidecar that records
//! a hash owns it, and within a batch the first candidate (in input order)
//! with a given hash is the one kept.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::fingerprint::hash_file;
use crate::sidecar::{read_sidecar, string_field, SidecarStore, CONTENT_HASH_FIELD};

/// Content hash → canonical document id.
#[derive(Debug, Default, Clone)]
pub struct HashIndex {
    entries: HashMap<String, String>,
    collisions: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every sidecar under `folder` that records both a content hash and
    /// the store's id field.
    pub fn build(folder: &Path, store: &SidecarStore) -> Self {
        Self::build_excluding(folder, store, &HashSet::new())
    }

    /// Like [`build`](Self::build), but sidecars whose id is in `excluded`
    /// (documents about to be deleted) never own a hash.
    pub fn build_excluding(
        folder: &Path,
        store: &SidecarStore,
        excluded: &HashSet<String>,
    ) -> Self {
        let mut index = Self::new();
        for sidecar in store.sidecars_in(folder) {
            let Some(data) = read_sidecar(&sidecar) else {
                continue;
            };
            let (Some(hash), Some(id)) = (
                string_field(&data, CONTENT_HASH_FIELD),
                string_field(&data, store.id_field()),
            ) else {
                continue;
            };
            if excluded.contains(&id) {
                continue;
            }
            index.insert(hash, id);
        }
        if index.collisions > 0 {
            tracing::warn!("{} duplicates found", index.collisions);
        }
        index
    }

    /// Record `hash → id` unless the hash is already owned. Returns whether
    /// the mapping was inserted.
    pub fn insert(&mut self, hash: String, id: String) -> bool {
        if let Some(existing) = self.entries.get(&hash) {
            if existing != &id {
                tracing::warn!("{} duplicate detected: using {}", id, existing);
                self.collisions += 1;
            }
            return false;
        }
        self.entries.insert(hash, id);
        true
    }

    pub fn get(&self, hash: &str) -> Option<&str> {
        self.entries.get(hash).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of sidecars whose hash was already owned by a different id.
    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

/// A candidate dropped because its content is already indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub path: PathBuf,
    pub hash: String,
    /// Id (or local name) of the document that keeps this content.
    pub surviving_id: String,
}

#[derive(Debug, Default)]
pub struct DuplicateReport {
    pub kept: Vec<PathBuf>,
    pub duplicates: Vec<Duplicate>,
    /// Remote ids previously recorded for duplicates; superseded by the
    /// surviving document and due for deletion.
    pub superseded_ids: Vec<String>,
}

impl DuplicateReport {
    pub fn duplicate_paths(&self) -> Vec<PathBuf> {
        self.duplicates.iter().map(|d| d.path.clone()).collect()
    }
}

/// Split `new_file_paths` into files to upload and duplicates of content the
/// index (built from sidecars under `local_folder`) already holds.
///
/// A candidate is a duplicate when its hash is indexed under an id other
/// than its own derived name: the id in its own sidecar, or its file stem
/// when it has none. Ids in `pending_deletes` are ignored by the index, so
/// nothing is ever a duplicate of a document the same run removes. Files that
/// cannot be hashed are kept so the upload step reports their failure.
pub fn detect_duplicates(
    new_file_paths: &[PathBuf],
    local_folder: &Path,
    store: &SidecarStore,
    pending_deletes: &HashSet<String>,
) -> DuplicateReport {
    let index = HashIndex::build_excluding(local_folder, store, pending_deletes);
    let mut report = DuplicateReport::default();
    // hash → (path, derived name) of candidates kept so far in this batch
    let mut batch: HashMap<String, (PathBuf, String)> = HashMap::new();

    for path in new_file_paths {
        let hash = match hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("Cannot fingerprint {}: {}", path.display(), e);
                report.kept.push(path.clone());
                continue;
            }
        };
        let own_id = store.find_uploaded_id(path);
        let derived = own_id.clone().unwrap_or_else(|| file_stem(path));

        let surviving = match index.get(&hash) {
            Some(id) if id != derived => Some(id.to_string()),
            _ => match batch.get(&hash) {
                Some((kept_path, _)) if kept_path == path => continue,
                Some((_, kept_name)) => Some(kept_name.clone()),
                None => None,
            },
        };

        match surviving {
            Some(surviving_id) => {
                tracing::info!(
                    "Duplicate found! {} matches {}",
                    path.display(),
                    surviving_id
                );
                if let Some(own) = own_id.filter(|own| own != &surviving_id) {
                    report.superseded_ids.push(own);
                }
                report.duplicates.push(Duplicate {
                    path: path.clone(),
                    hash,
                    surviving_id,
                });
            }
            None => {
                batch.insert(hash, (path.clone(), derived));
                report.kept.push(path.clone());
            }
        }
    }

    if !report.duplicates.is_empty() {
        tracing::warn!(
            "{} of {} files are duplicates",
            report.duplicates.len(),
            new_file_paths.len()
        );
    }
    report
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SidecarStore {
        SidecarStore::new("metadata", "id")
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    fn write_sidecar_for(path: &Path, id: &str) {
        let hash = hash_file(path).unwrap();
        let data = json!({"id": id, "contentHash": hash});
        let serde_json::Value::Object(map) = data else {
            unreachable!()
        };
        assert!(store().write(path, &map));
    }

    #[test]
    fn index_keeps_first_seen_on_collision() {
        let mut index = HashIndex::new();
        assert!(index.insert("h".into(), "first".into()));
        assert!(!index.insert("h".into(), "second".into()));
        assert_eq!(index.get("h"), Some("first"));
        assert_eq!(index.collisions(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn same_id_registering_again_is_not_a_collision() {
        let mut index = HashIndex::new();
        assert!(index.insert("h".into(), "doc".into()));
        assert!(!index.insert("h".into(), "doc".into()));
        assert_eq!(index.collisions(), 0);
        assert_eq!(index.get("h"), Some("doc"));
    }

    #[test]
    fn pending_delete_never_survives() {
        let dir = tempfile::tempdir().unwrap();
        let x = write(dir.path(), "x.pdf", "old body");
        write_sidecar_for(&x, "X");
        std::fs::write(&x, "new body").unwrap();
        let y = write(dir.path(), "y.pdf", "old body");

        let pending: HashSet<String> = ["X".to_string()].into_iter().collect();
        let report = detect_duplicates(&[x.clone(), y.clone()], dir.path(), &store(), &pending);
        assert_eq!(report.kept, vec![x, y]);
        assert!(report.duplicates.is_empty());

        let index = HashIndex::build_excluding(dir.path(), &store(), &pending);
        assert!(index.is_empty());
    }

    #[test]
    fn build_index_from_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.pdf", "alpha");
        let b = write(dir.path(), "b.pdf", "alpha");
        let c = write(dir.path(), "c.pdf", "gamma");
        write_sidecar_for(&a, "id-a");
        write_sidecar_for(&b, "id-b");
        write_sidecar_for(&c, "id-c");
        std::fs::write(dir.path().join("junk.pdf.metadata"), "{oops").unwrap();

        let index = HashIndex::build(dir.path(), &store());
        assert_eq!(index.len(), 2);
        assert_eq!(index.collisions(), 1);
        // sidecars are scanned in sorted order, so a.pdf owns the hash
        assert_eq!(index.get(&hash_file(&a).unwrap()), Some("id-a"));
    }

    #[test]
    fn new_file_matching_indexed_content_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let existing = write(dir.path(), "existing.pdf", "same bytes");
        write_sidecar_for(&existing, "doc-1");
        let incoming = write(dir.path(), "renamed copy.pdf", "same bytes");
        let unique = write(dir.path(), "unique.pdf", "other bytes");

        let report = detect_duplicates(
            &[incoming.clone(), unique.clone()],
            dir.path(),
            &store(),
            &none(),
        );
        assert_eq!(report.kept, vec![unique]);
        assert_eq!(report.duplicate_paths(), vec![incoming]);
        assert_eq!(report.duplicates[0].surviving_id, "doc-1");
        assert!(report.superseded_ids.is_empty());
    }

    #[test]
    fn file_matching_its_own_sidecar_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "self.pdf", "content");
        write_sidecar_for(&file, "doc-self");

        let report = detect_duplicates(&[file.clone()], dir.path(), &store(), &none());
        assert_eq!(report.kept, vec![file]);
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn duplicate_with_its_own_id_reports_superseded_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.pdf", "shared");
        write_sidecar_for(&a, "doc-a");
        let b = write(dir.path(), "b.pdf", "shared");
        write_sidecar_for(&b, "doc-b");

        let report = detect_duplicates(&[b.clone()], dir.path(), &store(), &none());
        assert_eq!(report.duplicate_paths(), vec![b]);
        assert_eq!(report.duplicates[0].surviving_id, "doc-a");
        assert_eq!(report.superseded_ids, vec!["doc-b".to_string()]);
    }

    #[test]
    fn identical_candidates_keep_exactly_one_in_either_order() {
        let dir = tempfile::tempdir().unwrap();
        let x = write(dir.path(), "x.txt", "twin");
        let y = write(dir.path(), "y.txt", "twin");

        for order in [vec![x.clone(), y.clone()], vec![y.clone(), x.clone()]] {
            let report = detect_duplicates(&order, dir.path(), &store(), &none());
            assert_eq!(report.kept.len(), 1);
            assert_eq!(report.duplicates.len(), 1);
            assert_eq!(report.kept[0], order[0]);
            assert_eq!(report.duplicates[0].path, order[1]);
        }
    }

    #[test]
    fn unreadable_candidate_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("ghost.pdf");
        let report = detect_duplicates(&[ghost.clone()], dir.path(), &store(), &none());
        assert_eq!(report.kept, vec![ghost]);
    }

    #[test]
    fn repeated_path_is_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.txt", "once");
        let report = detect_duplicates(&[a.clone(), a.clone()], dir.path(), &store(), &none());
        assert_eq!(report.kept, vec![a]);
        assert!(report.duplicates.is_empty());
    }
}
