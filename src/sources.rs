//! Connector listing for `ingest sources`.

use anyhow::Result;

use crate::config::Config;
use crate::traits::ConnectorRegistry;

/// One line of the `sources` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub label: String,
    pub local_folder: String,
    pub status: &'static str,
}

/// Describe every configured connector.
///
/// A filesystem connector is `OK` when its root exists. Download-based
/// connectors are `OK` as long as their folder exists or can be created on
/// the first sync.
pub fn source_statuses(config: &Config) -> Vec<SourceStatus> {
    let registry = ConnectorRegistry::from_config(config);
    registry
        .connectors()
        .iter()
        .map(|c| {
            let folder = c.local_folder();
            let status = if folder.is_dir() {
                "OK"
            } else if c.connector_type() == "filesystem" {
                "MISSING ROOT"
            } else {
                "NOT SYNCED"
            };
            SourceStatus {
                label: c.source_label(),
                local_folder: folder.display().to_string(),
                status,
            }
        })
        .collect()
}

pub fn list_sources(config: &Config) -> Result<()> {
    let rows = source_statuses(config);
    if rows.is_empty() {
        println!("No connectors configured.");
        return Ok(());
    }

    println!("{:<28} {:<14} LOCAL FOLDER", "CONNECTOR", "STATUS");
    for row in &rows {
        println!("{:<28} {:<14} {}", row.label, row.status, row.local_folder);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn statuses_reflect_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        std::fs::create_dir_all(&root).unwrap();
        let toml = format!(
            r#"
[api]
base_url = "http://localhost"
api_token = "t"
profile = "p"

[download]
dir = "{dl}"

[connectors.filesystem.docs]
root = "{root}"

[connectors.filesystem.gone]
root = "{gone}"

[connectors.s3.runbooks]
bucket = "b"
"#,
            dl = dir.path().join("dl").display(),
            root = root.display(),
            gone = dir.path().join("gone").display(),
        );
        let config = parse_config(&toml).unwrap();
        let rows = source_statuses(&config);
        let by_label: Vec<(&str, &str)> =
            rows.iter().map(|r| (r.label.as_str(), r.status)).collect();
        assert_eq!(
            by_label,
            vec![
                ("filesystem:docs", "OK"),
                ("filesystem:gone", "MISSING ROOT"),
                ("s3:runbooks", "NOT SYNCED"),
            ]
        );
    }
}
