//! Remote document overview for `ingest documents`.
//!
//! Lists every document in the configured profile, optionally filtered by
//! index status, followed by a per-status breakdown. Useful to check what a
//! reprocessing run would pick up before starting one.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::api::IngestionClient;
use crate::config::Config;
use crate::models::{IndexStatus, RemoteDocument};

/// Document counts keyed by index status, sorted by status name.
pub fn status_breakdown(docs: &[RemoteDocument]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for doc in docs {
        *counts.entry(doc.index_status.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Documents whose status matches `status` (case-insensitive).
pub fn filter_by_status<'a>(
    docs: &'a [RemoteDocument],
    status: Option<&str>,
) -> Vec<&'a RemoteDocument> {
    docs.iter()
        .filter(|d| match status {
            Some(s) => d.index_status.as_str().eq_ignore_ascii_case(s),
            None => true,
        })
        .collect()
}

/// Run the documents command: list the profile and print a summary.
pub async fn run_documents(config: &Config, status: Option<&str>) -> Result<()> {
    let client = IngestionClient::new(&config.api)?;
    client
        .validate_profile()
        .await
        .with_context(|| format!("Invalid profile '{}'", client.profile()))?;
    let docs = client
        .list_all_documents()
        .await
        .context("Failed to list profile documents")?;

    let shown = filter_by_status(&docs, status);

    println!("Profile: {}", client.profile());
    println!();
    println!(
        "  {:<38} {:<40} {:<12} {}",
        "ID", "NAME", "STATUS", "TIMESTAMP"
    );
    println!("  {}", "-".repeat(110));
    for doc in &shown {
        println!(
            "  {:<38} {:<40} {:<12} {}",
            doc.id.as_deref().unwrap_or("-"),
            truncate(&doc.file_name(), 40),
            doc.index_status.as_str(),
            doc.timestamp.as_deref().unwrap_or("-")
        );
        if doc.index_status == IndexStatus::Failed && !doc.index_detail.is_empty() {
            println!("  {:<38} {}", "", doc.index_detail);
        }
    }

    println!();
    println!("  Shown: {} / {}", shown.len(), docs.len());
    for (status, count) in status_breakdown(&docs) {
        println!("  {:<12} {:>6}", status, count);
    }
    println!();
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
