//! # Ingest Harness CLI (`ingest`)
//!
//! ## Usage
//!
//! ```bash
//! ingest --config ./config/ingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ingest sources` | List configured connectors and their local folders |
//! | `ingest sync <connector>` | Scan a connector and upload what changed |
//! | `ingest reprocess` | Retry documents recorded as failed in local sidecars |
//! | `ingest documents` | List the profile's remote documents |
//! | `ingest hash <file>` | Print a file's content fingerprint |
//!
//! ## Examples
//!
//! ```bash
//! # Upload new and changed files from a local directory
//! ingest sync filesystem:docs
//!
//! # Everything modified since a date, plan only
//! ingest sync all --since 2024-01-10 --dry-run
//!
//! # Failed documents in the profile
//! ingest documents --status Failed
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ingest_harness::config;
use ingest_harness::documents;
use ingest_harness::fingerprint::hash_file;
use ingest_harness::logging;
use ingest_harness::models::parse_timestamp;
use ingest_harness::pipeline::{self, SyncOptions};
use ingest_harness::progress::ProgressMode;
use ingest_harness::sources;

/// Ingest Harness CLI: keeps an ingestion profile in sync with document
/// sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ingest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ingest",
    about = "Ingest Harness: sync document sources into a RAG ingestion profile",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ingest.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = ProgressArg::Auto)]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    /// Human progress when stderr is a terminal, otherwise none.
    Auto,
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured connectors and their status.
    Sources,

    /// Scan a connector and bring the profile up to date.
    ///
    /// Connector format: `all`, `<type>`, or `<type>:<name>`.
    /// Examples: `all`, `filesystem`, `filesystem:docs`, `s3:runbooks`.
    Sync {
        connector: String,

        /// Only consider items modified on or after this date (YYYY-MM-DD
        /// or RFC 3339).
        #[arg(long)]
        since: Option<String>,

        /// Print the plan without deleting or uploading anything.
        #[arg(long)]
        dry_run: bool,

        /// Ignore recorded content hashes and re-upload everything.
        #[arg(long)]
        full: bool,
    },

    /// Re-upload documents whose sidecars record a reprocessable status.
    Reprocess {
        /// Only documents indexed on or after this date.
        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// List the profile's documents.
    Documents {
        /// Only show documents with this index status.
        #[arg(long)]
        status: Option<String>,
    },

    /// Print the SHA-256 content fingerprint of a file.
    Hash { file: PathBuf },
}

fn parse_since(since: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match since {
        None => Ok(None),
        Some(s) => match parse_timestamp(s) {
            Some(ts) => Ok(Some(ts)),
            None => bail!("Invalid --since '{}': expected YYYY-MM-DD or RFC 3339", s),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let progress = ProgressMode::from(cli.progress);

    // Commands that don't require config
    if let Commands::Hash { file } = &cli.command {
        println!("{}  {}", hash_file(file)?, file.display());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync {
            connector,
            since,
            dry_run,
            full,
        } => {
            let options = SyncOptions {
                since: parse_since(since.as_deref())?,
                dry_run,
                full,
                progress,
            };
            let counters = pipeline::run_sync(&cfg, &connector, options).await?;
            if !counters.is_clean() {
                tracing::warn!("Finished with failures: {}", counters.summary_line());
            }
        }
        Commands::Reprocess { since, dry_run } => {
            let options = SyncOptions {
                since: parse_since(since.as_deref())?,
                dry_run,
                full: false,
                progress,
            };
            pipeline::run_reprocess_local(&cfg, options).await?;
        }
        Commands::Documents { status } => {
            documents::run_documents(&cfg, status.as_deref()).await?;
        }
        Commands::Hash { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
