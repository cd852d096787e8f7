//! # Ingest Harness
//!
//! Keeps a RAG ingestion service's profile in step with a set of document
//! sources.
//!
//! Connectors bring documents into local folders. Every uploaded file gets a
//! JSON sidecar recording the service's answer and a SHA-256 of the content,
//! so later runs know what is unchanged, what must be replaced, and which
//! files are byte-for-byte copies of something already indexed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌───────────────┐
//! │ Connectors  │──▶│ Plan                 │──▶│ Orchestrator  │──▶ Ingestion API
//! │ FS / S3     │   │ sidecars / reconcile │   │ delete+upload │
//! └─────────────┘   │ dedup                │   └───────┬───────┘
//!                   └──────────────────────┘           ▼
//!                                                 sidecars + run log
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ingest sources                      # list configured connectors
//! ingest sync filesystem:docs         # upload new and changed files
//! ingest sync all --dry-run           # show the plan only
//! ingest documents --status Failed    # inspect the profile
//! ingest reprocess                    # retry failed documents
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and run counters |
//! | [`fingerprint`] | Content hashing |
//! | [`sidecar`] | Local metadata store |
//! | [`reconcile`] | Reprocessing plan from remote documents |
//! | [`dedup`] | Duplicate detection |
//! | [`api`] | Ingestion API client |
//! | [`orchestrator`] | Bounded delete/upload execution |
//! | [`traits`] | Connector trait and registry |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_s3`] | Amazon S3 connector |
//! | [`pipeline`] | End-to-end sync runs |
//! | [`progress`] | Progress reporting |
//! | [`sources`] | Connector listing |
//! | [`documents`] | Remote document listing |
//! | [`logging`] | Tracing subscriber setup |

pub mod api;
pub mod config;
pub mod connector_fs;
pub mod connector_s3;
pub mod dedup;
pub mod documents;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod sidecar;
pub mod sources;
pub mod traits;
