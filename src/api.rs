//! Ingestion API client.
//!
//! Thin async wrapper over the profile-scoped REST endpoints of the RAG
//! ingestion service:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`IngestionClient::validate_profile`] | `GET /v1/search/profile/{profile}` |
//! | [`IngestionClient::list_documents`] | `GET .../documents?skip=&count=` |
//! | [`IngestionClient::upload_document`] | multipart `POST .../document` |
//! | [`IngestionClient::delete_document`] | `DELETE .../document/{id}` |
//! | [`IngestionClient::append_log`] | `POST .../log` |
//!
//! Every request carries the bearer token and `Accept: application/json`.
//! Failures are classified from the HTTP status into [`ApiErrorKind`]; no
//! call is retried here.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ApiConfig, DownloadConfig};
use crate::fingerprint::hash_file;
use crate::models::{IndexStatus, RemoteDocument, UploadOutcome};
use crate::orchestrator::DocumentSink;
use crate::sidecar::{SidecarStore, CONTENT_HASH_FIELD};

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    /// Server-side or network trouble; a later run may succeed.
    Transient,
    Unknown,
}

impl ApiErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 => ApiErrorKind::Unauthorized,
            403 => ApiErrorKind::Forbidden,
            404 => ApiErrorKind::NotFound,
            408 | 429 => ApiErrorKind::Transient,
            s if (500..600).contains(&s) => ApiErrorKind::Transient,
            _ => ApiErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorKind::Unauthorized => "not authorized",
            ApiErrorKind::Forbidden => "forbidden",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::Transient => "transient failure",
            ApiErrorKind::Unknown => "request failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    fn from_response(status: StatusCode, url: &str, body: &str) -> Self {
        Self {
            kind: ApiErrorKind::from_status(status),
            status: Some(status.as_u16()),
            message: format!("{} returned {}: {}", url, status, body.trim()),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self {
                kind: ApiErrorKind::from_status(status),
                status: Some(status.as_u16()),
                message: e.to_string(),
            };
        }
        let kind = if e.is_timeout() || e.is_connect() {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Unknown
        };
        Self::new(kind, e.to_string())
    }
}

/// Collapse an `{"errors": [{"id", "description"}]}` body into one line.
fn describe_errors(errors: &Value) -> String {
    match errors.as_array() {
        Some(list) if !list.is_empty() => list
            .iter()
            .map(|e| {
                let id = e.get("id").map(|v| v.to_string()).unwrap_or_default();
                let desc = e
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("no description");
                format!("{} {}", id, desc).trim().to_string()
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => errors.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Payloads
// ═══════════════════════════════════════════════════════════════════════

/// Accepted upload. `body` is the full response object, the basis of the
/// sidecar written for the uploaded file.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub id: String,
    pub name: String,
    pub index_status: IndexStatus,
    pub index_detail: String,
    pub body: Map<String, Value>,
}

impl UploadResponse {
    fn from_body(body: Value) -> Result<Self, ApiError> {
        let Value::Object(map) = body else {
            return Err(ApiError::new(
                ApiErrorKind::Unknown,
                "upload response is not a JSON object",
            ));
        };
        if let Some(errors) = map.get("errors") {
            return Err(ApiError::new(ApiErrorKind::Unknown, describe_errors(errors)));
        }
        let text = |key: &str| match map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let id = text("id");
        if id.is_empty() {
            return Err(ApiError::new(
                ApiErrorKind::Unknown,
                "upload response carries no document id",
            ));
        }
        Ok(Self {
            name: text("name"),
            index_status: IndexStatus::from(text("indexStatus")),
            index_detail: text("indexDetail"),
            id,
            body: map,
        })
    }
}

/// One page of the document listing. `raw_count` is the number of entries
/// the server returned, parsed or not, and drives the paging offset.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<RemoteDocument>,
    pub raw_count: usize,
}

/// One operation-log record posted to the profile's log endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub step: String,
    pub level: i32,
    pub name: String,
    pub data: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct IngestionClient {
    http: reqwest::Client,
    base_url: String,
    profile: String,
    token: String,
    page_size: usize,
}

impl IngestionClient {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            anyhow::bail!("api.base_url must not be empty");
        }
        let token = config
            .token()
            .ok_or_else(|| anyhow::anyhow!("No API token configured"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            profile: config.profile.clone(),
            token,
            page_size: config.page_size.max(1),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    fn profile_url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/search/profile/{}{}",
            self.base_url, self.profile, suffix
        )
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
    }

    /// Turn a response into its JSON body, or an error classified by status.
    /// An empty 2xx body reads as `null`.
    async fn json_body(resp: Response, url: &str) -> Result<Value, ApiError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_response(status, url, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            ApiError::new(
                ApiErrorKind::Unknown,
                format!("invalid JSON from {}: {}", url, e),
            )
        })
    }

    /// Succeeds iff the profile exists and the body reports no `errors`.
    pub async fn validate_profile(&self) -> Result<(), ApiError> {
        let url = self.profile_url("");
        let resp = self.authorized(self.http.get(&url)).send().await?;
        let body = Self::json_body(resp, &url).await?;
        if let Some(errors) = body.get("errors") {
            return Err(ApiError::new(
                ApiErrorKind::NotFound,
                format!("profile '{}': {}", self.profile, describe_errors(errors)),
            ));
        }
        Ok(())
    }

    /// One page of the profile's documents. Entries that do not parse are
    /// dropped with a warning but still counted in `raw_count`.
    pub async fn list_documents(
        &self,
        skip: usize,
        count: usize,
    ) -> Result<DocumentPage, ApiError> {
        let url = self.profile_url("/documents");
        let resp = self
            .authorized(self.http.get(&url))
            .query(&[("skip", skip), ("count", count)])
            .send()
            .await?;
        let body = Self::json_body(resp, &url).await?;
        if let Some(errors) = body.get("errors") {
            return Err(ApiError::new(ApiErrorKind::Unknown, describe_errors(errors)));
        }

        let entries = body
            .get("documents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let raw_count = entries.len();
        let mut documents = Vec::with_capacity(raw_count);
        for entry in entries {
            match serde_json::from_value::<RemoteDocument>(entry) {
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::warn!("Skipping malformed document record: {}", e),
            }
        }
        Ok(DocumentPage {
            documents,
            raw_count,
        })
    }

    /// Every document of the profile, fetched page by page.
    pub async fn list_all_documents(&self) -> Result<Vec<RemoteDocument>, ApiError> {
        let mut all = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.list_documents(skip, self.page_size).await?;
            skip += page.raw_count;
            all.extend(page.documents);
            if page.raw_count < self.page_size {
                break;
            }
        }
        tracing::debug!("Listed {} documents in profile {}", all.len(), self.profile);
        Ok(all)
    }

    /// Upload one file with optional metadata (sent as a JSON string part).
    pub async fn upload_document(
        &self,
        path: &Path,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<UploadResponse, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::new(
                ApiErrorKind::Unknown,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let mut form = Form::new().part("file", part);
        if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
            let json = serde_json::to_string(meta).map_err(|e| {
                ApiError::new(ApiErrorKind::Unknown, format!("bad metadata: {}", e))
            })?;
            form = form.text("metadata", json);
        }

        let url = self.profile_url("/document");
        let resp = self
            .authorized(self.http.post(&url))
            .multipart(form)
            .send()
            .await?;
        let body = Self::json_body(resp, &url).await?;
        UploadResponse::from_body(body)
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), ApiError> {
        let url = self.profile_url(&format!("/document/{}", id));
        let resp = self.authorized(self.http.delete(&url)).send().await?;
        let body = Self::json_body(resp, &url).await?;
        if let Some(errors) = body.get("errors") {
            return Err(ApiError::new(ApiErrorKind::Unknown, describe_errors(errors)));
        }
        Ok(())
    }

    pub async fn append_log(&self, entry: &LogEntry) -> Result<(), ApiError> {
        let url = self.profile_url("/log");
        let resp = self
            .authorized(self.http.post(&url))
            .json(entry)
            .send()
            .await?;
        Self::json_body(resp, &url).await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════

/// [`DocumentSink`] backed by the ingestion API.
///
/// After a successful upload the response, extended with the file's
/// `contentHash`, is written as the file's sidecar (when `save_answer` is
/// on). Per-file upload metadata is looked up by path.
pub struct IngestionSink {
    client: IngestionClient,
    store: SidecarStore,
    save_answer: bool,
    metadata: HashMap<PathBuf, Map<String, Value>>,
}

impl IngestionSink {
    pub fn new(client: IngestionClient, download: &DownloadConfig) -> Self {
        Self {
            client,
            store: SidecarStore::from_config(download),
            save_answer: download.save_answer,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<PathBuf, Map<String, Value>>) -> Self {
        self.metadata = metadata;
        self
    }

    fn save_sidecar(&self, path: &Path, response: &UploadResponse) {
        let mut data = response.body.clone();
        match hash_file(path) {
            Ok(hash) => {
                data.insert(CONTENT_HASH_FIELD.to_string(), Value::String(hash));
            }
            Err(e) => tracing::warn!("Uploaded {} but could not hash it: {}", path.display(), e),
        }
        self.store.write(path, &data);
    }
}

#[async_trait]
impl DocumentSink for IngestionSink {
    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.client.delete_document(id).await?;
        tracing::info!("{} deleted", id);
        Ok(())
    }

    async fn upload(&self, path: &Path) -> anyhow::Result<UploadOutcome> {
        let started = std::time::Instant::now();
        let response = match self
            .client
            .upload_document(path, self.metadata.get(path))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("{},Error,{}", path.display(), e);
                return Ok(UploadOutcome::Failed(e.to_string()));
            }
        };

        if self.save_answer {
            self.save_sidecar(path, &response);
        }
        tracing::info!(
            "{}, {},{},{},{:.2} seconds",
            response.index_status,
            path.display(),
            response.name,
            response.id,
            started.elapsed().as_secs_f64()
        );
        Ok(UploadOutcome::Uploaded {
            id: response.id,
            status: response.index_status,
        })
    }

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()> {
        self.client.append_log(&entry).await?;
        Ok(())
    }
}
