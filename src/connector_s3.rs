//! Amazon S3 connector.
//!
//! Lists objects in a bucket through the S3 REST API with AWS Signature V4
//! authentication and downloads each matching object into the connector's
//! download folder, keeping the key's relative path. Pagination is handled
//! through `ListObjectsV2` continuation tokens.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.s3.runbooks]
//! bucket = "acme-docs"
//! prefix = "engineering/runbooks/"
//! region = "us-east-1"
//! include_globs = ["**/*.pdf"]
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::config::S3ConnectorConfig;
use crate::models::{ScanResult, SourceItem};
use crate::traits::Connector;

// ═══════════════════════════════════════════════════════════════════════
// Connector trait implementation
// ═══════════════════════════════════════════════════════════════════════

/// An S3 connector instance.
pub struct S3Connector {
    /// Instance name (e.g. `"runbooks"`).
    name: String,
    config: S3ConnectorConfig,
    download_dir: PathBuf,
}

impl S3Connector {
    pub fn new(name: String, config: S3ConnectorConfig, download_dir: PathBuf) -> Self {
        Self {
            name,
            config,
            download_dir,
        }
    }
}

#[async_trait]
impl Connector for S3Connector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Download objects from an S3 bucket"
    }

    fn connector_type(&self) -> &str {
        "s3"
    }

    fn local_folder(&self) -> PathBuf {
        self.download_dir.clone()
    }

    async fn scan(&self, since: Option<DateTime<Utc>>) -> Result<ScanResult> {
        scan_s3(&self.name, &self.config, &self.download_dir, since).await
    }
}

type HmacSha256 = Hmac<Sha256>;

/// List the bucket, filter by globs and `since`, and download every match
/// into `download_dir`.
///
/// Listing failures abort the scan; a failed object download is counted in
/// [`ScanResult::download_errors`] and the scan continues.
pub async fn scan_s3(
    name: &str,
    s3_config: &S3ConnectorConfig,
    download_dir: &Path,
    since: Option<DateTime<Utc>>,
) -> Result<ScanResult> {
    let creds = AwsCredentials::from_env()?;

    let include_set = build_globset(&s3_config.include_globs)?;
    let exclude_set = build_globset(&s3_config.exclude_globs)?;

    let client = reqwest::Client::new();
    let objects = list_objects(&client, s3_config, &creds).await?;

    std::fs::create_dir_all(download_dir).with_context(|| {
        format!("Failed to create download folder {}", download_dir.display())
    })?;

    let mut result = ScanResult::default();
    let mut skipped_old = 0usize;

    for obj in &objects {
        let rel_key = relative_key(&obj.key, &s3_config.prefix);

        if exclude_set.is_match(&rel_key) || !include_set.is_match(&rel_key) {
            continue;
        }
        if let Some(cutoff) = since {
            if obj.last_modified < cutoff {
                skipped_old += 1;
                continue;
            }
        }

        let Some(target) = local_target(download_dir, &rel_key) else {
            tracing::warn!("Refusing to download s3 key with unsafe path: {}", obj.key);
            result.download_errors += 1;
            continue;
        };

        if let Err(e) = download_object(&client, s3_config, &creds, &obj.key, &target).await {
            tracing::warn!(
                "Failed to download s3://{}/{}: {:#}",
                s3_config.bucket,
                obj.key,
                e
            );
            result.download_errors += 1;
            continue;
        }
        tracing::debug!("{} to {}", obj.key, target.display());

        let title = obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string();
        let mut metadata = Map::new();
        metadata.insert("bucket".into(), Value::String(s3_config.bucket.clone()));
        metadata.insert("key".into(), Value::String(obj.key.clone()));
        metadata.insert("etag".into(), Value::String(obj.etag.clone()));
        metadata.insert("size".into(), Value::from(obj.size));
        metadata.insert(
            "last_modified_date".into(),
            Value::String(obj.last_modified.to_rfc3339()),
        );

        result.items.push(SourceItem {
            source: format!("s3:{}", name),
            source_id: obj.key.clone(),
            path: target,
            source_url: Some(format!("s3://{}/{}", s3_config.bucket, obj.key)),
            title: Some(title),
            updated_at: obj.last_modified,
            metadata,
        });
    }

    result.items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    tracing::info!(
        "s3:{} Skipped: {} Downloaded: {} Failed: {}",
        name,
        skipped_old,
        result.items.len(),
        result.download_errors
    );
    Ok(result)
}

/// Key with the configured prefix stripped (used for glob matching and the
/// local layout).
fn relative_key(key: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    let prefix = prefix.trim_end_matches('/');
    key.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('/').to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Local path for a relative key, or `None` if the key would escape
/// `download_dir`.
fn local_target(download_dir: &Path, rel_key: &str) -> Option<PathBuf> {
    let rel = Path::new(rel_key);
    let safe = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || rel_key.is_empty() {
        return None;
    }
    Some(download_dir.join(rel))
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Requests ============

/// Where requests go. Custom endpoints are addressed path-style
/// (`/<bucket>/<key>`), AWS virtual-hosted style.
struct Endpoint {
    scheme: &'static str,
    host: String,
    path_prefix: String,
}

fn endpoint(s3_config: &S3ConnectorConfig) -> Endpoint {
    match &s3_config.endpoint_url {
        Some(url) => {
            let scheme = if url.starts_with("http://") {
                "http"
            } else {
                "https"
            };
            Endpoint {
                scheme,
                host: url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string(),
                path_prefix: format!("/{}", uri_encode(&s3_config.bucket)),
            }
        }
        None => Endpoint {
            scheme: "https",
            host: format!("{}.s3.{}.amazonaws.com", s3_config.bucket, s3_config.region),
            path_prefix: String::new(),
        },
    }
}

/// Build a SigV4-signed GET for `canonical_uri` with `query` parameters.
fn signed_get(
    client: &reqwest::Client,
    s3_config: &S3ConnectorConfig,
    creds: &AwsCredentials,
    canonical_uri: &str,
    query: &[(String, String)],
    now: DateTime<Utc>,
) -> reqwest::RequestBuilder {
    let ep = endpoint(s3_config);
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut sorted = query.to_vec();
    sorted.sort();
    let canonical_querystring = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let payload_hash = hex_sha256(b"");
    let mut headers = vec![
        ("host".to_string(), ep.host.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort();

    let authorization = authorization_header(
        creds,
        &s3_config.region,
        &amz_date,
        &date_stamp,
        &format!("{}{}", ep.path_prefix, canonical_uri),
        &canonical_querystring,
        &headers,
        &payload_hash,
    );

    let mut url = format!("{}://{}{}{}", ep.scheme, ep.host, ep.path_prefix, canonical_uri);
    if !canonical_querystring.is_empty() {
        url.push('?');
        url.push_str(&canonical_querystring);
    }

    let mut req = client
        .get(&url)
        .header("Authorization", authorization)
        .header("x-amz-content-sha256", payload_hash)
        .header("x-amz-date", amz_date);
    if let Some(token) = &creds.session_token {
        req = req.header("x-amz-security-token", token);
    }
    req
}

/// `Authorization` header value for a GET request with sorted, lowercase
/// `headers`.
#[allow(clippy::too_many_arguments)]
fn authorization_header(
    creds: &AwsCredentials,
    region: &str,
    amz_date: &str,
    date_stamp: &str,
    canonical_uri: &str,
    canonical_querystring: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> String {
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "GET\n{}\n{}\n{}\n{}\n{}",
        canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    )
}

// ============ S3 Object Listing ============

/// One entry of a `ListObjectsV2` response.
struct S3Object {
    key: String,
    last_modified: DateTime<Utc>,
    /// Entity tag, stripped of surrounding quotes.
    etag: String,
    size: i64,
}

async fn list_objects(
    client: &reqwest::Client,
    s3_config: &S3ConnectorConfig,
    creds: &AwsCredentials,
) -> Result<Vec<S3Object>> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !s3_config.prefix.is_empty() {
            query.push(("prefix".to_string(), s3_config.prefix.clone()));
        }
        if let Some(token) = &continuation_token {
            query.push(("continuation-token".to_string(), token.clone()));
        }

        let resp = signed_get(client, s3_config, creds, "/", &query, Utc::now())
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to list S3 objects in s3://{}/{}",
                    s3_config.bucket, s3_config.prefix
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let xml_body = resp.text().await?;
        let page = parse_list_objects_response(&xml_body);
        objects.extend(page.objects);

        match page.next_token {
            Some(token) if page.is_truncated => continuation_token = Some(token),
            _ => break,
        }
    }

    Ok(objects)
}

/// Download one object to `target`, creating parent folders.
async fn download_object(
    client: &reqwest::Client,
    s3_config: &S3ConnectorConfig,
    creds: &AwsCredentials,
    key: &str,
    target: &Path,
) -> Result<()> {
    let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
    let canonical_uri = format!("/{}", encoded_key);

    let resp = signed_get(client, s3_config, creds, &canonical_uri, &[], Utc::now())
        .send()
        .await?;
    match resp.status().as_u16() {
        200..=299 => {}
        404 => bail!("object does not exist"),
        403 => bail!("forbidden"),
        status => bail!("GetObject failed (HTTP {})", status),
    }

    let bytes = resp.bytes().await?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, &bytes)
        .await
        .with_context(|| format!("cannot write {}", target.display()))?;
    Ok(())
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ XML Parsing (minimal, no extra deps) ============

struct ListPage {
    objects: Vec<S3Object>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` body. Folder placeholder keys (ending in `/`)
/// are dropped.
fn parse_list_objects_response(xml: &str) -> ListPage {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    for block in xml.split("<Contents>").skip(1) {
        let Some(end) = block.find("</Contents>") else {
            break;
        };
        let block = &block[..end];

        let key = extract_xml_value(block, "Key")
            .map(|k| xml_unescape(&k))
            .unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();
        let etag = extract_xml_value(block, "ETag")
            .map(|e| xml_unescape(&e))
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        objects.push(S3Object {
            key,
            last_modified,
            etag,
            size,
        });
    }

    ListPage {
        objects,
        is_truncated,
        next_token,
    }
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
