use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Upper bound on the buffer reserved from an untrusted `Content-Length`.
const MAX_PREALLOCATED_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageStatus {
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoredObject {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "lastModified", alias = "last_modified")]
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl DownloadedImage {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// Destination bucket for ingested assets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, content_type: &str, bytes: &[u8]) -> AppResult<()>;
}

/// Source of candidate image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str) -> AppResult<DownloadedImage>;
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    key: &'a str,
    content_base64: String,
    content_type: &'a str,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    ok: bool,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<StoredObject>,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: Option<String>,
}

/// Client for the storage backend's `/api` surface.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> AppResult<bool> {
        let response = self
            .http
            .get(self.endpoint("/api/health"))
            .send()
            .await?
            .error_for_status()?;
        let health: HealthResponse = response.json().await?;
        Ok(health.ok)
    }

    /// Polls `/api/health` until it reports ok or `timeout` elapses.
    pub async fn wait_for_health(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while started.elapsed() < timeout {
            match self.health().await {
                Ok(true) => return true,
                Ok(false) => debug!("backend reachable but not healthy yet"),
                Err(err) => debug!(error = %err, "backend health probe failed"),
            }
            sleep(HEALTH_POLL_INTERVAL).await;
        }
        false
    }

    pub async fn storage_status(&self) -> AppResult<StorageStatus> {
        let response = self
            .http
            .get(self.endpoint("/api/r2/status"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn list_objects(&self, prefix: &str, limit: usize) -> AppResult<Vec<StoredObject>> {
        let limit = limit.to_string();
        let response = self
            .http
            .get(self.endpoint("/api/r2/list"))
            .query(&[("prefix", prefix), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let listing: ListResponse = response.json().await?;
        Ok(listing.objects)
    }

    pub async fn public_url(&self, key: &str) -> AppResult<Option<String>> {
        let response = self
            .http
            .get(self.endpoint("/api/r2/public-url"))
            .query(&[("key", key)])
            .send()
            .await?
            .error_for_status()?;
        let body: UrlResponse = response.json().await?;
        Ok(body.url.filter(|url| !url.is_empty()))
    }

    pub async fn signed_url(&self, key: &str, expires_secs: u64) -> AppResult<Option<String>> {
        let expires = expires_secs.to_string();
        let response = self
            .http
            .get(self.endpoint("/api/r2/signed-url"))
            .query(&[("key", key), ("expires", expires.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let body: UrlResponse = response.json().await?;
        Ok(body.url.filter(|url| !url.is_empty()))
    }
}

#[async_trait]
impl ObjectStore for BackendClient {
    async fn upload(&self, key: &str, content_type: &str, bytes: &[u8]) -> AppResult<()> {
        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        let body = UploadRequest {
            key,
            content_base64: STANDARD.encode(bytes),
            content_type,
        };
        self.http
            .post(self.endpoint("/api/r2/upload-base64"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        debug!(key, bytes = bytes.len(), "object uploaded");
        Ok(())
    }
}

/// Downloads candidate images over plain HTTP.
#[derive(Clone)]
pub struct HttpImageSource {
    http: Client,
}

impl HttpImageSource {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str) -> AppResult<DownloadedImage> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let mut bytes = Vec::with_capacity(capacity_hint(response.content_length()));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        Ok(DownloadedImage {
            content_type,
            bytes,
        })
    }
}

fn capacity_hint(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOCATED_BYTES) as usize
}

/// Backend server launched for the duration of a run; killed when dropped.
pub struct BackendProcess {
    child: Child,
}

impl BackendProcess {
    pub fn spawn(command_line: &str, workdir: &Path) -> AppResult<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AppError::Config("backend command is empty".into()))?;
        let child = Command::new(program)
            .args(parts)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!(command = command_line, pid = ?child.id(), "backend process started");
        Ok(Self { child })
    }

    pub async fn shutdown(mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "failed to stop backend process");
        }
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::{all_of, contains, eq, json_decoded, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;

    fn client(server: &Server) -> BackendClient {
        BackendClient::new(Client::new(), server.url("/").to_string())
    }

    #[test]
    fn capacity_hint_is_capped() {
        assert_eq!(capacity_hint(None), 0);
        assert_eq!(capacity_hint(Some(2048)), 2048);
        assert_eq!(capacity_hint(Some(u64::MAX)), MAX_PREALLOCATED_BYTES as usize);
    }

    #[tokio::test]
    async fn uploads_base64_payload() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/r2/upload-base64"),
                request::body(json_decoded(eq(json!({
                    "key": "images/placeholders/KR/kr-1.jpg",
                    "content_base64": "AQID",
                    "content_type": "image/jpeg"
                })))),
            ])
            .respond_with(status_code(201).body("{}")),
        );

        client(&server)
            .upload("images/placeholders/KR/kr-1.jpg", "image/jpeg", &[1, 2, 3])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upload_failure_is_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/api/r2/upload-base64"))
                .respond_with(status_code(503)),
        );
        let err = client(&server)
            .upload("k.jpg", "", &[0])
            .await
            .unwrap_err();
        assert_eq!(err.diagnostic_label(), "HTTP503");
    }

    #[tokio::test]
    async fn reads_status_and_lookups() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/health"))
                .respond_with(json_encoded(json!({ "ok": true }))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/r2/status")).respond_with(
                json_encoded(json!({ "configured": true, "bucket": "places" })),
            ),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/r2/list"),
                request::query(url_decoded(contains(("prefix", "images/placeholders/")))),
                request::query(url_decoded(contains(("limit", "20")))),
            ])
            .respond_with(json_encoded(json!({
                "objects": [{ "key": "images/placeholders/KR/kr-1.jpg", "size": 1024 }]
            }))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/r2/signed-url"))
                .respond_with(json_encoded(json!({ "key": "k", "url": "https://signed/k" }))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/r2/public-url"))
                .respond_with(json_encoded(json!({ "key": "k", "url": "" }))),
        );

        let backend = client(&server);
        assert!(backend.wait_for_health(Duration::from_secs(2)).await);
        let status = backend.storage_status().await.unwrap();
        assert!(status.configured);
        assert_eq!(status.bucket, "places");
        let objects = backend
            .list_objects("images/placeholders/", 20)
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size, Some(1024));
        assert_eq!(
            backend.signed_url("k", 600).await.unwrap().as_deref(),
            Some("https://signed/k")
        );
        assert_eq!(backend.public_url("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn health_wait_gives_up_on_unreachable_backend() {
        let backend = BackendClient::new(Client::new(), "http://127.0.0.1:9");
        assert!(!backend.wait_for_health(Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn downloads_body_with_content_type() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/photo.jpg")).respond_with(
                status_code(200)
                    .append_header("content-type", "image/jpeg")
                    .body(vec![0xFF_u8, 0xD8, 0xFF]),
            ),
        );
        let image = HttpImageSource::new(Client::new())
            .download(&server.url("/photo.jpg").to_string())
            .await
            .unwrap();
        assert!(image.is_image());
        assert_eq!(image.bytes, vec![0xFF, 0xD8, 0xFF]);
    }
}
