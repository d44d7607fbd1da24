//! Reference HTTP transport.
//!
//! Talks to an asset-registration REST backend in two steps:
//!
//! 1. `POST /assets` — register the asset's metadata, receiving the
//!    backend-assigned asset id.
//! 2. `PUT /assets/{id}/content` — stream the file's bytes, reporting
//!    progress as chunks leave the client.
//!
//! Files are streamed from disk without loading them into memory.
//!
//! # Security
//!
//! - File contents are never logged
//! - Auth tokens are never logged
//! - Only HTTP method, path, and status codes are logged

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::error::UploadError;
use crate::model::{AssetMetadata, FileData, SourceFile, UploadReceipt};
use crate::transport::{ProgressSink, UploadTransport};

/// Chunk size for in-memory sources.
const MEMORY_CHUNK_BYTES: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for registering an asset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAssetRequest<'a> {
    file_name: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(flatten)]
    metadata: &'a AssetMetadata,
}

/// Response from asset registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAssetResponse {
    id: String,
    #[serde(default)]
    location: Option<String>,
}

/// Optional body returned by the content endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentResponse {
    #[serde(default)]
    location: Option<String>,
}

/// Backend error response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Reqwest-backed [`UploadTransport`].
#[derive(Clone)]
pub struct HttpTransport {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Base URL of the asset service.
    base_url: Url,
    /// Bearer token, if the backend requires one.
    auth_token: Option<String>,
}

impl HttpTransport {
    /// Creates a transport against the given asset service.
    pub fn new(client: Arc<Client>, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            auth_token: None,
        }
    }

    /// Attaches a bearer token to every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Runs the two-step transfer. Cancellation is handled by the caller
    /// (`upload` wraps this in a select on the token).
    async fn transfer(
        &self,
        file: &SourceFile,
        metadata: &AssetMetadata,
        progress: ProgressSink,
    ) -> Result<UploadReceipt, UploadError> {
        let (asset_id, registered_location) = self.register_asset(file, metadata).await?;
        let content_location = self.push_content(&asset_id, file, progress).await?;

        Ok(UploadReceipt {
            asset_id,
            location: content_location.or(registered_location),
        })
    }

    /// Registers the asset's metadata and returns the assigned id.
    ///
    /// # Errors
    ///
    /// - `UploadError::Rejected` - backend refused the registration
    /// - `UploadError::RateLimited` - rate limit exceeded
    /// - `UploadError::ConnectionFailed` - network error
    async fn register_asset(
        &self,
        file: &SourceFile,
        metadata: &AssetMetadata,
    ) -> Result<(String, Option<String>), UploadError> {
        let url = self.build_assets_url()?;

        let body = RegisterAssetRequest {
            file_name: &file.name,
            size: file.size,
            content_type: file.content_type.as_deref(),
            metadata,
        };

        info!("[HTTP-TRANSPORT] POST /assets (registering {})", file.name);

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::ConnectionFailed(format!("asset registration failed: {}", e)))?;

        let status = response.status();
        info!("[HTTP-TRANSPORT] POST /assets -> {}", status.as_u16());

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        let registered: RegisterAssetResponse = response.json().await.map_err(|e| {
            UploadError::Rejected(format!("failed to parse registration response: {}", e))
        })?;

        Ok((registered.id, registered.location))
    }

    /// Streams the file's bytes to the content endpoint.
    ///
    /// # Errors
    ///
    /// - `UploadError::SourceUnreadable` - file could not be opened
    /// - `UploadError::Rejected` - backend refused the content
    /// - `UploadError::ConnectionFailed` - network error
    async fn push_content(
        &self,
        asset_id: &str,
        file: &SourceFile,
        progress: ProgressSink,
    ) -> Result<Option<String>, UploadError> {
        let url = self.build_content_url(asset_id)?;
        let body = build_body(file, progress).await?;

        info!(
            "[HTTP-TRANSPORT] PUT /assets/{}/content ({} bytes)",
            redact_id(asset_id),
            file.size
        );

        let response = self
            .authorize(self.client.put(url))
            .header(
                CONTENT_TYPE,
                file.content_type.as_deref().unwrap_or("application/octet-stream"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::ConnectionFailed(format!("content upload failed: {}", e)))?;

        let status = response.status();
        info!(
            "[HTTP-TRANSPORT] PUT /assets/{}/content -> {}",
            redact_id(asset_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(self.parse_error_response(response, status).await);
        }

        Ok(response.json::<ContentResponse>().await.ok().and_then(|r| r.location))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Builds the registration URL: /assets
    fn build_assets_url(&self) -> Result<Url, UploadError> {
        self.base_url
            .join("/assets")
            .map_err(|e| UploadError::Internal(format!("failed to build assets URL: {}", e)))
    }

    /// Builds the content URL: /assets/{asset_id}/content
    fn build_content_url(&self, asset_id: &str) -> Result<Url, UploadError> {
        let path = format!("/assets/{}/content", asset_id);
        self.base_url
            .join(&path)
            .map_err(|e| UploadError::Internal(format!("failed to build content URL: {}", e)))
    }

    /// Parses an error response and maps it to the matching error variant.
    async fn parse_error_response(
        &self,
        response: reqwest::Response,
        status: StatusCode,
    ) -> UploadError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return UploadError::RateLimited {
                retry_after_secs: retry_after,
            };
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("unable to read error body"));

        if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
            return UploadError::Rejected(match err.code {
                Some(code) => format!("[{}] {}", code, err.message),
                None => err.message,
            });
        }

        UploadError::Rejected(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown error")
        ))
    }
}

impl UploadTransport for HttpTransport {
    fn upload<'a>(
        &'a self,
        file: &'a SourceFile,
        metadata: &'a AssetMetadata,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<UploadReceipt, UploadError>> + Send + 'a>>
    {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = self.transfer(file, metadata, progress) => result,
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Body Construction
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a streaming request body that reports progress as chunks are
/// handed to the HTTP client.
async fn build_body(file: &SourceFile, progress: ProgressSink) -> Result<reqwest::Body, UploadError> {
    let total = file.size;

    match &file.data {
        FileData::Path(path) => {
            let handle = tokio::fs::File::open(path).await.map_err(|e| {
                UploadError::SourceUnreadable(format!("{}: {}", path.display(), e))
            })?;
            let mut sent: u64 = 0;
            let stream = ReaderStream::new(handle).inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    sent += bytes.len() as u64;
                    progress.report(percent_of(sent, total));
                }
            });
            Ok(reqwest::Body::wrap_stream(stream))
        }
        FileData::Memory(bytes) => {
            let chunks: Vec<Result<Vec<u8>, std::io::Error>> = bytes
                .chunks(MEMORY_CHUNK_BYTES)
                .map(|c| Ok(c.to_vec()))
                .collect();
            let mut sent: u64 = 0;
            let stream = futures_util::stream::iter(chunks).inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    sent += bytes.len() as u64;
                    progress.report(percent_of(sent, total));
                }
            });
            Ok(reqwest::Body::wrap_stream(stream))
        }
    }
}

/// Bytes-sent as a percentage of the total, saturating at 100.
fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (sent.saturating_mul(100) / total).min(100) as u8
}

/// Redacts an asset id for logging (shows first 8 chars).
fn redact_id(id: &str) -> String {
    if id.len() > 8 {
        format!("{}...", &id[..8])
    } else {
        id.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
