//! HTTP transfer of template files with byte progress and cancellation.
//!
//! # Security
//!
//! - File contents are never logged
//! - Only method, sanitized path, and status codes are logged

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::gateway::PortalGateway;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Multipart field name the backend expects for template files.
const FILE_FIELD: &str = "files";

/// Chunk size for the progress-reporting body stream.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A file staged for upload: the queue owns the bytes exclusively.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub bytes: Bytes,
}

/// Progress callback: `(bytes_sent, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Transfer operations the upload queue depends on.
///
/// Kept as a trait so queue logic can be tested without a network.
pub trait UploadTransport: Send + Sync {
    /// Uploads one file to the entity's file collection.
    ///
    /// Returns the server-assigned file name.
    fn upload<'a>(
        &'a self,
        entity_id: &'a str,
        payload: FilePayload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;

    /// Deletes a previously uploaded file.
    fn delete_file<'a>(
        &'a self,
        entity_id: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Downloads a previously uploaded file.
    fn download_file<'a>(
        &'a self,
        entity_id: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpUploadTransport
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP implementation of [`UploadTransport`].
///
/// The streaming multipart body cannot be cloned for the gateway's
/// refresh-and-retry, so uploads are sent single-shot with the current
/// bearer token; a 401 surfaces as a failed item the operator can restart.
#[derive(Clone)]
pub struct HttpUploadTransport {
    gateway: PortalGateway,
}

impl HttpUploadTransport {
    pub fn new(gateway: PortalGateway) -> Self {
        Self { gateway }
    }

    fn files_path(entity_id: &str) -> String {
        format!("/api/contract-templates/{}/files", entity_id)
    }

    fn file_path(entity_id: &str, file_name: &str) -> String {
        format!("/api/contract-templates/{}/files/{}", entity_id, file_name)
    }

    async fn do_upload(
        &self,
        entity_id: &str,
        payload: FilePayload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<String, AppError> {
        let url = self.gateway.join_url(&Self::files_path(entity_id))?;
        let total = payload.bytes.len() as u64;

        info!(
            "[UPLOAD] POST /api/contract-templates/{}/files ({} bytes)",
            entity_id, total
        );

        let body = progress_body(payload.bytes, total, progress);
        let part = Part::stream_with_length(body, total)
            .file_name(payload.name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| AppError::Internal(format!("Invalid upload part: {}", e)))?;
        let form = Form::new().part(FILE_FIELD, part);

        let token = self.gateway.bearer_token().await;
        let request = self
            .gateway
            .http_client()
            .post(url)
            .bearer_auth(token)
            .multipart(form);

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[UPLOAD] Transfer cancelled");
                return Err(AppError::Cancelled);
            }
            result = request.send() => result.map_err(|_| {
                AppError::Connectivity("File upload failed".to_string())
            })?,
        };

        let status = response.status();
        info!(
            "[UPLOAD] POST /api/contract-templates/{}/files -> {}",
            entity_id,
            status.as_u16()
        );

        let response = PortalGateway::ensure_success(response).await?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|_| AppError::Internal("Invalid upload response".to_string()))?;

        // Server-assigned name; the original name stands in when absent
        let server_name = value
            .get("template")
            .and_then(|t| t.get("fileNames"))
            .and_then(|names| names.get(0))
            .and_then(|n| n.as_str())
            .map(str::to_string)
            .unwrap_or(payload.name);

        Ok(server_name)
    }

    async fn do_delete(&self, entity_id: &str, file_name: &str) -> Result<(), AppError> {
        info!("[UPLOAD] Deleting template file");
        self.gateway
            .delete(&Self::file_path(entity_id, file_name))
            .await
    }

    async fn do_download(&self, entity_id: &str, file_name: &str) -> Result<Bytes, AppError> {
        let response = self
            .gateway
            .request(
                reqwest::Method::GET,
                &Self::file_path(entity_id, file_name),
                None,
            )
            .await?;
        let response = PortalGateway::ensure_success(response).await?;
        response
            .bytes()
            .await
            .map_err(|_| AppError::Connectivity("File download failed".to_string()))
    }
}

impl UploadTransport for HttpUploadTransport {
    fn upload<'a>(
        &'a self,
        entity_id: &'a str,
        payload: FilePayload,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(self.do_upload(entity_id, payload, progress, cancel))
    }

    fn delete_file<'a>(
        &'a self,
        entity_id: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.do_delete(entity_id, file_name))
    }

    fn download_file<'a>(
        &'a self,
        entity_id: &'a str,
        file_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, AppError>> + Send + 'a>> {
        Box::pin(self.do_download(entity_id, file_name))
    }
}

/// Builds a request body that reports cumulative bytes as chunks are
/// handed to the HTTP stack.
fn progress_body(bytes: Bytes, total: u64, progress: ProgressFn) -> reqwest::Body {
    let sent = Arc::new(AtomicU64::new(0));

    let chunks: Vec<Bytes> = if bytes.is_empty() {
        Vec::new()
    } else {
        (0..bytes.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + UPLOAD_CHUNK_SIZE).min(bytes.len());
                bytes.slice(start..end)
            })
            .collect()
    };

    let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
        let so_far = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        progress(so_far, total);
        Ok::<Bytes, std::io::Error>(chunk)
    }));

    reqwest::Body::wrap_stream(stream)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
