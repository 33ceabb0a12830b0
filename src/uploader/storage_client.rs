use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::{multipart, Body, Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::FileArtifact;
use crate::security::InputValidator;

/// Receives the cumulative number of bytes sent for one upload.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait StorageUploader: Send + Sync {
    async fn upload(
        &self,
        file: FileArtifact,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> AppResult<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Multipart client for the storage endpoint
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: Client,
    endpoint: Url,
    chunk_size: usize,
}

impl StorageClient {
    pub fn new(endpoint: &str, timeout: Duration) -> AppResult<Self> {
        InputValidator::validate_endpoint_url(endpoint)?;

        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| AppError::validation("upload_endpoint", &e.to_string()))?;

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            &config.upload_endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_chunk_size(config.chunk_size_bytes))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one file as the `file` part of a multipart POST and return the
    /// remote URL from the `{ "url": ... }` response.
    pub async fn upload_file(
        &self,
        file: FileArtifact,
        on_progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> AppResult<String> {
        let cancel = cancel.unwrap_or_default();

        if cancel.is_cancelled() {
            log::info!("Upload of {} canceled before transfer started", file.name);
            return Err(AppError::canceled("transfer"));
        }

        let file_name = file.name.clone();
        let transfer = self.send(file, on_progress);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("Upload of {} canceled mid-transfer", file_name);
                Err(AppError::canceled("transfer"))
            }
            result = transfer => result,
        }
    }

    async fn send(&self, file: FileArtifact, on_progress: Option<ProgressCallback>) -> AppResult<String> {
        let total = file.size();
        let form = self.build_form(&file, on_progress)?;

        log::debug!("POST {} ({} bytes from {})", self.endpoint, total, file.name);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::transfer(format!(
                "Storage endpoint responded {}: {}",
                status,
                error_text.chars().take(300).collect::<String>()
            )));
        }

        let body: UploadResponse = response.json().await?;
        log::debug!("Stored {} at {}", file.name, body.url);
        Ok(body.url)
    }

    fn build_form(&self, file: &FileArtifact, on_progress: Option<ProgressCallback>) -> AppResult<multipart::Form> {
        let total = file.size();
        let chunks = split_into_chunks(&file.bytes, self.chunk_size);

        if let Some(callback) = &on_progress {
            callback(0);
        }

        let body_stream = stream::iter(chunks).map(move |(chunk, sent)| {
            if let Some(callback) = &on_progress {
                callback(sent);
            }
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = multipart::Part::stream_with_length(Body::wrap_stream(body_stream), total)
            .file_name(InputValidator::sanitize_filename(&file.name))
            .mime_str(&file.mime_type)?;

        Ok(multipart::Form::new().part("file", part))
    }
}

#[async_trait]
impl StorageUploader for StorageClient {
    async fn upload(
        &self,
        file: FileArtifact,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> AppResult<String> {
        self.upload_file(file, Some(on_progress), Some(cancel)).await
    }
}

/// Zero-copy chunks paired with the cumulative byte count after each one.
fn split_into_chunks(bytes: &Bytes, chunk_size: usize) -> Vec<(Bytes, u64)> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut offset = 0;

    while offset < bytes.len() {
        let end = std::cmp::min(offset + chunk_size, bytes.len());
        chunks.push((bytes.slice(offset..end), end as u64));
        offset = end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |bytes| sink.lock().unwrap().push(bytes));
        (callback, seen)
    }

    fn client_for(server: &MockServer) -> StorageClient {
        StorageClient::new(&format!("{}/uploads", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_chunk_size(1024)
    }

    #[test]
    fn test_split_into_chunks() {
        let bytes = Bytes::from(vec![7u8; 2500]);
        let chunks = split_into_chunks(&bytes, 1000);
        let sizes: Vec<usize> = chunks.iter().map(|(c, _)| c.len()).collect();
        let offsets: Vec<u64> = chunks.iter().map(|(_, s)| *s).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(offsets, vec![1000, 2000, 2500]);
        assert!(split_into_chunks(&Bytes::new(), 1000).is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        assert!(StorageClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_upload_returns_remote_url_and_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "url": "http://cdn.local/a.webp" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (callback, seen) = recorder();
        let file = FileArtifact::new("a.webp", "image/webp", vec![1u8; 3000]);

        let url = client_for(&server)
            .upload_file(file, Some(callback), None)
            .await
            .unwrap();

        assert_eq!(url, "http://cdn.local/a.webp");
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![0, 1024, 2048, 3000]);
    }

    #[tokio::test]
    async fn test_upload_sends_file_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "url": "u" })))
            .mount(&server)
            .await;

        let file = FileArtifact::new("photo.webp", "image/webp", b"webp-bytes".to_vec());
        client_for(&server).upload_file(file, None, None).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"photo.webp\""));
        assert!(body.contains("webp-bytes"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transfer_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let file = FileArtifact::new("a.webp", "image/webp", vec![1u8; 10]);
        let error = client_for(&server)
            .upload_file(file, None, None)
            .await
            .unwrap_err();

        assert!(error.is_transfer_error());
        assert!(error.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_malformed_response_is_transfer_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let file = FileArtifact::new("a.webp", "image/webp", vec![1u8; 10]);
        let error = client_for(&server)
            .upload_file(file, None, None)
            .await
            .unwrap_err();

        assert!(error.is_transfer_error());
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_sends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "url": "u" })))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();

        let file = FileArtifact::new("a.webp", "image/webp", vec![1u8; 10]);
        let error = client_for(&server)
            .upload_file(file, None, Some(token))
            .await
            .unwrap_err();

        assert!(error.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "url": "u" }))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let file = FileArtifact::new("a.webp", "image/webp", vec![1u8; 10]);
        let error = client_for(&server)
            .upload_file(file, None, Some(token))
            .await
            .unwrap_err();

        assert!(error.is_canceled());
    }
}
