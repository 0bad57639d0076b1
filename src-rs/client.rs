//! Transport to the inference server. One attempt per call, bounded by the configured timeout.

use crate::codec::{decode_mask_response, MultipartBody};
use crate::config::SegmenterConfig;
use crate::crop::MaskImage;
use crate::error::{ConfigError, MaskFetchError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

/// Anything that can turn an encoded mask request into a mask.
#[async_trait]
pub trait MaskService: Send + Sync {
    async fn fetch_mask(&self, request: MultipartBody) -> Result<MaskImage, MaskFetchError>;
}

/// reqwest-backed client for the `/server/image-upload/` endpoint.
#[derive(Debug, Clone)]
pub struct HttpMaskClient {
    client: Client,
    upload_url: Url,
    ping_url: Url,
    timeout: Duration,
}

impl HttpMaskClient {
    pub fn new(config: &SegmenterConfig) -> Result<Self, MaskFetchError> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MaskFetchError::Transport(format!("failed to create HTTP client: {e}")))?;
        let endpoint_error = |e: ConfigError| MaskFetchError::Transport(e.to_string());
        Ok(Self {
            client,
            upload_url: config.upload_url().map_err(endpoint_error)?,
            ping_url: config.ping_url().map_err(endpoint_error)?,
            timeout,
        })
    }

    pub fn upload_url(&self) -> &str {
        self.upload_url.as_str()
    }

    pub fn ping_url(&self) -> &str {
        self.ping_url.as_str()
    }

    /// Liveness check against the diagnostic endpoint; returns its JSON body.
    pub async fn ping(&self) -> Result<Value, MaskFetchError> {
        let response = self
            .client
            .get(self.ping_url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MaskFetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        serde_json::from_slice(&body)
            .map_err(|e| MaskFetchError::MalformedResponse(format!("ping body is not JSON: {e}")))
    }

    fn classify(&self, err: reqwest::Error) -> MaskFetchError {
        if err.is_timeout() {
            MaskFetchError::Timeout(self.timeout)
        } else {
            MaskFetchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl MaskService for HttpMaskClient {
    async fn fetch_mask(&self, request: MultipartBody) -> Result<MaskImage, MaskFetchError> {
        tracing::debug!(url = %self.upload_url, bytes = request.len(), "uploading mask request");
        let content_type = request.content_type();
        let response = self
            .client
            .post(self.upload_url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(request.into_bytes())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "mask request rejected by server");
            return Err(MaskFetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let mask = decode_mask_response(&body)?;
        let (w, h) = mask.dimensions();
        tracing::debug!(width = w, height = h, "received mask");
        Ok(mask)
    }
}
