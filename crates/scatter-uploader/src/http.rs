//! Generic HTTP hosting backend.
//!
//! Uploads the raw blob with a single `POST` or `PUT` to a configured URL and
//! takes the locator from the response, either the whole trimmed body or a
//! string found at a JSON pointer. Reads are a plain `GET` of the locator
//! carrying the configured `Referer`.

use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, REFERER};
use scatter_types::DEFAULT_CHUNK_SIZE;
use tracing::debug;

use crate::error::UploaderError;
use crate::traits::Uploader;

/// Request method used for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            other => Err(format!("unsupported upload method: {other}")),
        }
    }
}

/// Settings for an [`HttpUploader`].
#[derive(Debug, Clone)]
pub struct HttpUploaderConfig {
    pub upload_url: String,
    pub method: HttpMethod,
    /// JSON pointer (RFC 6901) to the locator in the upload response.
    /// Empty means the whole body is the locator.
    pub locator_pointer: String,
    pub referer: String,
    pub chunk_size: u32,
    /// Blobs above this size are rejected without contacting the host.
    pub max_blob_size: Option<usize>,
    pub timeout: Duration,
}

impl Default for HttpUploaderConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            method: HttpMethod::Post,
            locator_pointer: String::new(),
            referer: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_blob_size: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Uploader talking to an HTTP file host.
pub struct HttpUploader {
    http: reqwest::Client,
    config: HttpUploaderConfig,
}

impl HttpUploader {
    /// Build an uploader from its settings.
    pub fn new(config: HttpUploaderConfig) -> Result<Self, UploaderError> {
        if config.upload_url.is_empty() {
            return Err(UploaderError::Rejected("no upload url configured".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UploaderError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Current settings.
    pub fn config(&self) -> &HttpUploaderConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    fn name(&self) -> &str {
        "http"
    }

    fn referer(&self) -> &str {
        &self.config.referer
    }

    fn chunk_size(&self) -> u32 {
        self.config.chunk_size
    }

    async fn store(&self, data: Bytes) -> Result<String, UploaderError> {
        if let Some(limit) = self.config.max_blob_size
            && data.len() > limit
        {
            return Err(UploaderError::Rejected(format!(
                "blob of {} bytes exceeds the {limit}-byte limit",
                data.len()
            )));
        }

        let size = data.len();
        let request = match self.config.method {
            HttpMethod::Post => self.http.post(&self.config.upload_url),
            HttpMethod::Put => self.http.put(&self.config.upload_url),
        };
        let resp = request
            .header(CONTENT_TYPE, "image/gif")
            .body(data)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body = resp.text().await.map_err(classify)?;
        let locator = extract_locator(&body, &self.config.locator_pointer)?;
        debug!(%locator, size, "stored blob over http");
        Ok(locator)
    }

    async fn read(&self, locator: &str) -> Result<Bytes, UploaderError> {
        let mut request = self.http.get(locator);
        if !self.config.referer.is_empty() {
            request = request.header(REFERER, &self.config.referer);
        }
        let resp = request.send().await.map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        resp.bytes().await.map_err(classify)
    }
}

/// Map a transport failure onto the retry taxonomy.
fn classify(e: reqwest::Error) -> UploaderError {
    if e.is_timeout() || e.is_connect() {
        UploaderError::Transient(e.to_string())
    } else if e.is_builder() {
        UploaderError::Rejected(e.to_string())
    } else {
        UploaderError::Http(e.to_string())
    }
}

/// Map a non-success status onto the retry taxonomy.
fn status_error(status: StatusCode, body: String) -> UploaderError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => UploaderError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            UploaderError::Transient(message)
        }
        s if s.is_server_error() => UploaderError::Transient(message),
        s if s.is_client_error() => UploaderError::Rejected(message),
        _ => UploaderError::Http(message),
    }
}

fn extract_locator(body: &str, pointer: &str) -> Result<String, UploaderError> {
    let locator = if pointer.is_empty() {
        body.trim().to_string()
    } else {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| UploaderError::Http(format!("upload response is not JSON: {e}")))?;
        match value.pointer(pointer) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(UploaderError::Http(format!(
                    "no locator at {pointer} in upload response"
                )));
            }
        }
    };

    if locator.is_empty() {
        return Err(UploaderError::Http("empty locator in upload response".into()));
    }
    Ok(locator)
}
