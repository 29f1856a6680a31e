//! Signed-URL blob transport.
//!
//! Layer bytes move over plain HTTP against single-use signed URLs issued by
//! the service: uploads are `PUT` with an exact `Content-Length`, downloads
//! are ranged `GET`s. Trait-based so the pipelines can be tested without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, trace};

use crate::content::{blob_stream, BlobReader};

/// Default timeout for blob transfers (5 minutes).
const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

/// Blob transfer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("unexpected status code {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
}

/// Raw blob I/O against signed URLs.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Upload a blob with `PUT`.
    ///
    /// The body is streamed from the reader with `Content-Length` set to its
    /// size. Only `200 OK` counts as success; any other status is a
    /// permanent failure for this upload.
    async fn put_blob(&self, url: &str, reader: Box<dyn BlobReader>)
        -> Result<(), TransportError>;

    /// Fetch `length` bytes of a blob starting at `offset`.
    async fn get_blob_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError>;
}

/// HTTP implementation of [`BlobTransport`] over a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS))
            .build()
            .expect("failed to create HTTP client");
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobTransport for ReqwestTransport {
    async fn put_blob(
        &self,
        url: &str,
        reader: Box<dyn BlobReader>,
    ) -> Result<(), TransportError> {
        let size = reader.size();
        debug!(url = url, size = size, "uploading layer blob");

        let body = reqwest::Body::wrap_stream(blob_stream(reader));
        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|err| TransportError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(TransportError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    async fn get_blob_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError> {
        trace!(url = url, offset = offset, length = length, "ranged blob read");
        let end = offset + length.max(1) - 1;
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(|err| TransportError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response
            .bytes()
            .await
            .map_err(|err| TransportError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}
