//! Typed RPC client for the remote cache service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::service::types::{
    CacheConfig, GetConfigRequest, GetLayerDownloadURLRequest, GetLayerUploadURLRequest,
    LayerURLResponse, RuntimeConfig, UpdateCacheLayersRequest, UpdateCacheRecordsRequest,
    UpdateCacheRecordsResponse,
};

/// Default timeout for service RPCs (30 seconds).
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Service client errors.
///
/// [`ServiceError::is_retryable`] separates transient network failures from
/// permanent application errors; callers decide whether to retry.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid service URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("unexpected status code {status} from {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl ServiceError {
    /// Whether the call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Request { .. } => true,
            ServiceError::Status { status, .. } => *status >= 500,
            ServiceError::InvalidUrl { .. } | ServiceError::Decode { .. } => false,
        }
    }
}

/// The RPC surface of the remote cache service.
///
/// Every call is idempotent from the client's perspective; retries are safe.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Fetch the synchronization schedule for this engine.
    async fn get_config(&self, req: GetConfigRequest) -> Result<RuntimeConfig, ServiceError>;

    /// Fetch the remote index.
    async fn import_cache(&self) -> Result<CacheConfig, ServiceError>;

    /// Announce local keys and links; the response names the records the
    /// service wants uploaded. The set is chosen by the server and need not
    /// resemble the input.
    async fn update_cache_records(
        &self,
        req: UpdateCacheRecordsRequest,
    ) -> Result<UpdateCacheRecordsResponse, ServiceError>;

    /// Report the layers pushed for each record.
    async fn update_cache_layers(&self, req: UpdateCacheLayersRequest)
        -> Result<(), ServiceError>;

    /// Resolve a single-use signed upload URL for a layer blob.
    async fn get_layer_upload_url(
        &self,
        req: GetLayerUploadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError>;

    /// Resolve a single-use signed download URL for a layer blob.
    async fn get_layer_download_url(
        &self,
        req: GetLayerDownloadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError>;
}

/// HTTP implementation of [`CacheService`].
///
/// RPCs are JSON POSTs under `/v1/` on the configured base URL.
#[derive(Clone)]
pub struct HttpCacheService {
    base: Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCacheService")
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl HttpCacheService {
    /// Create a client for the service at `service_url`.
    pub fn new(service_url: &str) -> Result<Self, ServiceError> {
        let base = Url::parse(service_url).map_err(|err| ServiceError::InvalidUrl {
            url: service_url.to_string(),
            reason: err.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS))
            .build()
            .expect("failed to create HTTP client");
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base.join(path).map_err(|err| ServiceError::InvalidUrl {
            url: format!("{}{}", self.base, path),
            reason: err.to_string(),
        })
    }

    async fn call<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, ServiceError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.send(url.clone(), req).await?;
        response.json().await.map_err(|err| ServiceError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    /// Like [`Self::call`] but ignores the response body.
    async fn notify<Req>(&self, path: &str, req: &Req) -> Result<(), ServiceError>
    where
        Req: Serialize + Sync,
    {
        let url = self.endpoint(path)?;
        self.send(url, req).await.map(|_| ())
    }

    async fn send<Req>(&self, url: Url, req: &Req) -> Result<reqwest::Response, ServiceError>
    where
        Req: Serialize + Sync,
    {
        debug!(url = %url, "cache service RPC");
        let response = self
            .client
            .post(url.clone())
            .json(req)
            .send()
            .await
            .map_err(|err| ServiceError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct Empty {}

#[async_trait]
impl CacheService for HttpCacheService {
    async fn get_config(&self, req: GetConfigRequest) -> Result<RuntimeConfig, ServiceError> {
        self.call("v1/config", &req).await
    }

    async fn import_cache(&self) -> Result<CacheConfig, ServiceError> {
        self.call("v1/import", &Empty {}).await
    }

    async fn update_cache_records(
        &self,
        req: UpdateCacheRecordsRequest,
    ) -> Result<UpdateCacheRecordsResponse, ServiceError> {
        self.call("v1/records", &req).await
    }

    async fn update_cache_layers(
        &self,
        req: UpdateCacheLayersRequest,
    ) -> Result<(), ServiceError> {
        self.notify("v1/layers", &req).await
    }

    async fn get_layer_upload_url(
        &self,
        req: GetLayerUploadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError> {
        self.call("v1/upload-url", &req).await
    }

    async fn get_layer_download_url(
        &self,
        req: GetLayerDownloadURLRequest,
    ) -> Result<LayerURLResponse, ServiceError> {
        self.call("v1/download-url", &req).await
    }
}
