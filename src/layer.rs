//! Lazy access to peer layer blobs.
//!
//! Imported descriptors are paired with a [`LayerProvider`]; nothing is
//! fetched until the worker actually needs a layer, at which point the
//! provider resolves a signed download URL and serves ranged reads through
//! the blob transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::content::{BlobReader, ContentError, ContentProvider, Descriptor};
use crate::service::types::GetLayerDownloadURLRequest;
use crate::service::CacheService;
use crate::transport::BlobTransport;

/// Fetches layer blob bytes by digest from the remote service.
pub struct LayerProvider {
    service: Arc<dyn CacheService>,
    transport: Arc<dyn BlobTransport>,
}

impl LayerProvider {
    pub fn new(service: Arc<dyn CacheService>, transport: Arc<dyn BlobTransport>) -> Self {
        Self { service, transport }
    }
}

#[async_trait]
impl ContentProvider for LayerProvider {
    async fn reader_at(&self, desc: &Descriptor) -> Result<Box<dyn BlobReader>, ContentError> {
        let resolved = self
            .service
            .get_layer_download_url(GetLayerDownloadURLRequest {
                digest: desc.digest.clone(),
            })
            .await
            .map_err(|err| ContentError::DownloadUrl {
                digest: desc.digest.clone(),
                reason: err.to_string(),
            })?;

        Ok(Box::new(RemoteBlobReader {
            transport: Arc::clone(&self.transport),
            url: resolved.url,
            size: desc.size,
        }))
    }
}

/// Random-access reader over a signed download URL.
struct RemoteBlobReader {
    transport: Arc<dyn BlobTransport>,
    url: String,
    size: u64,
}

#[async_trait]
impl BlobReader for RemoteBlobReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ContentError> {
        if offset >= self.size {
            return Ok(Bytes::new());
        }
        let length = std::cmp::min(length as u64, self.size - offset);
        Ok(self
            .transport
            .get_blob_range(&self.url, offset, length)
            .await?)
    }
}
