//! Content-addressed blob model shared by the import and export pipelines.
//!
//! Layers travel between engines as content-addressed blobs described by
//! [`Descriptor`]s. The descriptor carries the annotations the importing side
//! needs to reconstruct a layer chain without fetching any bytes; the bytes
//! themselves are fetched lazily through a [`ContentProvider`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Annotation key carrying the uncompressed diff-id of a layer blob.
///
/// Mandatory on every imported descriptor; a layer without it cannot be
/// unpacked and is rejected at import time.
pub const ANNOTATION_UNCOMPRESSED: &str = "containerd.io/uncompressed";

/// Annotation key carrying the creation time of a layer, RFC 3339 text.
pub const ANNOTATION_CREATED_AT: &str = "buildkit/createdat";

/// Chunk size used when streaming a blob through a [`BlobReader`].
pub const BLOB_CHUNK_SIZE: usize = 1 << 20;

/// A content digest in `algorithm:hex` form, e.g. `sha256:deadbeef...`.
///
/// The digest is treated as an opaque identifier; no verification happens at
/// this layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wrap a digest string.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// The digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the digest is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Digest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

/// Compression applied to layer blobs when asking the worker for remotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Gzip,
    Uncompressed,
}

/// A media-typed, digested, sized handle to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// Content access errors.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("blob {digest} not found")]
    NotFound { digest: Digest },

    #[error("failed to resolve download URL for {digest}: {reason}")]
    DownloadUrl { digest: Digest, reason: String },

    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),

    #[error("unexpected end of blob at offset {offset}")]
    UnexpectedEof { offset: u64 },
}

/// A sized, random-access reader over a single blob.
///
/// The uploader wants a stream with a known length for `Content-Length`, and
/// the import pipeline wants lazy random access into remote blobs; both are
/// served by this one trait.
#[async_trait]
pub trait BlobReader: Send + Sync {
    /// Total size of the blob in bytes.
    fn size(&self) -> u64;

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Returns an empty buffer when `offset` is at or past the end.
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ContentError>;
}

/// Provides random access to blob content by descriptor.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Open a sized reader over the blob the descriptor points at.
    async fn reader_at(&self, desc: &Descriptor) -> Result<Box<dyn BlobReader>, ContentError>;
}

/// Turn a [`BlobReader`] into a sequential chunk stream.
///
/// The stream yields exactly `reader.size()` bytes; a short read before that
/// point surfaces as [`ContentError::UnexpectedEof`].
pub fn blob_stream(
    reader: Box<dyn BlobReader>,
) -> impl Stream<Item = Result<Bytes, ContentError>> + Send {
    futures::stream::try_unfold((reader, 0u64), |(reader, offset)| async move {
        let size = reader.size();
        if offset >= size {
            return Ok(None);
        }
        let want = std::cmp::min(BLOB_CHUNK_SIZE as u64, size - offset) as usize;
        let chunk = reader.read_at(offset, want).await?;
        if chunk.is_empty() {
            return Err(ContentError::UnexpectedEof { offset });
        }
        let next = offset + chunk.len() as u64;
        Ok(Some((chunk, (reader, next))))
    })
}
