//! Core traits for reqflow components
//!
//! This module defines the capabilities the orchestration layer consumes
//! (transport, blob store, fingerprint) and the callback interfaces it
//! exposes (delegates and response hooks).

use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use super::error::TransportError;
use crate::{
    cache::CacheMetadata,
    orchestration::{BatchRequest, ChainRequest},
    request::{Request, RequestDescriptor},
};

/// What a transport hands back for a request that reached the server
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Moves one request over the wire.
///
/// Implementations only deal with bytes. Timeouts are enforced around the
/// returned future and cancellation drops it, so an implementation must not
/// rely on running to completion.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor)
        -> Result<TransportResponse, TransportError>;
}

/// Backing store for cached response bodies and their metadata.
///
/// `Ok(None)` means the entry does not exist; `Err` means it exists but
/// could not be read. The cache engine maps both to a miss.
pub trait BlobStore: Send + Sync {
    fn read_blob(&self, key: &str) -> io::Result<Option<Bytes>>;

    fn write_blob(&self, key: &str, data: &[u8]) -> io::Result<()>;

    fn read_metadata(&self, key: &str) -> io::Result<Option<CacheMetadata>>;

    fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> io::Result<()>;

    /// Remove both the blob and its metadata
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Deterministic content hash used to derive cache keys
pub trait Fingerprint: Send + Sync {
    fn fingerprint(&self, input: &str) -> String;
}

/// Receives the outcome of a single request on the delivery context
pub trait RequestDelegate: Send + Sync {
    fn request_finished(&self, request: &Arc<Request>);

    fn request_failed(&self, request: &Arc<Request>);
}

/// Receives the outcome of a chain on the delivery context
pub trait ChainDelegate: Send + Sync {
    fn chain_finished(&self, chain: &Arc<ChainRequest>);

    fn chain_failed(&self, chain: &Arc<ChainRequest>, failed: &Arc<Request>);
}

/// Receives the outcome of a batch on the delivery context
pub trait BatchDelegate: Send + Sync {
    fn batch_finished(&self, batch: &Arc<BatchRequest>);

    fn batch_failed(&self, batch: &Arc<BatchRequest>);
}

/// Per-request extension points around completion.
///
/// Preprocessors run on the worker context before the handoff; filters run
/// on the delivery context right after `will_stop` and before the delegate.
/// For cache hits the preprocessor runs on the context that called `start`.
pub trait ResponseHooks: Send + Sync {
    fn complete_preprocessor(&self, _request: &Request) {}

    fn complete_filter(&self, _request: &Request) {}

    fn failed_preprocessor(&self, _request: &Request) {}

    fn failed_filter(&self, _request: &Request) {}
}
