//! Cache validation, load and save

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use log::{debug, warn};
use serde_json::Value;

use super::{
    key::{cache_key, Sha256Fingerprint},
    metadata::{now_millis, CacheMetadata},
    store::MemoryBlobStore,
};
use crate::{
    core::{
        error::{CacheError, CacheResult},
        traits::{BlobStore, Fingerprint},
    },
    request::{record::decode_text, RequestDescriptor, ResponseFormat},
};

/// A cached body decoded the way the descriptor expects
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub data: Bytes,
    pub text: Option<String>,
    pub json: Option<Value>,
    pub metadata: CacheMetadata,
}

pub struct CacheEngine {
    store: Arc<dyn BlobStore>,
    fingerprint: Arc<dyn Fingerprint>,
    client_version: ArcSwap<String>,
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()), Arc::new(Sha256Fingerprint))
    }
}

impl CacheEngine {
    pub fn new(store: Arc<dyn BlobStore>, fingerprint: Arc<dyn Fingerprint>) -> Self {
        Self {
            store,
            fingerprint,
            client_version: ArcSwap::from_pointee(String::new()),
        }
    }

    pub fn with_client_version(self, client_version: impl Into<String>) -> Self {
        self.set_client_version(client_version);
        self
    }

    pub fn set_client_version(&self, client_version: impl Into<String>) {
        self.client_version.store(Arc::new(client_version.into()));
    }

    pub fn client_version(&self) -> Arc<String> {
        self.client_version.load_full()
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn key_for(&self, descriptor: &RequestDescriptor) -> String {
        cache_key(descriptor, self.fingerprint.as_ref())
    }

    /// Load a cached response, treating every problem as a miss
    pub fn load(&self, descriptor: &RequestDescriptor) -> Option<CachedResponse> {
        match self.validate_and_load(descriptor) {
            Ok(cached) => cached,
            Err(e) => {
                debug!("Cache miss for {}: {}", descriptor.path, e);
                None
            }
        }
    }

    /// Load a cached response and report why it is unusable.
    ///
    /// `Ok(None)` covers a descriptor without cache policy, an absent entry
    /// and an entry written for a different sensitive fingerprint.
    pub fn validate_and_load(
        &self,
        descriptor: &RequestDescriptor,
    ) -> CacheResult<Option<CachedResponse>> {
        let Some(policy) = &descriptor.cache_policy else {
            return Ok(None);
        };
        if policy.time_seconds < 0 {
            return Err(CacheError::InvalidTimeConfiguration(policy.time_seconds));
        }

        let key = self.key_for(descriptor);
        let metadata = match self.store.read_metadata(&key) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(None),
            Err(e) => return Err(CacheError::MetadataUnreadable(e.to_string())),
        };

        let age_millis = metadata.age_millis(now_millis());
        if age_millis < 0 || age_millis > policy.time_seconds.saturating_mul(1000) {
            return Err(CacheError::Expired {
                age_millis,
                limit_secs: policy.time_seconds,
            });
        }

        if metadata.version != policy.version {
            return Err(CacheError::VersionMismatch {
                stored: metadata.version.to_string(),
                current: policy.version.to_string(),
            });
        }

        if metadata.sensitive_fingerprint != policy.sensitive_fingerprint {
            debug!("Sensitive fingerprint changed for {}", descriptor.path);
            return Ok(None);
        }

        if let Some(stored) = &metadata.client_version {
            let current = self.client_version();
            if stored != current.as_str() {
                return Err(CacheError::VersionMismatch {
                    stored: stored.clone(),
                    current: current.to_string(),
                });
            }
        }

        let data = match self.store.read_blob(&key) {
            Ok(Some(data)) => data,
            Ok(None) => return Err(CacheError::DataUnreadable("missing cache body".to_string())),
            Err(e) => return Err(CacheError::DataUnreadable(e.to_string())),
        };

        let json = match descriptor.response_format {
            ResponseFormat::Json => Some(
                serde_json::from_slice(&data)
                    .map_err(|e| CacheError::DataUnreadable(e.to_string()))?,
            ),
            _ => None,
        };
        let text = decode_text(&data, &metadata.encoding);

        Ok(Some(CachedResponse {
            data,
            text,
            json,
            metadata,
        }))
    }

    /// Persist a response body.
    ///
    /// Nothing is written without a positive cache time or for a response
    /// that itself came from the cache. Any previous entry is dropped before
    /// the new blob lands, so its metadata can never vouch for the new body;
    /// a failed write leaves no entry at all.
    pub fn save(
        &self,
        descriptor: &RequestDescriptor,
        data: &[u8],
        from_cache: bool,
        encoding: &str,
    ) -> CacheResult<()> {
        let Some(policy) = &descriptor.cache_policy else {
            return Ok(());
        };
        if policy.time_seconds <= 0 || from_cache {
            return Ok(());
        }

        let key = self.key_for(descriptor);
        self.store.remove(&key).map_err(|e| {
            warn!("Failed to drop stale cache entry for {}: {}", descriptor.path, e);
            CacheError::WriteFailed(e.to_string())
        })?;
        if let Err(e) = self.store.write_blob(&key, data) {
            warn!("Failed to write cache body for {}: {}", descriptor.path, e);
            self.discard(&key);
            return Err(CacheError::WriteFailed(e.to_string()));
        }

        let client_version = self.client_version();
        let metadata = CacheMetadata {
            version: policy.version,
            sensitive_fingerprint: policy.sensitive_fingerprint.clone(),
            created_at_millis: now_millis(),
            encoding: encoding.to_string(),
            client_version: Some(client_version.to_string()),
        };
        if let Err(e) = self.store.write_metadata(&key, &metadata) {
            warn!("Failed to write cache metadata for {}: {}", descriptor.path, e);
            self.discard(&key);
            return Err(CacheError::WriteFailed(e.to_string()));
        }

        debug!("Cached {} bytes for {}", data.len(), descriptor.path);
        Ok(())
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Failed to discard partial cache entry {}: {}", key, e);
        }
    }

    pub fn remove(&self, descriptor: &RequestDescriptor) -> CacheResult<()> {
        let key = self.key_for(descriptor);
        self.store
            .remove(&key)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))
    }
}
