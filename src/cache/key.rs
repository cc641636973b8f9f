//! Cache key derivation

use sha2::{Digest, Sha256};

use crate::{core::traits::Fingerprint, request::RequestDescriptor};

/// Lower-case hex SHA-256, the default cache key fingerprint
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprint;

impl Fingerprint for Sha256Fingerprint {
    fn fingerprint(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Plain description of what identifies a cached response.
///
/// Arguments pass through the descriptor's cache key filter and are
/// serialized from an ordered map, so insertion order never matters.
pub fn cache_key_source(descriptor: &RequestDescriptor) -> String {
    let arguments = serde_json::to_string(&descriptor.cache_arguments()).unwrap_or_default();
    format!(
        "Method:{} Host:{} Url:{} Argument:{}",
        descriptor.method,
        descriptor.host(),
        descriptor.path,
        arguments
    )
}

pub fn cache_key(descriptor: &RequestDescriptor, fingerprint: &dyn Fingerprint) -> String {
    fingerprint.fingerprint(&cache_key_source(descriptor))
}
