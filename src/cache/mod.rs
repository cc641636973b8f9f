//! Transparent response cache
//!
//! Entries are keyed by a fingerprint of the request identity and carry
//! metadata that lets a later read reject them by age, cache version,
//! data owner or client version.

pub mod engine;
pub mod key;
pub mod metadata;
pub mod store;

pub use engine::{CacheEngine, CachedResponse};
pub use key::{cache_key, cache_key_source, Sha256Fingerprint};
pub use metadata::CacheMetadata;
pub use store::{FileBlobStore, MemoryBlobStore};
