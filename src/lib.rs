//! Request orchestration above a pluggable HTTP transport.
//!
//! Single requests run through a cache-aware lifecycle with ordered
//! completion hooks; chains run requests one after another and batches run
//! them together with all-or-nothing completion.

pub mod cache;
pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::{NetworkContext, RequestError, Transport, TransportError, TransportResponse};
pub use orchestration::{BatchRequest, ChainRequest};
pub use request::{CachePolicy, Request, RequestDescriptor};
