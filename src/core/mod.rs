//! Core abstractions for reqflow
//!
//! This module provides the capability traits, error types, registries and
//! the network context that the request, cache and orchestration layers
//! build on.

pub mod accessory;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod traits;


// Re-export commonly used types
pub use accessory::{Accessory, AccessoryList, Subject};
pub use context::{NetworkContext, NetworkContextBuilder};
pub use dispatch::Dispatcher;
pub use error::{
    CacheError, CacheResult, Error, ErrorContext, RequestError, RequestErrorKind, Result,
    TransportError, TransportErrorKind,
};
pub use registry::{CompositeRegistry, RequestRegistry};
pub use traits::*;
