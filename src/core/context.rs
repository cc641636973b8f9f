//! Network context
//!
//! Everything a request needs beyond its descriptor lives here: transport,
//! cache engine, registries, delivery dispatcher and live configuration.
//! Callers build one context and pass it to every request, chain and batch.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use log::{debug, info};
use tokio::runtime::Handle;
use validator::Validate;

use super::{
    dispatch::Dispatcher,
    error::Result,
    registry::{CompositeRegistry, RequestRegistry},
    traits::{BlobStore, Fingerprint, Transport},
};
use crate::{
    cache::{CacheEngine, FileBlobStore, MemoryBlobStore, Sha256Fingerprint},
    config::Config,
    internal_error,
    orchestration::{BatchRequest, ChainRequest},
    request::{Request, RequestDescriptor, TaskId},
};

pub struct NetworkContext {
    config: ArcSwap<Config>,
    transport: Arc<dyn Transport>,
    cache: Arc<CacheEngine>,
    requests: RequestRegistry,
    chains: CompositeRegistry<ChainRequest>,
    batches: CompositeRegistry<BatchRequest>,
    dispatcher: Dispatcher,
    runtime: Handle,
    next_task_id: AtomicU64,
}

impl NetworkContext {
    pub fn builder(transport: Arc<dyn Transport>) -> NetworkContextBuilder {
        NetworkContextBuilder {
            transport,
            config: None,
            store: None,
            fingerprint: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Replace the configuration.
    ///
    /// Requests created afterwards pick up the new defaults; the cache sees
    /// the new client version immediately.
    pub fn update_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.cache.set_client_version(config.client_version.clone());
        self.config.store(Arc::new(config));
        info!("Network configuration updated");
        Ok(())
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    pub fn chains(&self) -> &CompositeRegistry<ChainRequest> {
        &self.chains
    }

    pub fn batches(&self) -> &CompositeRegistry<BatchRequest> {
        &self.batches
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn request(self: &Arc<Self>, descriptor: RequestDescriptor) -> Arc<Request> {
        Request::new(self, descriptor)
    }

    pub fn chain(self: &Arc<Self>) -> Arc<ChainRequest> {
        ChainRequest::new(self)
    }

    pub fn batch(self: &Arc<Self>, requests: Vec<Arc<Request>>) -> Arc<BatchRequest> {
        BatchRequest::new(self, requests)
    }

    /// Stop every in-flight request
    pub fn cancel_all_requests(&self) {
        self.requests.cancel_all();
    }
}

pub struct NetworkContextBuilder {
    transport: Arc<dyn Transport>,
    config: Option<Config>,
    store: Option<Arc<dyn BlobStore>>,
    fingerprint: Option<Arc<dyn Fingerprint>>,
    runtime: Option<Handle>,
}

impl NetworkContextBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the one the configuration selects
    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fingerprint(mut self, fingerprint: Arc<dyn Fingerprint>) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Runtime for transport tasks and the delivery context.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Arc<NetworkContext>> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| internal_error!("No tokio runtime available: {}", e))?,
        };

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store: Arc<dyn BlobStore> = match (self.store, &config.cache.directory) {
            (Some(store), _) => store,
            (None, Some(directory)) => {
                debug!("Using file cache at {directory}");
                Arc::new(FileBlobStore::new(directory)?)
            }
            (None, None) => Arc::new(MemoryBlobStore::new()),
        };
        let fingerprint = self
            .fingerprint
            .unwrap_or_else(|| Arc::new(Sha256Fingerprint));
        let cache = CacheEngine::new(store, fingerprint)
            .with_client_version(config.client_version.clone());

        let dispatcher = Dispatcher::spawn(&runtime);

        Ok(Arc::new(NetworkContext {
            config: ArcSwap::from_pointee(config),
            transport: self.transport,
            cache: Arc::new(cache),
            requests: RequestRegistry::new(),
            chains: CompositeRegistry::new(),
            batches: CompositeRegistry::new(),
            dispatcher,
            runtime,
            next_task_id: AtomicU64::new(1),
        }))
    }
}
