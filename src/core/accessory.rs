//! Accessory notification protocol
//!
//! Requests, chains and batches all own an [`AccessoryList`] and fire the
//! same three hooks through it. Every component fires `will_start` before it
//! registers itself and before any transport work begins.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    orchestration::{BatchRequest, ChainRequest},
    request::Request,
};

/// The object an accessory is being notified about
#[derive(Clone, Copy)]
pub enum Subject<'a> {
    Request(&'a Arc<Request>),
    Chain(&'a Arc<ChainRequest>),
    Batch(&'a Arc<BatchRequest>),
}

impl Subject<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Request(_) => "request",
            Subject::Chain(_) => "chain",
            Subject::Batch(_) => "batch",
        }
    }

    pub fn id(&self) -> String {
        match self {
            Subject::Request(request) => request.id().to_string(),
            Subject::Chain(chain) => chain.id().to_string(),
            Subject::Batch(batch) => batch.id().to_string(),
        }
    }

    pub fn as_request(&self) -> Option<&Arc<Request>> {
        match self {
            Subject::Request(request) => Some(request),
            _ => None,
        }
    }
}

/// Observer of start/stop transitions
pub trait Accessory: Send + Sync {
    fn will_start(&self, _subject: &Subject<'_>) {}

    fn will_stop(&self, _subject: &Subject<'_>) {}

    fn did_stop(&self, _subject: &Subject<'_>) {}
}

/// Ordered list of accessories.
///
/// Hooks run against a snapshot so an accessory may register further
/// accessories without deadlocking; those only see later notifications.
#[derive(Default)]
pub struct AccessoryList {
    items: Mutex<Vec<Arc<dyn Accessory>>>,
}

impl AccessoryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, accessory: Arc<dyn Accessory>) {
        self.items.lock().push(accessory);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn will_start(&self, subject: Subject<'_>) {
        for accessory in self.snapshot() {
            accessory.will_start(&subject);
        }
    }

    pub fn will_stop(&self, subject: Subject<'_>) {
        for accessory in self.snapshot() {
            accessory.will_stop(&subject);
        }
    }

    pub fn did_stop(&self, subject: Subject<'_>) {
        for accessory in self.snapshot() {
            accessory.did_stop(&subject);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Accessory>> {
        self.items.lock().clone()
    }
}
