//! In-flight registries
//!
//! The context keeps one registry of running requests keyed by task id and
//! one per composite kind keyed by the composite's id. Entries keep their
//! owners alive while work is outstanding.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};
use uuid::Uuid;

use crate::request::{Request, TaskId};

/// Task id to request map for everything handed to the transport
#[derive(Default)]
pub struct RequestRegistry {
    requests: DashMap<TaskId, Arc<Request>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, task_id: TaskId, request: Arc<Request>) {
        debug!("Registering request task {task_id}");
        self.requests.insert(task_id, request);
    }

    /// Remove an entry, returning it if it was still present
    pub fn remove(&self, task_id: TaskId) -> Option<Arc<Request>> {
        self.requests.remove(&task_id).map(|(_, request)| {
            debug!("Deregistered request task {task_id}");
            request
        })
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<Request>> {
        self.requests.get(&task_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.requests.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Stop every registered request.
    ///
    /// Keys are snapshotted first and each request is stopped with no map
    /// guard held, since `stop` removes the entry itself.
    pub fn cancel_all(&self) {
        let task_ids: Vec<TaskId> = self.requests.iter().map(|entry| *entry.key()).collect();
        info!("Cancelling {} in-flight requests", task_ids.len());

        for task_id in task_ids {
            if let Some(request) = self.get(task_id) {
                request.stop();
            }
        }
    }
}

/// Running chains or batches, keyed by their id
pub struct CompositeRegistry<T> {
    items: DashMap<Uuid, Arc<T>>,
}

impl<T> Default for CompositeRegistry<T> {
    fn default() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

impl<T> CompositeRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: Uuid, item: Arc<T>) {
        self.items.insert(id, item);
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<T>> {
        self.items.remove(id).map(|(_, item)| item)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|entry| *entry.key()).collect()
    }
}
