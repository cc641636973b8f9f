//! Concurrent all-or-nothing request batches

use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use super::CompositeState;
use crate::{
    core::{
        accessory::{Accessory, AccessoryList, Subject},
        context::NetworkContext,
        dispatch::run_then,
        traits::{BatchDelegate, RequestDelegate},
    },
    request::Request,
};

/// Completion callback for a batch
pub type BatchCallback = Box<dyn FnOnce(&Arc<BatchRequest>) + Send + 'static>;

struct BatchInner {
    finished_count: usize,
    failed_request: Option<Arc<Request>>,
    phase: CompositeState,
    delegate: Option<Weak<dyn BatchDelegate>>,
    on_success: Option<BatchCallback>,
    on_failure: Option<BatchCallback>,
    tag: i64,
}

pub struct BatchRequest {
    id: Uuid,
    me: Weak<BatchRequest>,
    ctx: Arc<NetworkContext>,
    requests: Vec<Arc<Request>>,
    state: Mutex<BatchInner>,
    accessories: AccessoryList,
}

impl BatchRequest {
    pub fn new(ctx: &Arc<NetworkContext>, requests: Vec<Arc<Request>>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            me: me.clone(),
            ctx: ctx.clone(),
            requests,
            state: Mutex::new(BatchInner {
                finished_count: 0,
                failed_request: None,
                phase: CompositeState::Idle,
                delegate: None,
                on_success: None,
                on_failure: None,
                tag: 0,
            }),
            accessories: AccessoryList::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn requests(&self) -> &[Arc<Request>] {
        &self.requests
    }

    pub fn phase(&self) -> CompositeState {
        self.state.lock().phase
    }

    pub fn finished_count(&self) -> usize {
        self.state.lock().finished_count
    }

    /// The first member seen failing
    pub fn failed_request(&self) -> Option<Arc<Request>> {
        self.state.lock().failed_request.clone()
    }

    pub fn tag(&self) -> i64 {
        self.state.lock().tag
    }

    pub fn set_tag(&self, tag: i64) {
        self.state.lock().tag = tag;
    }

    /// True when every member was answered from the cache
    pub fn is_data_from_cache(&self) -> bool {
        self.requests.iter().all(|request| request.is_data_from_cache())
    }

    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: BatchDelegate + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        self.state.lock().delegate = Some(weak);
    }

    pub fn set_callbacks<S, F>(&self, success: S, failure: F)
    where
        S: FnOnce(&Arc<BatchRequest>) + Send + 'static,
        F: FnOnce(&Arc<BatchRequest>) + Send + 'static,
    {
        let mut inner = self.state.lock();
        inner.on_success = Some(Box::new(success));
        inner.on_failure = Some(Box::new(failure));
    }

    pub fn clear_callbacks(&self) {
        let mut inner = self.state.lock();
        inner.on_success = None;
        inner.on_failure = None;
    }

    pub fn add_accessory(&self, accessory: Arc<dyn Accessory>) {
        self.accessories.add(accessory);
    }

    pub fn start(self: &Arc<Self>) {
        self.start_inner(None);
    }

    pub fn start_with_callbacks<S, F>(self: &Arc<Self>, success: S, failure: F)
    where
        S: FnOnce(&Arc<BatchRequest>) + Send + 'static,
        F: FnOnce(&Arc<BatchRequest>) + Send + 'static,
    {
        self.start_inner(Some((Box::new(success), Box::new(failure))));
    }

    /// Stop every member; no completion runs afterwards
    pub fn stop(self: &Arc<Self>) {
        {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                debug!("Batch {} not running ({:?}), stop ignored", self.id, inner.phase);
                return;
            }
            inner.phase = CompositeState::Stopped;
            inner.delegate = None;
            inner.on_success = None;
            inner.on_failure = None;
        }

        debug!("Stopping batch {}", self.id);
        self.accessories.will_stop(Subject::Batch(self));
        self.stop_members();
        self.accessories.did_stop(Subject::Batch(self));
        self.ctx.batches().remove(&self.id);
    }

    fn start_inner(self: &Arc<Self>, callbacks: Option<(BatchCallback, BatchCallback)>) {
        {
            let mut inner = self.state.lock();
            if inner.finished_count != 0 || inner.phase == CompositeState::Running {
                warn!("Batch {} already started ({:?})", self.id, inner.phase);
                return;
            }
            if self.requests.is_empty() {
                warn!("Batch {} has no requests, start ignored", self.id);
                return;
            }
            inner.failed_request = None;
            inner.phase = CompositeState::Running;
            if let Some((success, failure)) = callbacks {
                inner.on_success = Some(success);
                inner.on_failure = Some(failure);
            }
        }

        self.accessories.will_start(Subject::Batch(self));
        self.ctx.batches().add(self.id, self.clone());

        let delegate: Weak<dyn RequestDelegate> = self.me.clone();
        for request in &self.requests {
            if self.phase() != CompositeState::Running {
                break;
            }
            request.set_delegate_weak(Some(delegate.clone()));
            request.clear_callbacks();
            request.start();
        }
    }

    /// will_stop, `notify`, did_stop, then deregistration, which happens
    /// even if a hook panics
    fn close<F>(self: &Arc<Self>, notify: F)
    where
        F: FnOnce(),
    {
        run_then(
            || {
                run_then(
                    || {
                        self.accessories.will_stop(Subject::Batch(self));
                        notify();
                    },
                    || self.accessories.did_stop(Subject::Batch(self)),
                )
            },
            || {
                self.ctx.batches().remove(&self.id);
            },
        );
    }

    fn stop_members(&self) {
        for request in &self.requests {
            request.stop();
        }
    }
}

impl RequestDelegate for BatchRequest {
    fn request_finished(&self, _request: &Arc<Request>) {
        let Some(batch) = self.me.upgrade() else {
            return;
        };
        let completion = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                return;
            }
            inner.finished_count += 1;
            if inner.finished_count < self.requests.len() {
                return;
            }
            inner.phase = CompositeState::Finished;
            inner.on_failure = None;
            (
                inner.delegate.as_ref().and_then(Weak::upgrade),
                inner.on_success.take(),
            )
        };

        debug!("Batch {} finished", self.id);
        let (delegate, callback) = completion;
        batch.close(|| {
            if let Some(delegate) = delegate {
                delegate.batch_finished(&batch);
            }
            if let Some(callback) = callback {
                callback(&batch);
            }
        });
    }

    fn request_failed(&self, request: &Arc<Request>) {
        let Some(batch) = self.me.upgrade() else {
            return;
        };
        let (delegate, callback) = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                return;
            }
            inner.phase = CompositeState::Failed;
            inner.failed_request = Some(request.clone());
            inner.on_success = None;
            (
                inner.delegate.as_ref().and_then(Weak::upgrade),
                inner.on_failure.take(),
            )
        };

        debug!(
            "Batch {} failed at {}",
            self.id,
            request.descriptor().path
        );
        batch.close(|| {
            self.stop_members();
            if let Some(delegate) = delegate {
                delegate.batch_failed(&batch);
            }
            if let Some(callback) = callback {
                callback(&batch);
            }
        });
    }
}
