//! Sequential request chains

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use log::{debug, error, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use super::CompositeState;
use crate::{
    core::{
        accessory::{Accessory, AccessoryList, Subject},
        context::NetworkContext,
        dispatch::run_then,
        traits::{ChainDelegate, RequestDelegate},
    },
    request::Request,
};

/// Runs after a step succeeds and before the next one starts
pub type ChainCallback = Box<dyn FnOnce(&Arc<ChainRequest>, &Arc<Request>) + Send + 'static>;

struct Step {
    request: Arc<Request>,
    callback: Option<ChainCallback>,
}

struct ChainInner {
    steps: Vec<Step>,
    /// Index of the next step to start; the running step sits just before it
    next_index: usize,
    phase: CompositeState,
    delegate: Option<Weak<dyn ChainDelegate>>,
    failed_request: Option<Arc<Request>>,
    tag: i64,
}

impl ChainInner {
    fn current(&self) -> Option<&Step> {
        self.next_index
            .checked_sub(1)
            .and_then(|index| self.steps.get(index))
    }
}

pub struct ChainRequest {
    id: Uuid,
    me: Weak<ChainRequest>,
    ctx: Arc<NetworkContext>,
    state: Mutex<ChainInner>,
    accessories: AccessoryList,
}

impl ChainRequest {
    pub fn new(ctx: &Arc<NetworkContext>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            me: me.clone(),
            ctx: ctx.clone(),
            state: Mutex::new(ChainInner {
                steps: Vec::new(),
                next_index: 0,
                phase: CompositeState::Idle,
                delegate: None,
                failed_request: None,
                tag: 0,
            }),
            accessories: AccessoryList::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> CompositeState {
        self.state.lock().phase
    }

    pub fn tag(&self) -> i64 {
        self.state.lock().tag
    }

    pub fn set_tag(&self, tag: i64) {
        self.state.lock().tag = tag;
    }

    pub fn requests(&self) -> Vec<Arc<Request>> {
        self.state
            .lock()
            .steps
            .iter()
            .map(|step| step.request.clone())
            .collect()
    }

    /// The step currently running, or the last one that ran
    pub fn current_request(&self) -> Option<Arc<Request>> {
        self.state.lock().current().map(|step| step.request.clone())
    }

    pub fn failed_request(&self) -> Option<Arc<Request>> {
        self.state.lock().failed_request.clone()
    }

    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: ChainDelegate + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        self.state.lock().delegate = Some(weak);
    }

    pub fn add_accessory(&self, accessory: Arc<dyn Accessory>) {
        self.accessories.add(accessory);
    }

    /// Append a step whose callback sees the chain and the finished step.
    ///
    /// Callbacks may append further steps; those run after the current
    /// tail.
    pub fn add_request<F>(&self, request: Arc<Request>, callback: F)
    where
        F: FnOnce(&Arc<ChainRequest>, &Arc<Request>) + Send + 'static,
    {
        self.push_step(request, Some(Box::new(callback)));
    }

    /// Append a step without a callback
    pub fn push_request(&self, request: Arc<Request>) {
        self.push_step(request, None);
    }

    fn push_step(&self, request: Arc<Request>, callback: Option<ChainCallback>) {
        let mut inner = self.state.lock();
        if inner.phase.is_terminal() {
            warn!(
                "Chain {} already {:?}, step {} not added",
                self.id,
                inner.phase,
                request.descriptor().path
            );
            return;
        }
        inner.steps.push(Step { request, callback });
    }

    pub fn start(self: &Arc<Self>) {
        {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Idle {
                warn!("Chain {} already started ({:?})", self.id, inner.phase);
                return;
            }
            if inner.steps.is_empty() {
                warn!("Chain {} has no requests, start ignored", self.id);
                return;
            }
            inner.phase = CompositeState::Running;
        }

        self.accessories.will_start(Subject::Chain(self));
        self.ctx.chains().add(self.id, self.clone());
        self.start_next();
    }

    /// Stop the running step and drop everything pending
    pub fn stop(self: &Arc<Self>) {
        let (current, steps) = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                debug!("Chain {} not running ({:?}), stop ignored", self.id, inner.phase);
                return;
            }
            inner.phase = CompositeState::Stopped;
            inner.delegate = None;
            let current = inner.current().map(|step| step.request.clone());
            // pending callbacks are dropped outside the lock
            (current, std::mem::take(&mut inner.steps))
        };
        drop(steps);

        debug!("Stopping chain {}", self.id);
        self.accessories.will_stop(Subject::Chain(self));
        if let Some(request) = current {
            request.stop();
        }
        self.ctx.chains().remove(&self.id);
        self.accessories.did_stop(Subject::Chain(self));
    }

    fn start_next(self: &Arc<Self>) {
        let next = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                return;
            }
            let next = inner
                .steps
                .get(inner.next_index)
                .map(|step| step.request.clone());
            if next.is_some() {
                inner.next_index += 1;
            }
            next
        };

        match next {
            Some(request) => {
                debug!(
                    "Chain {} starting step {}",
                    self.id,
                    request.descriptor().path
                );
                let delegate: Weak<dyn RequestDelegate> = self.me.clone();
                request.set_delegate_weak(Some(delegate));
                request.clear_callbacks();
                request.start();
            }
            None => self.finish(),
        }
    }

    fn finish(self: &Arc<Self>) {
        let delegate = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running {
                return;
            }
            inner.phase = CompositeState::Finished;
            inner.delegate.as_ref().and_then(Weak::upgrade)
        };

        debug!("Chain {} finished", self.id);
        self.close(|| {
            if let Some(delegate) = delegate {
                delegate.chain_finished(self);
            }
        });
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
                        self.accessories.will_stop(Subject::Chain(self));
                        notify();
                    },
                    || self.accessories.did_stop(Subject::Chain(self)),
                )
            },
            || {
                self.ctx.chains().remove(&self.id);
            },
        );
    }

    fn fail_at(self: &Arc<Self>, request: &Arc<Request>) {
        let delegate = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running || !Self::is_current(&inner, request) {
                return;
            }
            inner.phase = CompositeState::Failed;
            inner.failed_request = Some(request.clone());
            for step in inner.steps.iter_mut() {
                step.callback = None;
            }
            inner.delegate.as_ref().and_then(Weak::upgrade)
        };

        debug!(
            "Chain {} failed at step {}",
            self.id,
            request.descriptor().path
        );
        self.close(|| {
            if let Some(delegate) = delegate {
                delegate.chain_failed(self, request);
            }
        });
    }

    fn is_current(inner: &ChainInner, request: &Arc<Request>) -> bool {
        inner
            .current()
            .is_some_and(|step| Arc::ptr_eq(&step.request, request))
    }
}

impl RequestDelegate for ChainRequest {
    fn request_finished(&self, request: &Arc<Request>) {
        let Some(chain) = self.me.upgrade() else {
            return;
        };
        let callback = {
            let mut inner = self.state.lock();
            if inner.phase != CompositeState::Running || !Self::is_current(&inner, request) {
                return;
            }
            let index = inner.next_index - 1;
            inner.steps[index].callback.take()
        };

        if let Some(callback) = callback {
            // a panicking step callback ends the chain at that step
            if catch_unwind(AssertUnwindSafe(|| callback(&chain, request))).is_err() {
                error!(
                    "Chain {} step callback panicked at {}",
                    self.id,
                    request.descriptor().path
                );
                chain.fail_at(request);
                return;
            }
        }
        chain.start_next();
    }

    fn request_failed(&self, request: &Arc<Request>) {
        if let Some(chain) = self.me.upgrade() {
            chain.fail_at(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        request::{RequestDescriptor, RequestState},
        testing::{
            flush, init_log, test_context, EventLog, MockTransport, RecordingAccessory,
            RecordingDelegate, Reply,
        },
    };

    fn step_callback(
        log: &Arc<EventLog>,
    ) -> impl FnOnce(&Arc<ChainRequest>, &Arc<Request>) + Send + 'static {
        let log = log.clone();
        move |_chain: &Arc<ChainRequest>, request: &Arc<Request>| {
            log.push(format!("step {}", request.descriptor().path))
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        init_log();
        let transport = MockTransport::new();
        for path in ["/a", "/b", "/c"] {
            transport.on(path, Reply::ok(path));
        }
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        chain.add_accessory(RecordingAccessory::new("acc", log.clone()));
        for path in ["/a", "/b", "/c"] {
            chain.add_request(ctx.request(RequestDescriptor::get(path)), step_callback(&log));
        }
        chain.start();
        assert_eq!(ctx.chains().len(), 1);

        log.wait_for("acc did_stop chain").await;
        assert_eq!(
            log.events(),
            vec![
                "acc will_start chain",
                "step /a",
                "step /b",
                "step /c",
                "acc will_stop chain",
                "chain_finished",
                "acc did_stop chain",
            ]
        );
        assert_eq!(transport.calls(), vec!["/a", "/b", "/c"]);
        assert_eq!(chain.phase(), CompositeState::Finished);
        assert!(ctx.chains().is_empty());
        flush(&ctx).await;
        assert!(ctx.requests().is_empty());
    }

    #[tokio::test]
    async fn test_chain_stops_at_failed_step() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/a", Reply::ok("a"));
        transport.on("/b", Reply::status(500, "boom"));
        transport.on("/c", Reply::ok("c"));
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        for path in ["/a", "/b", "/c"] {
            chain.add_request(ctx.request(RequestDescriptor::get(path)), step_callback(&log));
        }
        chain.start();

        log.wait_for("chain_failed /b").await;
        flush(&ctx).await;
        assert_eq!(log.events(), vec!["step /a", "chain_failed /b"]);
        assert_eq!(transport.call_count("/c"), 0);
        assert_eq!(chain.phase(), CompositeState::Failed);
        assert_eq!(
            chain.failed_request().unwrap().descriptor().path,
            "/b".to_string()
        );
        assert!(ctx.chains().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_step_callback_fails_chain() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/a", Reply::ok("a"));
        transport.on("/b", Reply::ok("b"));
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        chain.add_accessory(RecordingAccessory::new("acc", log.clone()));
        chain.add_request(
            ctx.request(RequestDescriptor::get("/a")),
            |_chain: &Arc<ChainRequest>, _request: &Arc<Request>| panic!("step bug"),
        );
        chain.add_request(ctx.request(RequestDescriptor::get("/b")), step_callback(&log));
        chain.start();

        log.wait_for("acc did_stop chain").await;
        flush(&ctx).await;
        assert_eq!(
            log.events(),
            vec![
                "acc will_start chain",
                "acc will_stop chain",
                "chain_failed /a",
                "acc did_stop chain",
            ]
        );
        assert_eq!(transport.call_count("/b"), 0);
        assert_eq!(chain.phase(), CompositeState::Failed);
        assert!(ctx.chains().is_empty());
        assert!(ctx.requests().is_empty());
    }

    #[tokio::test]
    async fn test_callback_appends_dependent_step() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/token", Reply::ok("profile"));
        transport.on("/b", Reply::ok("b"));
        transport.on("/profile", Reply::ok("me"));
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        let inner_log = log.clone();
        chain.add_request(
            ctx.request(RequestDescriptor::get("/token")),
            move |chain: &Arc<ChainRequest>, request: &Arc<Request>| {
                let next = request.response_text().unwrap_or_default();
                let follow_up = request
                    .context()
                    .request(RequestDescriptor::get(format!("/{next}")));
                chain.add_request(follow_up, step_callback(&inner_log));
            },
        );
        chain.add_request(ctx.request(RequestDescriptor::get("/b")), step_callback(&log));
        chain.start();

        log.wait_for("chain_finished").await;
        assert_eq!(transport.calls(), vec!["/token", "/b", "/profile"]);
        assert_eq!(log.events(), vec!["step /b", "step /profile", "chain_finished"]);
        assert_eq!(chain.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_member_callbacks_are_replaced() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/a", Reply::ok("a"));
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let request = ctx.request(RequestDescriptor::get("/a"));
        let own = log.clone();
        request.set_callbacks(move |_| own.push("own success"), |_| {});
        request.set_delegate(&delegate);

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        chain.push_request(request);
        chain.start();

        log.wait_for("chain_finished").await;
        assert_eq!(log.events(), vec!["chain_finished"]);
    }

    #[tokio::test]
    async fn test_stop_running_chain() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/a", Reply::Hang);
        transport.on("/b", Reply::ok("b"));
        let ctx = test_context(transport.clone());
        let log = EventLog::new();
        let delegate = RecordingDelegate::new(log.clone());

        let chain = ctx.chain();
        chain.set_delegate(&delegate);
        chain.add_accessory(RecordingAccessory::new("acc", log.clone()));
        let first = ctx.request(RequestDescriptor::get("/a"));
        chain.push_request(first.clone());
        chain.push_request(ctx.request(RequestDescriptor::get("/b")));
        chain.start();
        transport.wait_for_call("/a").await;

        chain.stop();
        chain.stop();
        flush(&ctx).await;

        assert_eq!(
            log.events(),
            vec![
                "acc will_start chain",
                "acc will_stop chain",
                "acc did_stop chain"
            ]
        );
        assert_eq!(first.phase(), RequestState::Cancelled);
        assert_eq!(transport.call_count("/b"), 0);
        assert_eq!(chain.phase(), CompositeState::Stopped);
        assert!(chain.requests().is_empty());
        assert!(ctx.chains().is_empty());
        assert!(ctx.requests().is_empty());

        // a stopped chain takes no new steps
        chain.push_request(ctx.request(RequestDescriptor::get("/b")));
        assert!(chain.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_starts_are_ignored() {
        init_log();
        let transport = MockTransport::new();
        transport.on("/a", Reply::Hang);
        let ctx = test_context(transport.clone());

        let empty = ctx.chain();
        empty.start();
        assert_eq!(empty.phase(), CompositeState::Idle);
        assert!(ctx.chains().is_empty());

        let chain = ctx.chain();
        chain.push_request(ctx.request(RequestDescriptor::get("/a")));
        chain.start();
        chain.start();
        transport.wait_for_call("/a").await;
        flush(&ctx).await;
        assert_eq!(transport.call_count("/a"), 1);

        chain.stop();
    }
}
