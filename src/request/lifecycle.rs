//! Request lifecycle
//!
//! A [`Request`] walks `Idle -> Submitting -> (CacheHit | InFlight) ->
//! Completing -> Succeeded | Failed`, or ends in `Cancelled` through
//! [`Request::stop`]. Response handling runs on the transport task; every
//! user-visible hook runs on the context's delivery dispatcher.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::HeaderMap;
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{
    descriptor::{RequestDescriptor, ResponseFormat},
    record::{RequestRecord, TaskHandle, TaskId},
};
use crate::{
    cache::CachedResponse,
    core::{
        accessory::{Accessory, AccessoryList, Subject},
        context::NetworkContext,
        dispatch::run_then,
        error::{RequestError, TransportError},
        traits::{RequestDelegate, ResponseHooks, TransportResponse},
    },
};

/// Completion callback for a single request
pub type Callback = Box<dyn FnOnce(&Arc<Request>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Submitting,
    CacheHit,
    InFlight,
    Completing,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
        )
    }
}

struct Inner {
    phase: RequestState,
    record: RequestRecord,
    handle: Option<TaskHandle>,
    delegate: Option<Weak<dyn RequestDelegate>>,
    on_success: Option<Callback>,
    on_failure: Option<Callback>,
    hooks: Option<Arc<dyn ResponseHooks>>,
}

pub struct Request {
    id: Uuid,
    ctx: Arc<NetworkContext>,
    descriptor: RequestDescriptor,
    state: Mutex<Inner>,
    accessories: AccessoryList,
}

impl Request {
    /// Freeze a descriptor into a request bound to `ctx`.
    ///
    /// Unset descriptor fields are filled from the context configuration
    /// as it is at this moment.
    pub fn new(ctx: &Arc<NetworkContext>, descriptor: RequestDescriptor) -> Arc<Self> {
        let descriptor = descriptor.resolve(&ctx.config());
        Arc::new(Self {
            id: Uuid::new_v4(),
            ctx: ctx.clone(),
            descriptor,
            state: Mutex::new(Inner {
                phase: RequestState::Idle,
                record: RequestRecord::default(),
                handle: None,
                delegate: None,
                on_success: None,
                on_failure: None,
                hooks: None,
            }),
            accessories: AccessoryList::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &Arc<NetworkContext> {
        &self.ctx
    }

    pub fn phase(&self) -> RequestState {
        self.state.lock().phase
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.state.lock().record.task_id
    }

    pub fn status_code(&self) -> Option<u16> {
        self.state.lock().record.status_code
    }

    pub fn response_headers(&self) -> HeaderMap {
        self.state.lock().record.response_headers.clone()
    }

    pub fn response_data(&self) -> Option<Bytes> {
        self.state.lock().record.response_data.clone()
    }

    pub fn response_text(&self) -> Option<String> {
        self.state.lock().record.response_text.clone()
    }

    pub fn response_json(&self) -> Option<Value> {
        self.state.lock().record.response_json.clone()
    }

    pub fn error(&self) -> Option<RequestError> {
        self.state.lock().record.error.clone()
    }

    pub fn is_data_from_cache(&self) -> bool {
        self.state.lock().record.is_from_cache
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().record.is_cancelled
    }

    /// Whether a transport task is currently running for this request
    pub fn is_executing(&self) -> bool {
        let inner = self.state.lock();
        inner.phase == RequestState::InFlight
            && inner.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Install a non-owning delegate
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: RequestDelegate + 'static,
    {
        let weak: Weak<D> = Arc::downgrade(delegate);
        self.set_delegate_weak(Some(weak));
    }

    pub fn set_delegate_weak(&self, delegate: Option<Weak<dyn RequestDelegate>>) {
        self.state.lock().delegate = delegate;
    }

    pub fn set_callbacks<S, F>(&self, success: S, failure: F)
    where
        S: FnOnce(&Arc<Request>) + Send + 'static,
        F: FnOnce(&Arc<Request>) + Send + 'static,
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

    pub fn set_hooks(&self, hooks: Arc<dyn ResponseHooks>) {
        self.state.lock().hooks = Some(hooks);
    }

    pub fn add_accessory(&self, accessory: Arc<dyn Accessory>) {
        self.accessories.add(accessory);
    }

    pub fn start(self: &Arc<Self>) {
        self.start_inner(false, None);
    }

    /// Go to the network even when a valid cache entry exists.
    ///
    /// A successful response still refreshes the cache.
    pub fn start_without_cache(self: &Arc<Self>) {
        self.start_inner(true, None);
    }

    pub fn start_with_callbacks<S, F>(self: &Arc<Self>, success: S, failure: F)
    where
        S: FnOnce(&Arc<Request>) + Send + 'static,
        F: FnOnce(&Arc<Request>) + Send + 'static,
    {
        self.start_inner(false, Some((Box::new(success), Box::new(failure))));
    }

    /// Cancel the request.
    ///
    /// No completion callback or delegate method runs afterwards. Stopping
    /// an idle or finished request does nothing.
    pub fn stop(self: &Arc<Self>) {
        let (handle, task_id) = {
            let mut inner = self.state.lock();
            if inner.phase == RequestState::Idle || inner.phase.is_terminal() {
                debug!("Request {} is not running ({:?}), stop ignored", self.id, inner.phase);
                return;
            }
            inner.phase = RequestState::Cancelled;
            inner.record.is_cancelled = true;
            inner.delegate = None;
            inner.on_success = None;
            inner.on_failure = None;
            (inner.handle.take(), inner.record.task_id)
        };

        debug!("Stopping request {} ({})", self.id, self.descriptor.path);
        self.accessories.will_stop(Subject::Request(self));
        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(task_id) = task_id {
            self.ctx.requests().remove(task_id);
        }
        self.accessories.did_stop(Subject::Request(self));
    }

    fn start_inner(self: &Arc<Self>, skip_cache: bool, callbacks: Option<(Callback, Callback)>) {
        {
            let mut inner = self.state.lock();
            match inner.phase {
                RequestState::Idle => {}
                phase if phase.is_terminal() => {
                    inner.record.reset();
                    inner.handle = None;
                }
                phase => {
                    warn!(
                        "Request {} already started ({:?}), ignoring start",
                        self.id, phase
                    );
                    return;
                }
            }
            inner.phase = RequestState::Submitting;
            if let Some((success, failure)) = callbacks {
                inner.on_success = Some(success);
                inner.on_failure = Some(failure);
            }
        }

        self.accessories.will_start(Subject::Request(self));

        let use_cache = !skip_cache
            && self
                .descriptor
                .cache_policy
                .as_ref()
                .is_some_and(|policy| !policy.ignore_cache);
        if use_cache {
            if let Some(cached) = self.ctx.cache().load(&self.descriptor) {
                self.complete_from_cache(cached);
                return;
            }
        }

        match self.descriptor.url() {
            Some(_) => self.submit(),
            None => self.fail_submission(format!(
                "no base url to resolve '{}' against",
                self.descriptor.path
            )),
        }
    }

    fn complete_from_cache(self: &Arc<Self>, cached: CachedResponse) {
        {
            let mut inner = self.state.lock();
            if inner.phase != RequestState::Submitting {
                return;
            }
            inner.phase = RequestState::CacheHit;
            inner.record.apply_cached(cached);
            inner.phase = RequestState::Completing;
        }
        debug!("Request {} served from cache", self.id);

        if let Some(hooks) = self.hooks() {
            hooks.complete_preprocessor(self);
        }
        self.deliver(true);
    }

    fn fail_submission(self: &Arc<Self>, message: String) {
        {
            let mut inner = self.state.lock();
            if inner.phase != RequestState::Submitting {
                return;
            }
            inner.phase = RequestState::Completing;
            inner.record.error = Some(RequestError::Submission(message));
        }
        if let Some(hooks) = self.hooks() {
            hooks.failed_preprocessor(self);
        }
        self.deliver(false);
    }

    fn submit(self: &Arc<Self>) {
        let mut inner = self.state.lock();
        // will_start may have stopped us
        if inner.phase != RequestState::Submitting {
            return;
        }

        let task_id = self.ctx.next_task_id();
        let timeout = self.descriptor.timeout_or_default();
        let transport = self.ctx.transport().clone();
        let request = self.clone();

        // registered before the task exists so its result is never dropped;
        // it cannot observe InFlight until this lock is released
        self.ctx.requests().add(task_id, self.clone());
        let task = self.ctx.runtime().spawn(async move {
            let result =
                match tokio::time::timeout(timeout, transport.execute(&request.descriptor)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(timeout)),
                };
            request.handle_result(task_id, result);
        });

        inner.record.task_id = Some(task_id);
        inner.handle = Some(TaskHandle::new(task_id, task.abort_handle()));
        inner.phase = RequestState::InFlight;
        debug!(
            "Request {} submitted as task {} ({} {})",
            self.id, task_id, self.descriptor.method, self.descriptor.path
        );
    }

    fn handle_result(
        self: &Arc<Self>,
        task_id: TaskId,
        result: Result<TransportResponse, TransportError>,
    ) {
        if !self.ctx.requests().contains(task_id) {
            debug!("Dropping result of deregistered task {task_id}");
            return;
        }

        let succeeded = {
            let mut inner = self.state.lock();
            if inner.phase != RequestState::InFlight || inner.record.task_id != Some(task_id) {
                return;
            }
            inner.phase = RequestState::Completing;
            match result {
                Ok(response) => {
                    inner.record.apply_response(response);
                    let error = self.check_response(&mut inner.record);
                    inner.record.error = error;
                }
                Err(e) => {
                    inner.record.error = Some(e.into());
                }
            }
            inner.record.error.is_none()
        };

        if succeeded {
            self.write_cache();
            if let Some(hooks) = self.hooks() {
                hooks.complete_preprocessor(self);
            }
        } else {
            if let Some(error) = self.error() {
                debug!("Request {} failed: {}", self.id, error);
            }
            if let Some(hooks) = self.hooks() {
                hooks.failed_preprocessor(self);
            }
        }
        self.deliver(succeeded);
    }

    /// Status code, then body format, then the caller's validator
    fn check_response(&self, record: &mut RequestRecord) -> Option<RequestError> {
        let code = record.status_code.unwrap_or_default();
        if !self.descriptor.accepted_status.contains(code) {
            return Some(RequestError::InvalidStatusCode(code));
        }

        let body = record.response_data.clone().unwrap_or_default();
        if self.descriptor.response_format == ResponseFormat::Json {
            match serde_json::from_slice::<Value>(&body) {
                Ok(json) => record.response_json = Some(json),
                Err(e) => return Some(RequestError::InvalidResponseFormat(e.to_string())),
            }
        }

        if let Some(validator) = &self.descriptor.validator {
            if !validator.validate(&body, record.response_json.as_ref()) {
                return Some(RequestError::InvalidResponseFormat(
                    "response rejected by validator".to_string(),
                ));
            }
        }
        None
    }

    fn write_cache(self: &Arc<Self>) {
        let Some(policy) = &self.descriptor.cache_policy else {
            return;
        };
        let (data, from_cache, encoding) = {
            let inner = self.state.lock();
            (
                inner.record.response_data.clone(),
                inner.record.is_from_cache,
                inner.record.encoding(),
            )
        };
        let Some(data) = data else {
            return;
        };

        if policy.write_asynchronously {
            let request = self.clone();
            self.ctx.runtime().spawn_blocking(move || {
                request.save_to_cache(&data, from_cache, &encoding);
            });
        } else {
            self.save_to_cache(&data, from_cache, &encoding);
        }
    }

    fn save_to_cache(&self, data: &[u8], from_cache: bool, encoding: &str) {
        if let Err(e) = self
            .ctx
            .cache()
            .save(&self.descriptor, data, from_cache, encoding)
        {
            debug!("Request {} response not cached: {}", self.id, e);
        }
    }

    fn hooks(&self) -> Option<Arc<dyn ResponseHooks>> {
        self.state.lock().hooks.clone()
    }

    fn deliver(self: &Arc<Self>, succeeded: bool) {
        let request = self.clone();
        self.ctx
            .dispatcher()
            .dispatch(move || request.finish(succeeded));
    }

    /// Runs on the delivery context
    fn finish(self: &Arc<Self>, succeeded: bool) {
        let (delegate, callback, hooks, task_id) = {
            let mut inner = self.state.lock();
            if inner.phase != RequestState::Completing {
                debug!("Request {} left Completing before delivery", self.id);
                return;
            }
            inner.phase = if succeeded {
                RequestState::Succeeded
            } else {
                RequestState::Failed
            };
            let success = inner.on_success.take();
            let failure = inner.on_failure.take();
            (
                inner.delegate.as_ref().and_then(Weak::upgrade),
                if succeeded { success } else { failure },
                inner.hooks.clone(),
                inner.record.task_id,
            )
        };

        // user code below may panic; did_stop and deregistration still happen
        run_then(
            || {
                run_then(
                    || self.run_completion_hooks(succeeded, hooks, delegate, callback),
                    || self.accessories.did_stop(Subject::Request(self)),
                )
            },
            || {
                if let Some(task_id) = task_id {
                    self.ctx.requests().remove(task_id);
                }
            },
        );
    }

    fn run_completion_hooks(
        self: &Arc<Self>,
        succeeded: bool,
        hooks: Option<Arc<dyn ResponseHooks>>,
        delegate: Option<Arc<dyn RequestDelegate>>,
        callback: Option<Callback>,
    ) {
        self.accessories.will_stop(Subject::Request(self));
        if let Some(hooks) = &hooks {
            if succeeded {
                hooks.complete_filter(self);
            } else {
                hooks.failed_filter(self);
            }
        }
        if let Some(delegate) = delegate {
            if succeeded {
                delegate.request_finished(self);
            } else {
                delegate.request_failed(self);
            }
        }
        if let Some(callback) = callback {
            callback(self);
        }
    }
}
