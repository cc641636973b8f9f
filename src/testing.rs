//! Test support: scripted transport and recording observers

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::{
    config::Config,
    core::{
        accessory::{Accessory, Subject},
        context::NetworkContext,
        error::TransportError,
        traits::{
            BatchDelegate, ChainDelegate, RequestDelegate, ResponseHooks, Transport,
            TransportResponse,
        },
    },
    orchestration::{BatchRequest, ChainRequest},
    request::{Request, RequestDescriptor},
};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub(crate) fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What the mock transport does for a path
#[derive(Clone)]
pub(crate) enum Reply {
    Respond {
        status: u16,
        body: Bytes,
        delay: Duration,
    },
    Fail(TransportError),
    /// Never completes; only a timeout or cancellation ends it
    Hang,
}

impl Reply {
    pub(crate) fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Reply::Respond {
            status,
            body: Bytes::copy_from_slice(body.as_bytes()),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn after(self, delay: Duration) -> Self {
        match self {
            Reply::Respond { status, body, .. } => Reply::Respond {
                status,
                body,
                delay,
            },
            other => other,
        }
    }
}

/// Transport answering from a per-path script
#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    called: Notify,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(&self, path: &str, reply: Reply) {
        self.replies.lock().insert(path.to_string(), reply);
    }

    pub(crate) fn call_count(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|p| *p == path).count()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) async fn wait_for_call(&self, path: &str) {
        let waiting = async {
            loop {
                let notified = self.called.notified();
                if self.call_count(path) > 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, waiting)
            .await
            .unwrap_or_else(|_| panic!("transport never saw {path}"));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        let reply = self.replies.lock().get(&request.path).cloned();
        self.calls.lock().push(request.path.clone());
        self.called.notify_waiters();

        match reply {
            Some(Reply::Respond {
                status,
                body,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(TransportResponse::new(status, body))
            }
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(TransportResponse::new(404, "not found")),
        }
    }
}

pub(crate) fn test_context(transport: Arc<MockTransport>) -> Arc<NetworkContext> {
    let config = Config::from_yaml("base_url: https://api.test").unwrap();
    context_with_config(transport, config)
}

pub(crate) fn context_with_config(
    transport: Arc<MockTransport>,
    config: Config,
) -> Arc<NetworkContext> {
    NetworkContext::builder(transport)
        .config(config)
        .build()
        .unwrap()
}

/// Wait until everything queued on the delivery context so far has run
pub(crate) async fn flush(ctx: &NetworkContext) {
    // give worker tasks a chance to hand over their results
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (tx, rx) = oneshot::channel();
    ctx.dispatcher().dispatch(move || {
        let _ = tx.send(());
    });
    tokio::time::timeout(WAIT_LIMIT, rx)
        .await
        .expect("delivery context stalled")
        .expect("delivery context dropped the flush job");
}

/// Ordered list of observed events shared by recorders
#[derive(Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<String>>,
    changed: Notify,
}

impl EventLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
        self.changed.notify_waiters();
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) async fn wait_for(&self, event: &str) {
        self.wait_until(|events| events.iter().any(|e| e == event))
            .await
    }

    pub(crate) async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&[String]) -> bool,
    {
        let waiting = async {
            loop {
                let notified = self.changed.notified();
                if condition(&self.events.lock()) {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(WAIT_LIMIT, waiting).await.is_err() {
            panic!("condition not met, events so far: {:?}", self.events());
        }
    }
}

pub(crate) struct RecordingAccessory {
    name: String,
    log: Arc<EventLog>,
}

impl RecordingAccessory {
    pub(crate) fn new(name: &str, log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log,
        })
    }
}

impl Accessory for RecordingAccessory {
    fn will_start(&self, subject: &Subject<'_>) {
        self.log
            .push(format!("{} will_start {}", self.name, subject.kind()));
    }

    fn will_stop(&self, subject: &Subject<'_>) {
        self.log
            .push(format!("{} will_stop {}", self.name, subject.kind()));
    }

    fn did_stop(&self, subject: &Subject<'_>) {
        self.log
            .push(format!("{} did_stop {}", self.name, subject.kind()));
    }
}

/// Delegate for requests, chains and batches, identifying requests by path
pub(crate) struct RecordingDelegate {
    log: Arc<EventLog>,
}

impl RecordingDelegate {
    pub(crate) fn new(log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self { log })
    }
}

impl RequestDelegate for RecordingDelegate {
    fn request_finished(&self, request: &Arc<Request>) {
        self.log
            .push(format!("finished {}", request.descriptor().path));
    }

    fn request_failed(&self, request: &Arc<Request>) {
        self.log
            .push(format!("failed {}", request.descriptor().path));
    }
}

impl ChainDelegate for RecordingDelegate {
    fn chain_finished(&self, _chain: &Arc<ChainRequest>) {
        self.log.push("chain_finished");
    }

    fn chain_failed(&self, _chain: &Arc<ChainRequest>, failed: &Arc<Request>) {
        self.log
            .push(format!("chain_failed {}", failed.descriptor().path));
    }
}

impl BatchDelegate for RecordingDelegate {
    fn batch_finished(&self, _batch: &Arc<BatchRequest>) {
        self.log.push("batch_finished");
    }

    fn batch_failed(&self, batch: &Arc<BatchRequest>) {
        let failed = batch
            .failed_request()
            .map(|r| r.descriptor().path.clone())
            .unwrap_or_default();
        self.log.push(format!("batch_failed {failed}"));
    }
}

pub(crate) struct RecordingHooks {
    log: Arc<EventLog>,
}

impl RecordingHooks {
    pub(crate) fn new(log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self { log })
    }
}

impl ResponseHooks for RecordingHooks {
    fn complete_preprocessor(&self, _request: &Request) {
        self.log.push("complete_preprocessor");
    }

    fn complete_filter(&self, _request: &Request) {
        self.log.push("complete_filter");
    }

    fn failed_preprocessor(&self, _request: &Request) {
        self.log.push("failed_preprocessor");
    }

    fn failed_filter(&self, _request: &Request) {
        self.log.push("failed_filter");
    }
}
