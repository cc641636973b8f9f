//! Delivery context
//!
//! All user-visible completion hooks run on one logical context: a single
//! task draining an unbounded channel, so jobs execute one at a time and in
//! the order they were queued.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use log::{debug, error, warn};
use tokio::{
    runtime::Handle,
    sync::mpsc::{unbounded_channel, UnboundedSender},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle used to enqueue work on the delivery context
#[derive(Clone)]
pub struct Dispatcher {
    sender: UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawn the delivery loop on the given runtime.
    ///
    /// The loop ends once every `Dispatcher` clone has been dropped.
    pub fn spawn(runtime: &Handle) -> Self {
        let (sender, mut receiver) = unbounded_channel::<Job>();

        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                // a panicking callback must not take the delivery loop down
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Completion callback panicked on the delivery context");
                }
            }
            debug!("Delivery context closed");
        });

        Self { sender }
    }

    /// Queue a job behind everything already queued
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            warn!("Delivery context is gone, dropping completion job");
        }
    }
}

/// Run `body`, then `after` even if `body` panicked.
///
/// A panic from either closure is re-raised once both have run, so the
/// delivery loop still reports it.
pub(crate) fn run_then<B, A>(body: B, after: A)
where
    B: FnOnce(),
    A: FnOnce(),
{
    let outcome = catch_unwind(AssertUnwindSafe(body));
    let cleanup = catch_unwind(AssertUnwindSafe(after));
    if let Err(panic) = outcome.and(cleanup) {
        resume_unwind(panic);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn test_jobs_run_in_queue_order() {
        let dispatcher = Dispatcher::spawn(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            dispatcher.dispatch(move || seen.lock().push(i));
        }

        let (tx, rx) = oneshot::channel();
        dispatcher.dispatch(move || {
            let _ = tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_loop() {
        let dispatcher = Dispatcher::spawn(&Handle::current());
        let counter = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(|| panic!("boom"));
        let c = counter.clone();
        let (tx, rx) = oneshot::channel();
        dispatcher.dispatch(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_then_cleans_up_after_panic() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = cleaned.clone();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            run_then(
                || panic!("user bug"),
                || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
            )
        }));
        assert!(result.is_err());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        run_then(|| {}, || {
            cleaned.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
    }
}
