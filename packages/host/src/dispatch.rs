//! Job queue connecting callers on any thread to the thread that owns a host.
//!
//! A [`Dispatcher`] is the sending half: cloneable, `Send + Sync`, and cheap.
//! The owning thread holds the single [`JobQueue`] and runs jobs one at a time
//! in FIFO order. Dropping the queue drops every pending job, which in turn
//! drops their reply channels so waiting callers observe a disposed target.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

/// Unit of work marshaled onto a host thread.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Callback invoked after every post, from the posting thread.
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// WakeSignal
// ---------------------------------------------------------------------------

/// Wakes whoever drives the queue when work is posted.
#[derive(Default)]
pub(crate) struct WakeSignal {
    notify: Notify,
    callback: Mutex<Option<WakeCallback>>,
}

impl WakeSignal {
    fn wake(&self) {
        self.notify.notify_one();
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn set_callback(&self, callback: Option<WakeCallback>) {
        *self.callback.lock() = callback;
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Sending half of a host's job queue.
#[derive(Clone)]
pub struct Dispatcher {
    label: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
    signal: Arc<WakeSignal>,
}

impl Dispatcher {
    /// Queues `job` for the owning thread. Returns `false` if the queue has
    /// been closed; the job is dropped in that case.
    pub fn post(&self, job: Job) -> bool {
        if self.tx.send(job).is_err() {
            tracing::debug!(dispatcher = %self.label, "post to closed queue dropped");
            return false;
        }
        self.signal.wake();
        true
    }

    /// Returns `true` once the owning thread has stopped accepting jobs.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// Receiving half, owned by the thread that runs the jobs.
pub struct JobQueue {
    rx: mpsc::UnboundedReceiver<Job>,
    signal: Arc<WakeSignal>,
}

impl JobQueue {
    /// Waits for the next job. `None` once every dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Takes every job that is ready right now.
    pub fn drain_ready(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Stops accepting new jobs. Jobs already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub(crate) fn signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.signal)
    }
}

/// Creates a connected dispatcher and queue.
#[must_use]
pub fn channel(label: &str) -> (Dispatcher, JobQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signal = Arc::new(WakeSignal::default());
    (
        Dispatcher {
            label: Arc::from(label),
            tx,
            signal: Arc::clone(&signal),
        },
        JobQueue { rx, signal },
    )
}
