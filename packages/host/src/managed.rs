//! Service host running on a dedicated, owned OS thread.
//!
//! `ManagedThreadHost` spawns one thread with a current-thread tokio runtime,
//! builds the [`ServiceHost`] on that thread, and runs a loop that:
//! 1. Runs marshaled jobs one at a time in FIFO order
//! 2. Calls `process()` on running services at the interval they request
//! 3. Exits on cancellation or on a host shutdown request
//! 4. Shuts down every service still registered before dropping the host

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use threadhost_core::ProcessResult;

use crate::config::HostConfig;
use crate::dispatch::{self, JobQueue};
use crate::error::HostError;
use crate::host::ServiceHost;
use crate::proxy::ServiceHostProxy;

// ---------------------------------------------------------------------------
// ManagedThreadRecord
// ---------------------------------------------------------------------------

/// Lifetime handle for a started managed thread.
#[derive(Debug, Clone)]
pub struct ManagedThreadRecord {
    finished: watch::Receiver<bool>,
}

impl ManagedThreadRecord {
    /// Resolves once the thread's host loop has terminated and its services
    /// have been shut down.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ThreadPanicked`] if the thread ended without
    /// completing its loop.
    pub async fn wait(mut self) -> Result<(), HostError> {
        self.finished
            .wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| HostError::ThreadPanicked)
    }

    /// Returns `true` once the host loop has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }
}

// ---------------------------------------------------------------------------
// ManagedThreadHost
// ---------------------------------------------------------------------------

/// Owns a dedicated thread running one [`ServiceHost`].
///
/// Dropping the host cancels the loop and joins the thread. Prefer
/// [`Self::shutdown`] from async code so the caller's thread is not blocked
/// while services shut down.
pub struct ManagedThreadHost {
    config: HostConfig,
    cancel: CancellationToken,
    proxy: Option<Arc<ServiceHostProxy>>,
    record: Option<ManagedThreadRecord>,
    thread: Option<JoinHandle<()>>,
}

impl ManagedThreadHost {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            proxy: None,
            record: None,
            thread: None,
        }
    }

    /// Spawns the host thread and returns once its loop is running.
    ///
    /// If `parent` is given, cancelling it also stops this host; cancelling
    /// this host never cancels `parent`.
    ///
    /// # Errors
    ///
    /// - [`HostError::AlreadyStarted`] if called twice
    /// - [`HostError::ThreadSpawn`] if the thread or its runtime cannot be created
    pub async fn start(
        &mut self,
        parent: Option<&CancellationToken>,
    ) -> Result<ManagedThreadRecord, HostError> {
        if self.thread.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        if let Some(parent) = parent {
            let linked = parent.child_token();
            if self.cancel.is_cancelled() {
                linked.cancel();
            }
            self.cancel = linked;
        }

        let (started_tx, started_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = watch::channel(false);
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        let thread = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || run_thread(config, cancel, started_tx, finished_tx))
            .map_err(|err| HostError::ThreadSpawn(err.to_string()))?;

        match started_rx.await {
            Ok(Ok(proxy)) => {
                self.proxy = Some(proxy);
                self.thread = Some(thread);
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(HostError::ThreadPanicked);
            }
        }

        let record = ManagedThreadRecord {
            finished: finished_rx,
        };
        self.record = Some(record.clone());
        tracing::info!(host = %self.config.name, "managed thread host started");
        Ok(record)
    }

    /// Proxy for the hosted [`ServiceHost`].
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotStarted`] before [`Self::start`] succeeded.
    pub fn service_host(&self) -> Result<Arc<ServiceHostProxy>, HostError> {
        self.proxy.clone().ok_or(HostError::NotStarted)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Requests cooperative shutdown of the loop. Does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.record.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Cancels the loop and waits for the thread to finish shutting down its
    /// services.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ThreadPanicked`] if the thread died abnormally.
    pub async fn shutdown(&mut self) -> Result<(), HostError> {
        self.cancel.cancel();
        let result = match self.record.take() {
            Some(record) => record.wait().await,
            None => Ok(()),
        };
        if let Some(thread) = self.thread.take() {
            // The loop has already finished, so the join is immediate.
            if thread.join().is_err() {
                return Err(HostError::ThreadPanicked);
            }
        }
        result
    }
}

impl Drop for ManagedThreadHost {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(host = %self.config.name, "managed host thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ManagedThreadHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThreadHost")
            .field("name", &self.config.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Host thread
// ---------------------------------------------------------------------------

type StartedSender = oneshot::Sender<Result<Arc<ServiceHostProxy>, HostError>>;

fn run_thread(
    config: HostConfig,
    cancel: CancellationToken,
    started: StartedSender,
    finished: watch::Sender<bool>,
) {
    let _dispatch_guard = config
        .dispatch
        .as_ref()
        .map(tracing::dispatcher::set_default);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = started.send(Err(HostError::ThreadSpawn(err.to_string())));
            return;
        }
    };

    let span = tracing::info_span!("service_host", host = %config.name);
    runtime.block_on(
        async move {
            let (dispatcher, queue) = dispatch::channel(&config.name);
            let host = Arc::new(ServiceHost::new(config.name.clone(), dispatcher.clone()));
            let proxy = Arc::new(ServiceHostProxy::new(&host, dispatcher));
            if started.send(Ok(proxy)).is_err() {
                // The starter went away; nobody can reach this host.
                return;
            }
            run_loop(&host, queue, &cancel, &config).await;
            drop(host);
        }
        .instrument(span),
    );
    finished.send_replace(true);
}

/// Delay before the next `process()` sweep.
fn next_delay(result: ProcessResult, config: &HostConfig) -> std::time::Duration {
    result.sleep_limit().unwrap_or(config.idle_process_interval)
}

async fn run_loop(host: &Arc<ServiceHost>, mut queue: JobQueue, cancel: &CancellationToken, config: &HostConfig) {
    let controller = host.shutdown_controller();
    let mut shutdown_rx = controller.shutdown_receiver();
    controller.set_running();
    tracing::debug!("host loop running");

    let mut next_process = Instant::now();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("host loop cancelled");
                break;
            }
            _ = shutdown_rx.wait_for(|requested| *requested) => {
                tracing::debug!("host loop stopping on shutdown request");
                break;
            }
            job = queue.recv() => match job {
                Some(job) => job().await,
                None => break,
            },
            () = tokio::time::sleep_until(next_process) => {
                let result = host.process_services();
                next_process = Instant::now() + next_delay(result, config);
            }
        }
    }

    // Reject new work, then drain what is already registered.
    queue.close();
    controller.request_shutdown();
    let failures = host.shutdown_all().await;
    for failure in &failures {
        tracing::error!(error = %failure, "service failed during host shutdown");
    }
    controller.set_stopped();
    tracing::info!(failures = failures.len(), "host loop finished");
    // Pending jobs are dropped with the queue, failing their callers.
    drop(queue);
}
