//! Host run-state controller with a shutdown request signal.
//!
//! Uses `ArcSwap` for lock-free state transitions and a `watch` channel so the
//! host loop can select on the shutdown request alongside its job queue.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Host run state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Host exists but its loop has not started yet.
    Starting,
    /// Host loop is running jobs and processing services.
    Running,
    /// Shutdown was requested; remaining services are being shut down.
    Draining,
    /// Every service has been shut down.
    Stopped,
}

/// Coordinates shutdown of one service host.
///
/// 1. The host loop calls `set_running()` once it starts
/// 2. Services quitting, proxies, or the owner call `request_shutdown()`
/// 3. The loop observes `shutdown_receiver()` and drains its services
/// 4. `set_stopped()` marks the end of the drain
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    state: ArcSwap<HostState>,
}

impl ShutdownController {
    /// Creates a new controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            state: ArcSwap::from_pointee(HostState::Starting),
        }
    }

    /// Transitions to `Running` unless shutdown was already requested.
    pub fn set_running(&self) {
        if self.state() == HostState::Starting {
            self.state.store(Arc::new(HostState::Running));
        }
    }

    /// Returns a receiver that flips to `true` when shutdown is requested.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Requests shutdown. Returns `false` if it had already been requested.
    pub fn request_shutdown(&self) -> bool {
        // send_replace stores the flag even when no receiver is subscribed
        if self.shutdown_signal.send_replace(true) {
            return false;
        }
        if self.state() != HostState::Stopped {
            self.state.store(Arc::new(HostState::Draining));
        }
        true
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Marks the drain as complete.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(HostState::Stopped));
    }

    #[must_use]
    pub fn state(&self) -> HostState {
        **self.state.load()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
