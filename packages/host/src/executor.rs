//! Lifetime-checked access to an object owned by another thread.

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::dispatch::Dispatcher;
use crate::error::HostError;

/// Pairs the dispatcher of a target's owning thread with a weak reference to
/// the target.
///
/// The context never keeps the target alive. Every call upgrades the weak
/// reference on the owning thread, right before running, so a target that
/// has been destroyed in the meantime turns the call into
/// [`HostError::TargetDisposed`] instead of a use-after-free.
pub struct ExecutorContext<T: ?Sized> {
    dispatcher: Dispatcher,
    target: Weak<T>,
}

impl<T: ?Sized + Send + Sync + 'static> ExecutorContext<T> {
    #[must_use]
    pub fn new(target: &Arc<T>, dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            target: Arc::downgrade(target),
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Strong reference to the target, if it is still alive. Only the owning
    /// thread may use the target directly; other threads should go through
    /// [`Self::invoke`].
    #[must_use]
    pub fn try_lock(&self) -> Option<Arc<T>> {
        self.target.upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Runs `f` against the target on its owning thread and returns the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::TargetDisposed`] if the queue is closed, the
    /// target has been destroyed by the time the job runs, or the job is
    /// dropped before it completes.
    pub async fn invoke<R, F>(&self, f: F) -> Result<R, HostError>
    where
        R: Send + 'static,
        F: FnOnce(Arc<T>) -> BoxFuture<'static, R> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let target = self.target.clone();
        let posted = self.dispatcher.post(Box::new(move || {
            async move {
                // Dropping `reply_tx` unsent reports the disposed target.
                let Some(target) = target.upgrade() else {
                    return;
                };
                let result = f(target).await;
                let _ = reply_tx.send(result);
            }
            .boxed()
        }));
        if !posted {
            return Err(HostError::TargetDisposed);
        }
        reply_rx.await.map_err(|_| HostError::TargetDisposed)
    }

    /// Like [`Self::invoke`], mapping every failure to `None`.
    pub async fn try_invoke<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(Arc<T>) -> BoxFuture<'static, R> + Send + 'static,
    {
        self.invoke(f).await.ok()
    }

    /// Queues `f` without waiting for it. Returns `false` only if the queue is
    /// closed. If the target is gone when the job runs, `f` is dropped
    /// without being called.
    pub fn try_post<F>(&self, f: F) -> bool
    where
        F: FnOnce(Arc<T>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let target = self.target.clone();
        self.dispatcher.post(Box::new(move || {
            async move {
                if let Some(target) = target.upgrade() {
                    f(target).await;
                }
            }
            .boxed()
        }))
    }
}

impl<T: ?Sized> Clone for ExecutorContext<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            target: self.target.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ExecutorContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("dispatcher", &self.dispatcher)
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}
