//! Result handle for calls made through the retry engine

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::error::{EngineError, EngineResult};
use super::ports::ScheduleError;

/// Pending outcome of a call made through the retry engine.
///
/// Await it from async code, or call [`wait_blocking`](Self::wait_blocking)
/// from a plain thread. Dropping the handle cancels the call: any retry not
/// yet started resolves as cancelled without invoking the operation.
#[must_use = "dropping a RetryHandle cancels pending retries"]
pub struct RetryHandle<T, E> {
    name: Arc<str>,
    receiver: oneshot::Receiver<EngineResult<T, E>>,
    cancellation: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl<T, E> RetryHandle<T, E> {
    pub(crate) fn new(
        name: Arc<str>,
        receiver: oneshot::Receiver<EngineResult<T, E>>,
        cancellation: CancellationToken,
    ) -> Self {
        let guard = cancellation.clone().drop_guard();
        Self { name, receiver, cancellation, _cancel_on_drop: guard }
    }

    /// Operation name this handle tracks.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop retrying; a retry already running is allowed to finish.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Token cancelled by [`cancel`](Self::cancel) or by dropping the handle.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Take the outcome if the call has already resolved.
    ///
    /// Returns `None` while attempts are still pending. Once this returns
    /// `Some`, the handle is spent.
    pub fn try_result(&mut self) -> Option<EngineResult<T, E>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(lost(&self.name))),
        }
    }

    /// Block the current thread until the call resolves.
    ///
    /// Panics if called from within an async runtime; await the handle there.
    pub fn wait_blocking(self) -> EngineResult<T, E> {
        let Self { name, receiver, cancellation: _, _cancel_on_drop: guard } = self;
        let outcome = match receiver.blocking_recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(lost(&name)),
        };
        drop(guard);
        outcome
    }
}

// Every engine path settles the sender before releasing it, so this only
// covers a sender lost while a drop guard itself was unwinding.
fn lost<E>(name: &str) -> EngineError<E> {
    EngineError::Scheduling { name: name.to_string(), attempts: 0, source: ScheduleError::ShutDown }
}

impl<T, E> Future for RetryHandle<T, E> {
    type Output = EngineResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(lost(&this.name))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for RetryHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("name", &self.name)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}
