//! Exactly-once release for sequences and pending sequences.
//!
//! A release callback attached with [`attach_disposal`] or
//! [`attach_disposal_deferred`] runs exactly once, whichever way the
//! subscription ends:
//!
//! | Path                                   | Fired by                       |
//! |----------------------------------------|--------------------------------|
//! | sequence exhausted                     | `Disposable::poll_next`        |
//! | mid-stream error                       | `Disposable::poll_next`        |
//! | external cancellation                  | `Disposable::terminate`        |
//! | consumer dropped the sequence          | `Drop for Disposable`          |
//! | pending sequence rejected              | `DisposableFuture::poll`       |
//! | pending sequence dropped unresolved    | `Drop for DisposableFuture`    |
//!
//! The release always runs before the completion is observable.

use crate::error::{RelayError, Result};
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

use super::sequence::Terminate;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// One-shot release callback. Clones share the same shot.
#[derive(Clone)]
pub struct Release {
    callback: Arc<Mutex<Option<ReleaseFn>>>,
}

impl Release {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Arc::new(Mutex::new(Some(Box::new(release)))),
        }
    }

    /// Run the callback if nobody has yet. Returns true for the call that ran it.
    pub fn fire(&self) -> bool {
        // Taken under the lock, run outside it so the callback may re-enter.
        let callback = self.callback.lock().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.callback.lock().is_none()
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// A sequence whose completion, by any path, fires its release once.
pub struct Disposable<S: Terminate> {
    inner: S,
    release: Release,
    finished: bool,
}

impl<S: Terminate> Disposable<S> {
    pub fn new(inner: S, release: Release) -> Self {
        Self {
            inner,
            release,
            finished: false,
        }
    }

    /// External cancellation: release first, then terminate the inner sequence.
    pub fn close(&mut self) {
        self.terminate();
    }

    pub fn is_released(&self) -> bool {
        self.release.has_fired()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, T> Stream for Disposable<S>
where
    S: Stream<Item = Result<T>> + Terminate + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(e))) => {
                // Terminal: release before the error is observable.
                this.finished = true;
                this.release.fire();
                this.inner.terminate();
                debug!(error = %e, "Sequence failed mid-stream");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                this.release.fire();
                Poll::Ready(None)
            }
        }
    }
}

impl<S: Terminate> Terminate for Disposable<S> {
    fn terminate(&mut self) {
        self.finished = true;
        self.release.fire();
        self.inner.terminate();
    }
}

impl<S: Terminate> Drop for Disposable<S> {
    fn drop(&mut self) {
        if self.release.fire() {
            debug!("Sequence released on drop");
        }
        self.inner.terminate();
    }
}

/// A pending sequence whose rejection or abandonment fires its release once.
///
/// On success it resolves to a [`Disposable`] sharing the same release.
pub struct DisposableFuture<F> {
    pending: F,
    release: Option<Release>,
}

impl<F, S> Future for DisposableFuture<F>
where
    F: Future<Output = Result<S>> + Unpin,
    S: Terminate,
{
    type Output = Result<Disposable<S>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.release.is_none() {
            return Poll::Ready(Err(RelayError::AlreadyResolved));
        }

        let outcome = match this.pending.poll_unpin(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };
        let Some(release) = this.release.take() else {
            return Poll::Ready(Err(RelayError::AlreadyResolved));
        };
        // From here on the release belongs to the resolved sequence (or is spent).

        match outcome {
            Ok(sequence) => Poll::Ready(Ok(Disposable::new(sequence, release))),
            Err(e) => {
                release.fire();
                debug!(error = %e, "Pending sequence rejected");
                Poll::Ready(Err(e))
            }
        }
    }
}

impl<F> Drop for DisposableFuture<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if release.fire() {
                debug!("Pending sequence released before resolving");
            }
        }
    }
}

/// Attach `release` to a sequence.
pub fn attach_disposal<S, R>(sequence: S, release: R) -> Disposable<S>
where
    S: Terminate,
    R: FnOnce() + Send + 'static,
{
    Disposable::new(sequence, Release::new(release))
}

/// Attach `release` to a pending sequence.
pub fn attach_disposal_deferred<F, R>(pending: F, release: R) -> DisposableFuture<F>
where
    R: FnOnce() + Send + 'static,
{
    DisposableFuture {
        pending,
        release: Some(Release::new(release)),
    }
}

/// Convenience for driving a [`Disposable`] from inherent code.
impl<S, T> Disposable<S>
where
    S: Stream<Item = Result<T>> + Terminate + Unpin,
{
    pub async fn next(&mut self) -> Option<Result<T>> {
        StreamExt::next(self).await
    }
}
