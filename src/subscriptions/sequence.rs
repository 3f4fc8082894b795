//! Seams shared by every subscription sequence.

use crate::error::Result;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Early-termination entry point of an asynchronous sequence.
///
/// Must be idempotent: terminating twice is a no-op.
pub trait Terminate {
    fn terminate(&mut self);
}

impl<S: Terminate + ?Sized> Terminate for Box<S> {
    fn terminate(&mut self) {
        (**self).terminate()
    }
}

/// A pull-based stream of protocol-shaped payloads that can be closed early.
pub trait Sequence: Stream<Item = Result<Value>> + Terminate + Send + Unpin {
    /// A detached handle that closes this sequence from outside.
    fn closer(&self) -> Closer;
}

/// Cloneable handle closing a sequence without owning it.
#[derive(Clone)]
pub struct Closer(Arc<dyn Fn() + Send + Sync>);

impl Closer {
    pub fn new<F>(close: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Closer(Arc::new(close))
    }

    pub fn close(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closer")
    }
}
