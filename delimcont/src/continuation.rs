//! # Delimited Continuations
//!
//! A continuation is "the rest of the computation up to the nearest
//! enclosing boundary", packaged as a value that can be invoked with the
//! result of the `shift` that captured it. Invoking one yields the final
//! result of the boundary.
//!
//! ## Variants
//!
//! 1. **Captured continuations** wrap a suspended computation. Invoking one
//!    registers the caller to be resumed with the scope's final result and
//!    then resumes the captured computation. The single-shot runloops allow
//!    one invocation; the multi-shot runloop replays the whole body for
//!    every invocation after the first.
//!
//! 2. **CPS continuations** wrap a plain function. Invoking one starts a
//!    brand-new scope running that function, so there is nothing to resume.
//!    They are produced by `shift_cps`.
//!
//! Invocation is lazy: nothing happens until the returned future is polled
//! from inside a running scope. Invocations must be awaited one at a time.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::LocalBoxFuture;

/// Unique identifier for a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationId(u64);

impl ContinuationId {
    /// Create a new continuation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContinuationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cont({})", self.0)
    }
}

/// Global continuation ID counter.
static NEXT_CONTINUATION_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique continuation ID.
pub(crate) fn next_continuation_id() -> ContinuationId {
    ContinuationId(NEXT_CONTINUATION_ID.fetch_add(1, Ordering::Relaxed))
}

/// A resumable computation `A -> R`.
pub trait DelimitedContinuation<A, R> {
    /// Resume the rest of the computation with `a`, yielding the final
    /// result of the boundary.
    fn invoke(&self, a: A) -> LocalBoxFuture<R>;
}

/// Handle to a continuation, as passed to `shift` handlers.
pub struct Continuation<A, R> {
    /// Unique identifier.
    id: ContinuationId,
    /// Variant-specific implementation.
    inner: Rc<dyn DelimitedContinuation<A, R>>,
}

impl<A, R> Continuation<A, R> {
    /// Wrap an implementation under a fresh ID.
    pub fn new(inner: impl DelimitedContinuation<A, R> + 'static) -> Self {
        Self::with_id(next_continuation_id(), inner)
    }

    /// Wrap an implementation under an ID allocated by the caller.
    pub(crate) fn with_id(id: ContinuationId, inner: impl DelimitedContinuation<A, R> + 'static) -> Self {
        Self {
            id,
            inner: Rc::new(inner),
        }
    }

    /// Get the continuation ID.
    pub fn id(&self) -> ContinuationId {
        self.id
    }

    /// Resume the rest of the computation with `a`.
    ///
    /// # Panics
    /// The returned future panics when polled outside a running scope, and
    /// single-shot continuations panic on a second invocation.
    pub fn invoke(&self, a: A) -> LocalBoxFuture<R> {
        self.inner.invoke(a)
    }
}

impl<A, R> DelimitedContinuation<A, R> for Continuation<A, R> {
    fn invoke(&self, a: A) -> LocalBoxFuture<R> {
        self.inner.invoke(a)
    }
}

impl<A, R> Clone for Continuation<A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A, R> fmt::Debug for Continuation<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").field("id", &self.id).finish()
    }
}

/// Continuation that starts a fresh scope on every invocation.
pub(crate) struct CpsCont<A, B> {
    launch: Rc<dyn Fn(A) -> B>,
}

impl<A: 'static, B: 'static> CpsCont<A, B> {
    /// `launch` builds and drives the fresh scope for one argument.
    pub(crate) fn new(launch: impl Fn(A) -> B + 'static) -> Self {
        Self {
            launch: Rc::new(launch),
        }
    }
}

impl<A: 'static, B: 'static> DelimitedContinuation<A, B> for CpsCont<A, B> {
    fn invoke(&self, a: A) -> LocalBoxFuture<B> {
        let launch = Rc::clone(&self.launch);
        Box::pin(async move { launch(a) })
    }
}
