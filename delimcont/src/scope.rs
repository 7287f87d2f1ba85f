//! # Delimited Scope Interface
//!
//! The capability a computation runs inside. A body receives a scope handle
//! and may call three operations on it:
//!
//! - [`shift`](DelimitedScope::shift): capture the rest of the computation
//!   up to the nearest enclosing boundary and hand it to a handler
//! - [`shift_cps`](DelimitedScope::shift_cps): the same, but the caller is
//!   never resumed; the handler receives a continuation that starts a fresh
//!   scope running an explicit tail
//! - [`reset`](DelimitedScope::reset): establish a new boundary
//!
//! Three runloops implement this interface: [`DelimContScope`] (single
//! shot), [`MultiShotDelimContScope`] (record and replay) and
//! [`NestedDelimContScope`] (parent delegation).
//!
//! [`DelimContScope`]: crate::DelimContScope
//! [`MultiShotDelimContScope`]: crate::MultiShotDelimContScope
//! [`NestedDelimContScope`]: crate::NestedDelimContScope

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::continuation::Continuation;
use crate::error::ScopeResult;
use crate::task::LocalBoxFuture;

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Create a new scope ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.0)
    }
}

/// Global scope ID counter.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique scope ID.
pub(crate) fn next_scope_id() -> ScopeId {
    ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Operations available to a computation running inside a scope whose
/// result type is `R`.
///
/// Handles are cheap to clone; clone one into a handler to shift again
/// from inside it.
pub trait DelimitedScope<R: 'static>: Clone + 'static {
    /// Scope type created by [`reset`](Self::reset) and by CPS tails.
    type Child<B: 'static>: DelimitedScope<B>;

    /// Capture the rest of the computation as a continuation and run
    /// `handler` with it. The handler's value becomes the value of the
    /// enclosing boundary; the awaited value is whatever the continuation is
    /// invoked with.
    fn shift<A, F, Fut>(&self, handler: F) -> LocalBoxFuture<A>
    where
        A: Clone + 'static,
        F: FnOnce(Continuation<A, R>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static;

    /// Suspend forever, running `handler` with a continuation that starts a
    /// fresh scope executing `tail`.
    ///
    /// The returned future never completes: match on its uninhabited output.
    fn shift_cps<A, B, F, Fut, C, CFut>(&self, handler: F, tail: C) -> LocalBoxFuture<Infallible>
    where
        A: Clone + 'static,
        B: 'static,
        F: FnOnce(Continuation<A, B>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        C: Fn(Self::Child<B>, A) -> CFut + 'static,
        CFut: Future<Output = B> + 'static;

    /// Run `body` inside a new boundary and yield its result.
    fn reset<B, F, Fut>(&self, body: F) -> LocalBoxFuture<B>
    where
        B: 'static,
        F: Fn(Self::Child<B>) -> Fut + 'static,
        Fut: Future<Output = B> + 'static;
}

/// A scope that can be driven to completion.
pub trait RunnableDelimitedScope<R> {
    /// Identity of the scope.
    fn id(&self) -> ScopeId;

    /// Run the body and every captured continuation, returning the final
    /// result or the contract violation that stopped the runloop.
    fn try_invoke(self) -> ScopeResult<R>;

    /// Run the scope to completion.
    ///
    /// # Panics
    /// Panics with the [`ScopeError`](crate::ScopeError) message on a contract violation.
    fn invoke(self) -> R
    where
        Self: Sized,
    {
        match self.try_invoke() {
            Ok(value) => value,
            Err(err) => crate::error::fatal(err),
        }
    }
}

/// Convenience for matching an uninhabited value.
pub fn absurd<T>(never: Infallible) -> T {
    match never {}
}

impl From<ScopeId> for u64 {
    fn from(id: ScopeId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id_generation() {
        let a = next_scope_id();
        let b = next_scope_id();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_scope_id_display() {
        assert_eq!(ScopeId::new(12).to_string(), "Scope(12)");
        assert_eq!(u64::from(ScopeId::new(12)), 12);
    }
}
