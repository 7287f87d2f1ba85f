//! # Single-Shot Runloop
//!
//! [`DelimContScope`] runs a body whose captured continuations may each be
//! invoked at most once. Nested [`reset`](DelimitedScope::reset) starts an
//! independent scope; shifting on an enclosing scope from inside it is a
//! contract violation (see [`NestedDelimContScope`] for that).
//!
//! ## Example
//!
//! ```rust
//! use delimcont::{DelimContScope, DelimitedScope, RunnableDelimitedScope};
//!
//! let value = DelimContScope::new(|scope: DelimContScope<i32>| async move {
//!     let x: i32 = scope.shift(|k| async move { k.invoke(1).await + 10 }).await;
//!     x * 2
//! })
//! .invoke();
//! assert_eq!(value, 12);
//! ```
//!
//! [`NestedDelimContScope`]: crate::NestedDelimContScope

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use tracing::trace_span;

use crate::config::{self, ScopeConfig};
use crate::continuation::Continuation;
use crate::error::{ScopeError, ScopeResult};
use crate::runloop::{Drive, ScopeCore};
use crate::scope::{DelimitedScope, RunnableDelimitedScope, ScopeId};
use crate::task::LocalBoxFuture;

type Body<R> = Box<dyn FnOnce(DelimContScope<R>) -> LocalBoxFuture<R>>;

struct SingleInner<R> {
    core: Rc<ScopeCore<R>>,
    body: RefCell<Option<Body<R>>>,
}

/// Single-shot delimited-continuation scope.
///
/// The handle is shared by the body and any handlers that clone it.
pub struct DelimContScope<R> {
    inner: Rc<SingleInner<R>>,
}

impl<R: 'static> DelimContScope<R> {
    /// Create a scope for `body` using the process-wide configuration.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        Self::with_config(config::scope_config(), body)
    }

    /// Create a scope for `body` with an explicit configuration.
    pub fn with_config<F, Fut>(config: ScopeConfig, body: F) -> Self
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let body: Body<R> = Box::new(move |scope| Box::pin(body(scope)) as LocalBoxFuture<R>);
        Self {
            inner: Rc::new(SingleInner {
                core: ScopeCore::new(config, config.strict_ownership),
                body: RefCell::new(Some(body)),
            }),
        }
    }

    /// Trampoline steps taken so far.
    pub fn steps(&self) -> u64 {
        self.inner.core.steps()
    }

    /// Configuration snapshot this scope runs with.
    pub fn config(&self) -> ScopeConfig {
        self.inner.core.config()
    }
}

impl<R> Clone for DelimContScope<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: 'static> fmt::Debug for DelimContScope<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelimContScope")
            .field("id", &self.inner.core.id())
            .field("steps", &self.inner.core.steps())
            .finish()
    }
}

impl<R: 'static> DelimitedScope<R> for DelimContScope<R> {
    type Child<B: 'static> = DelimContScope<B>;

    fn shift<A, F, Fut>(&self, handler: F) -> LocalBoxFuture<A>
    where
        A: Clone + 'static,
        F: FnOnce(Continuation<A, R>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        self.inner.core.shift_once(handler)
    }

    fn shift_cps<A, B, F, Fut, C, CFut>(&self, handler: F, tail: C) -> LocalBoxFuture<Infallible>
    where
        A: Clone + 'static,
        B: 'static,
        F: FnOnce(Continuation<A, B>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        C: Fn(DelimContScope<B>, A) -> CFut + 'static,
        CFut: Future<Output = B> + 'static,
    {
        let config = self.config();
        let tail = Rc::new(tail);
        self.inner.core.shift_cps_with(handler, move |a: A| {
            let tail = Rc::clone(&tail);
            DelimContScope::with_config(config, move |scope| (*tail)(scope, a)).invoke()
        })
    }

    fn reset<B, F, Fut>(&self, body: F) -> LocalBoxFuture<B>
    where
        B: 'static,
        F: Fn(DelimContScope<B>) -> Fut + 'static,
        Fut: Future<Output = B> + 'static,
    {
        let config = self.config();
        Box::pin(async move { DelimContScope::with_config(config, body).invoke() })
    }
}

impl<R: 'static> RunnableDelimitedScope<R> for DelimContScope<R> {
    fn id(&self) -> ScopeId {
        self.inner.core.id()
    }

    fn try_invoke(self) -> ScopeResult<R> {
        let core = Rc::clone(&self.inner.core);
        let scope = core.id();
        let body = self
            .inner
            .body
            .borrow_mut()
            .take()
            .ok_or(ScopeError::AlreadyStarted { scope })?;

        let span = trace_span!("scope", id = %scope, kind = "single");
        let _entered = span.enter();

        core.start(body(self));
        match core.drive(|| Err(ScopeError::NoPendingWork { scope }))? {
            Drive::Finished(value) => Ok(value),
            Drive::Parked => Err(ScopeError::NoPendingWork { scope }),
        }
    }
}
