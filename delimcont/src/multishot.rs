//! # Multi-Shot Runloop
//!
//! [`MultiShotDelimContScope`] emulates continuations that can be invoked
//! any number of times on top of the single-shot machinery.
//!
//! ## Record and replay
//!
//! The scope records every value passed to one of its continuations, in
//! invocation order. A continuation remembers how many values were recorded
//! when it was captured (its offset).
//!
//! - The first invocation records its argument and resumes the captured
//!   computation, exactly like a single-shot continuation.
//! - Every later invocation starts a **replay**: a new scope running the
//!   original body from the start, prefilled with the first `offset`
//!   recorded values followed by the new argument. While a replaying scope
//!   has prefilled values left, `shift` returns the next one immediately
//!   without running its handler.
//!
//! ## Limitations
//!
//! Replays re-execute the body, so any side effect performed outside of a
//! `shift` before the reused continuation's capture point happens again.
//! The recording only grows. Nested `reset` starts an independent
//! multi-shot scope that knows nothing about its parent.
//!
//! Bodies must be `Fn` because a replay calls them again.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use tracing::{trace, trace_span};

use crate::config::{self, ScopeConfig};
use crate::continuation::{next_continuation_id, Continuation, DelimitedContinuation};
use crate::error::{fatal, ScopeError, ScopeResult};
use crate::runloop::{Drive, ResumeTarget, ScopeCore};
use crate::scope::{DelimitedScope, RunnableDelimitedScope, ScopeId};
use crate::task::LocalBoxFuture;

type Body<R> = Rc<dyn Fn(MultiShotDelimContScope<R>) -> LocalBoxFuture<R>>;

/// Values passed to a scope's continuations, in invocation order.
struct Recording {
    scope: ScopeId,
    limit: Option<usize>,
    values: RefCell<Vec<Rc<dyn Any>>>,
}

impl Recording {
    fn len(&self) -> usize {
        self.values.borrow().len()
    }

    fn push(&self, value: Rc<dyn Any>) {
        let mut values = self.values.borrow_mut();
        if let Some(limit) = self.limit {
            if values.len() >= limit {
                fatal(ScopeError::ReplayStackExhausted {
                    scope: self.scope,
                    limit,
                });
            }
        }
        values.push(value);
    }

    /// The value recorded at `depth`, as the type the replaying shift expects.
    fn replayed<A: Clone + 'static>(&self, depth: usize) -> A {
        let values = self.values.borrow();
        match values.get(depth).and_then(|value| (**value).downcast_ref::<A>()) {
            Some(value) => value.clone(),
            None => fatal(ScopeError::ReplayDiverged {
                scope: self.scope,
                depth,
            }),
        }
    }

    /// The first `offset` values followed by `next`.
    fn prefix(&self, offset: usize, next: Rc<dyn Any>) -> Vec<Rc<dyn Any>> {
        let values = self.values.borrow();
        let mut prefix = values[..offset.min(values.len())].to_vec();
        prefix.push(next);
        prefix
    }
}

struct MultiInner<R> {
    core: Rc<ScopeCore<R>>,
    body: Body<R>,
    recording: Rc<Recording>,
    /// Number of shifts that have produced a value so far.
    depth: Cell<usize>,
    started: Cell<bool>,
    replay: bool,
}

/// Multi-shot delimited-continuation scope.
pub struct MultiShotDelimContScope<R> {
    inner: Rc<MultiInner<R>>,
}

/// A multi-shot scope replaying its body from a prefilled recording.
///
/// Created internally when a continuation is invoked for the second time;
/// bodies can tell they are being replayed through
/// [`is_replay`](MultiShotDelimContScope::is_replay).
pub type PrefilledDelimContScope<R> = MultiShotDelimContScope<R>;

impl<R: 'static> MultiShotDelimContScope<R> {
    /// Create a scope for `body` using the process-wide configuration.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: Fn(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        Self::with_config(config::scope_config(), body)
    }

    /// Create a scope for `body` with an explicit configuration.
    pub fn with_config<F, Fut>(config: ScopeConfig, body: F) -> Self
    where
        F: Fn(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let body: Body<R> = Rc::new(move |scope| Box::pin(body(scope)) as LocalBoxFuture<R>);
        Self::from_parts(config, body, Vec::new(), false)
    }

    fn from_parts(config: ScopeConfig, body: Body<R>, prefill: Vec<Rc<dyn Any>>, replay: bool) -> Self {
        let core = ScopeCore::new(config, config.strict_ownership);
        let recording = Rc::new(Recording {
            scope: core.id(),
            limit: config.replay_stack_limit,
            values: RefCell::new(prefill),
        });
        Self {
            inner: Rc::new(MultiInner {
                core,
                body,
                recording,
                depth: Cell::new(0),
                started: Cell::new(false),
                replay,
            }),
        }
    }

    /// Whether this scope is a replay started by a reused continuation.
    pub fn is_replay(&self) -> bool {
        self.inner.replay
    }

    /// Number of continuation arguments recorded so far, prefilled values
    /// included.
    pub fn recorded_values(&self) -> usize {
        self.inner.recording.len()
    }

    /// Number of shifts that have produced a value so far.
    pub fn replay_depth(&self) -> usize {
        self.inner.depth.get()
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

impl<R> Clone for MultiShotDelimContScope<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: 'static> fmt::Debug for MultiShotDelimContScope<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiShotDelimContScope")
            .field("id", &self.inner.core.id())
            .field("replay", &self.inner.replay)
            .field("recorded", &self.inner.recording.len())
            .field("depth", &self.inner.depth.get())
            .finish()
    }
}

impl<R: 'static> DelimitedScope<R> for MultiShotDelimContScope<R> {
    type Child<B: 'static> = MultiShotDelimContScope<B>;

    fn shift<A, F, Fut>(&self, handler: F) -> LocalBoxFuture<A>
    where
        A: Clone + 'static,
        F: FnOnce(Continuation<A, R>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let inner = &self.inner;
        let scope = inner.core.id();
        let depth = inner.depth.get();
        if depth < inner.recording.len() {
            let value = inner.recording.replayed::<A>(depth);
            inner.depth.set(depth + 1);
            trace!(scope = %scope, depth, "shift answered from recording");
            return Box::pin(std::future::ready(value));
        }

        let core = Rc::downgrade(&inner.core);
        let recording = Rc::clone(&inner.recording);
        let body = Rc::clone(&inner.body);
        let config = inner.core.config();
        let suspended = inner.core.suspend_with::<A>(Box::new(move |target, slot| {
            let id = next_continuation_id();
            let offset = recording.len();
            trace!(scope = %scope, continuation = %id, offset, "shift published");
            let k = Continuation::with_id(
                id,
                MultiShotCont {
                    resume: ResumeTarget {
                        id,
                        scope,
                        core,
                        target,
                        slot,
                        strict: config.strict_ownership,
                    },
                    used: Cell::new(false),
                    recording,
                    offset,
                    body,
                    config,
                },
            );
            Box::pin(async move { handler(k).await })
        }));

        let owner: Weak<MultiInner<R>> = Rc::downgrade(inner);
        Box::pin(async move {
            let value = suspended.await;
            if let Some(inner) = owner.upgrade() {
                inner.depth.set(inner.depth.get() + 1);
            }
            value
        })
    }

    fn shift_cps<A, B, F, Fut, C, CFut>(&self, handler: F, tail: C) -> LocalBoxFuture<Infallible>
    where
        A: Clone + 'static,
        B: 'static,
        F: FnOnce(Continuation<A, B>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        C: Fn(MultiShotDelimContScope<B>, A) -> CFut + 'static,
        CFut: Future<Output = B> + 'static,
    {
        let config = self.config();
        let tail = Rc::new(tail);
        self.inner.core.shift_cps_with(handler, move |a: A| {
            let tail = Rc::clone(&tail);
            MultiShotDelimContScope::with_config(config, move |scope| (*tail)(scope, a.clone())).invoke()
        })
    }

    fn reset<B, F, Fut>(&self, body: F) -> LocalBoxFuture<B>
    where
        B: 'static,
        F: Fn(MultiShotDelimContScope<B>) -> Fut + 'static,
        Fut: Future<Output = B> + 'static,
    {
        let config = self.config();
        Box::pin(async move { MultiShotDelimContScope::with_config(config, body).invoke() })
    }
}

impl<R: 'static> RunnableDelimitedScope<R> for MultiShotDelimContScope<R> {
    fn id(&self) -> ScopeId {
        self.inner.core.id()
    }

    fn try_invoke(self) -> ScopeResult<R> {
        let core = Rc::clone(&self.inner.core);
        let scope = core.id();
        if self.inner.started.replace(true) {
            return Err(ScopeError::AlreadyStarted { scope });
        }

        let kind = if self.inner.replay { "replay" } else { "multi-shot" };
        let span = trace_span!("scope", id = %scope, kind);
        let _entered = span.enter();

        let body = Rc::clone(&self.inner.body);
        core.start(body(self));
        match core.drive(|| Err(ScopeError::NoPendingWork { scope }))? {
            Drive::Finished(value) => Ok(value),
            Drive::Parked => Err(ScopeError::NoPendingWork { scope }),
        }
    }
}

/// Continuation that replays its scope's body when invoked again.
struct MultiShotCont<A, R> {
    resume: ResumeTarget<A, R>,
    used: Cell<bool>,
    recording: Rc<Recording>,
    offset: usize,
    body: Body<R>,
    config: ScopeConfig,
}

impl<A: Clone + 'static, R: 'static> DelimitedContinuation<A, R> for MultiShotCont<A, R> {
    fn invoke(&self, a: A) -> LocalBoxFuture<R> {
        if !self.used.replace(true) {
            let recording = Rc::clone(&self.recording);
            let resume = self.resume.resume_with(a.clone());
            return Box::pin(async move {
                recording.push(Rc::new(a));
                resume.await
            });
        }

        let continuation = self.resume.id;
        let prefill = self.recording.prefix(self.offset, Rc::new(a));
        let body = Rc::clone(&self.body);
        let config = self.config;
        Box::pin(async move {
            trace!(continuation = %continuation, prefilled = prefill.len(), "replaying body");
            PrefilledDelimContScope::from_parts(config, body, prefill, true).invoke()
        })
    }
}
