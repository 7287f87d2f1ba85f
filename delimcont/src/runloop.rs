//! # Trampoline Runloop
//!
//! State and driving loop shared by every scope variant.
//!
//! ## Scope state
//!
//! - `result`: written whenever one of the scope's computations (the body or
//!   a handler) completes
//! - `next_shift`: at most one handler invocation waiting to be trampolined
//! - `resumptions`: callers of captured continuations, in invocation order,
//!   waiting for the scope's result
//!
//! `next_shift` and `result` are never both populated: a shift can only be
//! published by a computation that is still running, and once a result
//! exists no further trampoline step is taken.
//!
//! ## Driving
//!
//! [`ScopeCore::drive`] alternates two phases until nothing is left:
//!
//! 1. while there is no result, run the pending handler (or ask the
//!    variant what to do when there is none)
//! 2. pop the most recent resumption and resume that caller with the
//!    result; it may complete (producing the next result), invoke another
//!    continuation, or shift again
//!
//! Resumptions are therefore delivered in reverse registration order, and
//! every handler's "rest of the computation after invoking `k`" runs exactly
//! once with the value produced by the computations inside it.
//!
//! Handlers run from the loop, never from inside the computation that
//! shifted, so native stack depth stays constant no matter how many shifts
//! a body performs.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tracing::{debug, trace};

use crate::config::ScopeConfig;
use crate::continuation::{next_continuation_id, Continuation, ContinuationId, CpsCont, DelimitedContinuation};
use crate::error::{fatal, ScopeError, ScopeResult};
use crate::scope::{next_scope_id, ScopeId};
use crate::task::{self, LocalBoxFuture, Resumable};

/// Single-value hand-off cell between a resumer and a suspended computation.
pub(crate) type Slot<T> = Rc<Cell<Option<T>>>;

pub(crate) fn slot<T>() -> Slot<T> {
    Rc::new(Cell::new(None))
}

/// Builds the handler invocation for a shift once the suspended computation
/// and its resume slot are known.
pub(crate) type Capture<A, R> = Box<dyn FnOnce(Rc<dyn Resumable>, Slot<A>) -> LocalBoxFuture<R>>;

/// What a variant decided to do when its scope has neither work nor result.
pub(crate) enum Idle {
    /// Some work ran elsewhere; look again.
    Progressed,
    /// The scope can never finish; suspend its driver forever.
    Park,
}

/// Outcome of driving a scope.
pub(crate) enum Drive<R> {
    Finished(R),
    Parked,
}

/// A caller waiting for the scope's result.
struct Resumption<R> {
    caller: Rc<dyn Resumable>,
    reply: Slot<R>,
}

/// State shared by all variants.
pub(crate) struct ScopeCore<R> {
    id: ScopeId,
    config: ScopeConfig,
    /// Whether shifts and continuations must come from this scope's own
    /// computations.
    strict: bool,
    result: RefCell<Option<R>>,
    next_shift: RefCell<Option<LocalBoxFuture<R>>>,
    resumptions: RefCell<Vec<Resumption<R>>>,
    steps: Cell<u64>,
}

impl<R: 'static> ScopeCore<R> {
    pub(crate) fn new(config: ScopeConfig, strict: bool) -> Rc<Self> {
        Rc::new(Self {
            id: next_scope_id(),
            config,
            strict,
            result: RefCell::new(None),
            next_shift: RefCell::new(None),
            resumptions: RefCell::new(Vec::new()),
            steps: Cell::new(0),
        })
    }

    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    pub(crate) fn config(&self) -> ScopeConfig {
        self.config
    }

    pub(crate) fn has_result(&self) -> bool {
        self.result.borrow().is_some()
    }

    pub(crate) fn has_work(&self) -> bool {
        self.next_shift.borrow().is_some()
    }

    /// Number of trampoline steps taken so far.
    pub(crate) fn steps(&self) -> u64 {
        self.steps.get()
    }

    /// Record the value of a completed computation.
    fn complete(&self, value: R) {
        *self.result.borrow_mut() = Some(value);
    }

    fn take_result(&self) -> ScopeResult<R> {
        self.result
            .borrow_mut()
            .take()
            .ok_or(ScopeError::NoPendingWork { scope: self.id })
    }

    /// Park a handler invocation for the trampoline.
    fn publish(&self, work: LocalBoxFuture<R>) {
        debug_assert!(!self.has_result(), "shift published on a scope that already has a result");
        let mut next = self.next_shift.borrow_mut();
        if next.is_some() {
            fatal(ScopeError::ShiftInFlight { scope: self.id });
        }
        *next = Some(work);
    }

    /// Drop the pending handler invocation, if any.
    #[cfg(test)]
    pub(crate) fn discard_work(&self) -> bool {
        self.next_shift.borrow_mut().take().is_some()
    }

    fn spawn(self: &Rc<Self>, future: LocalBoxFuture<R>) -> Rc<Task<R>> {
        Rc::new(Task {
            owner: self.id,
            core: Rc::downgrade(self),
            future: RefCell::new(Some(future)),
        })
    }

    /// Start the body: poll it until it completes or first suspends.
    pub(crate) fn start(self: &Rc<Self>, body: LocalBoxFuture<R>) {
        trace!(scope = %self.id, "starting body");
        self.spawn(body).resume();
    }

    /// Run the pending handler invocation.
    pub(crate) fn step(self: &Rc<Self>) -> ScopeResult<()> {
        let work = self
            .next_shift
            .borrow_mut()
            .take()
            .ok_or(ScopeError::NoPendingWork { scope: self.id })?;
        let step = self.steps.get() + 1;
        self.steps.set(step);
        trace!(scope = %self.id, step, depth = task::depth(), "trampoline step");
        self.spawn(work).resume();
        Ok(())
    }

    fn register(&self, caller: Rc<dyn Resumable>, reply: Slot<R>) {
        self.resumptions.borrow_mut().push(Resumption { caller, reply });
    }

    /// Drive the scope until its final result is known and every captured
    /// continuation's caller has been resumed.
    ///
    /// `idle` runs whenever the scope has no result and no pending work.
    pub(crate) fn drive(
        self: &Rc<Self>,
        mut idle: impl FnMut() -> ScopeResult<Idle>,
    ) -> ScopeResult<Drive<R>> {
        loop {
            while !self.has_result() {
                if self.has_work() {
                    self.step()?;
                } else if let Idle::Park = idle()? {
                    trace!(scope = %self.id, "parked");
                    return Ok(Drive::Parked);
                }
            }

            let next = self.resumptions.borrow_mut().pop();
            let Some(Resumption { caller, reply }) = next else {
                break;
            };
            reply.set(Some(self.take_result()?));
            trace!(scope = %self.id, caller = %caller.owner(), "resuming continuation caller");
            caller.resume();
        }

        let value = self.take_result()?;
        debug!(scope = %self.id, steps = self.steps.get(), "scope finished");
        Ok(Drive::Finished(value))
    }

    /// A future that suspends the calling computation and publishes the
    /// handler invocation built by `capture`.
    pub(crate) fn suspend_with<A: 'static>(self: &Rc<Self>, capture: Capture<A, R>) -> LocalBoxFuture<A> {
        Box::pin(Suspend {
            scope: self.id,
            core: Rc::downgrade(self),
            capture: Some(capture),
            slot: slot(),
            strict: self.strict,
        })
    }

    /// Shift capturing a single-shot continuation.
    pub(crate) fn shift_once<A, F, Fut>(self: &Rc<Self>, handler: F) -> LocalBoxFuture<A>
    where
        A: 'static,
        F: FnOnce(Continuation<A, R>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let core = Rc::downgrade(self);
        let scope = self.id;
        let strict = self.strict;
        self.suspend_with::<A>(Box::new(move |target, slot| {
            let id = next_continuation_id();
            trace!(scope = %scope, continuation = %id, "shift published");
            let k = Continuation::with_id(
                id,
                SingleShotCont {
                    resume: ResumeTarget { id, scope, core, target, slot, strict },
                    used: Cell::new(false),
                },
            );
            Box::pin(async move { handler(k).await })
        }))
    }

    /// Shift that never resumes its caller; the handler gets a continuation
    /// that runs `launch` for its argument.
    pub(crate) fn shift_cps_with<A, B, F, Fut>(
        self: &Rc<Self>,
        handler: F,
        launch: impl Fn(A) -> B + 'static,
    ) -> LocalBoxFuture<Infallible>
    where
        A: 'static,
        B: 'static,
        F: FnOnce(Continuation<A, B>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let scope = self.id;
        self.suspend_with::<Infallible>(Box::new(move |_target, _slot| {
            let k = Continuation::new(CpsCont::new(launch));
            trace!(scope = %scope, continuation = %k.id(), "cps shift published");
            Box::pin(async move { handler(k).await })
        }))
    }
}

/// One of a scope's computations: its body or a handler invocation.
pub(crate) struct Task<R> {
    owner: ScopeId,
    core: Weak<ScopeCore<R>>,
    /// Empty while the computation is being polled or once it finished.
    future: RefCell<Option<LocalBoxFuture<R>>>,
}

impl<R: 'static> Resumable for Task<R> {
    fn owner(&self) -> ScopeId {
        self.owner
    }

    fn resume(self: Rc<Self>) {
        let taken = self.future.borrow_mut().take();
        let Some(mut future) = taken else {
            fatal(ScopeError::ComputationUnavailable { scope: self.owner });
        };

        let polled = task::enter(self.clone(), || task::poll_once(&mut future));
        match polled {
            Poll::Ready(value) => match self.core.upgrade() {
                Some(core) => core.complete(value),
                None => trace!(scope = %self.owner, "computation finished after its scope was dropped"),
            },
            Poll::Pending => *self.future.borrow_mut() = Some(future),
        }
    }
}

/// Suspension point created by a shift.
///
/// The first poll captures the computation being polled, publishes the
/// handler invocation and suspends. Later polls complete once a
/// continuation has filled the slot.
struct Suspend<A, R> {
    scope: ScopeId,
    core: Weak<ScopeCore<R>>,
    capture: Option<Capture<A, R>>,
    slot: Slot<A>,
    strict: bool,
}

impl<A, R: 'static> Future for Suspend<A, R> {
    type Output = A;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<A> {
        let this = self.get_mut();
        if let Some(capture) = this.capture.take() {
            let scope = this.scope;
            let core = this
                .core
                .upgrade()
                .unwrap_or_else(|| fatal(ScopeError::ScopeDropped { scope }));
            let caller = task::current().unwrap_or_else(|| fatal(ScopeError::OutsideRunloop));
            if this.strict && caller.owner() != scope {
                fatal(ScopeError::ShiftOutsideScope {
                    scope,
                    caller: caller.owner(),
                });
            }
            core.publish(capture(caller, Rc::clone(&this.slot)));
            return Poll::Pending;
        }

        match this.slot.take() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

/// Where a captured continuation delivers its argument.
pub(crate) struct ResumeTarget<A, R> {
    pub(crate) id: ContinuationId,
    pub(crate) scope: ScopeId,
    pub(crate) core: Weak<ScopeCore<R>>,
    pub(crate) target: Rc<dyn Resumable>,
    pub(crate) slot: Slot<A>,
    pub(crate) strict: bool,
}

impl<A: 'static, R: 'static> ResumeTarget<A, R> {
    /// Future that registers the caller and resumes the captured
    /// computation with `value`.
    pub(crate) fn resume_with(&self, value: A) -> Resume<A, R> {
        Resume {
            id: self.id,
            scope: self.scope,
            core: self.core.clone(),
            start: Some((Rc::clone(&self.target), Rc::clone(&self.slot), value)),
            reply: slot(),
            strict: self.strict,
        }
    }
}

/// Invocation of a captured continuation.
pub(crate) struct Resume<A, R> {
    id: ContinuationId,
    scope: ScopeId,
    core: Weak<ScopeCore<R>>,
    start: Option<(Rc<dyn Resumable>, Slot<A>, A)>,
    reply: Slot<R>,
    strict: bool,
}

// `A` is moved out by value and never pinned.
impl<A, R> Unpin for Resume<A, R> {}

impl<A, R: 'static> Future for Resume<A, R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();
        if let Some((target, slot, value)) = this.start.take() {
            let scope = this.scope;
            let core = this
                .core
                .upgrade()
                .unwrap_or_else(|| fatal(ScopeError::ScopeDropped { scope }));
            let caller = task::current().unwrap_or_else(|| fatal(ScopeError::OutsideRunloop));
            if this.strict && caller.owner() != scope {
                fatal(ScopeError::ForeignContinuation {
                    continuation: this.id,
                    owner: scope,
                    caller: caller.owner(),
                });
            }
            trace!(scope = %scope, continuation = %this.id, "invoking continuation");
            core.register(caller, Rc::clone(&this.reply));
            drop(core);
            slot.set(Some(value));
            target.resume();
            return Poll::Pending;
        }

        match this.reply.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Continuation that may be invoked once.
pub(crate) struct SingleShotCont<A, R> {
    resume: ResumeTarget<A, R>,
    used: Cell<bool>,
}

impl<A: 'static, R: 'static> DelimitedContinuation<A, R> for SingleShotCont<A, R> {
    fn invoke(&self, a: A) -> LocalBoxFuture<R> {
        if self.used.replace(true) {
            fatal(ScopeError::ContinuationReused {
                continuation: self.resume.id,
            });
        }
        Box::pin(self.resume.resume_with(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> Rc<ScopeCore<i32>> {
        ScopeCore::new(ScopeConfig::default(), true)
    }

    #[test]
    fn test_body_without_shift_finishes_immediately() {
        let core = core();
        core.start(Box::pin(async { 5 }));
        assert!(core.has_result());
        assert!(!core.has_work());
        match core.drive(|| unreachable!()) {
            Ok(Drive::Finished(value)) => assert_eq!(value, 5),
            _ => panic!("expected a finished scope"),
        }
        assert_eq!(core.steps(), 0);
    }

    #[test]
    fn test_step_without_work_fails() {
        let core = core();
        let err = core.step().unwrap_err();
        assert_eq!(err, ScopeError::NoPendingWork { scope: core.id() });
    }

    #[test]
    fn test_shift_publishes_work_and_suspends() {
        let core = core();
        let shifting = Rc::clone(&core);
        core.start(Box::pin(async move {
            let x: i32 = shifting.shift_once(|k| async move { k.invoke(20).await + 1 }).await;
            x * 2
        }));
        assert!(core.has_work());
        assert!(!core.has_result());

        match core.drive(|| unreachable!()) {
            Ok(Drive::Finished(value)) => assert_eq!(value, 41),
            _ => panic!("expected a finished scope"),
        }
        assert_eq!(core.steps(), 1);
    }

    #[test]
    fn test_idle_can_park() {
        let core = core();
        core.start(Box::pin(std::future::pending()));
        let parked = matches!(core.drive(|| Ok(Idle::Park)), Ok(Drive::Parked));
        assert!(parked);
    }

    #[test]
    #[should_panic(expected = "already has a pending shift")]
    fn test_second_publish_is_fatal() {
        let core = core();
        core.publish(Box::pin(async { 1 }));
        core.publish(Box::pin(async { 2 }));
    }

    #[test]
    #[should_panic(expected = "no scope is running")]
    fn test_shift_outside_runloop_is_fatal() {
        let core = core();
        let mut fut = core.shift_once(|_k: Continuation<i32, i32>| async { 0 });
        let _ = task::poll_once(&mut fut);
    }
}
