//! # Suspendable Computations
//!
//! Bodies, handlers and CPS tails are plain Rust futures. The runloops never
//! hand them to an executor: a computation is polled exactly when a
//! trampoline step or a continuation resumption decides to, using a no-op
//! waker. `Poll::Pending` therefore means "suspended at a shift", and the
//! suspended future itself is the captured continuation.
//!
//! A thread-local stack records which computation is being polled, so that
//! `shift` can capture it and continuation invocation can register it as
//! the caller to resume once the scope's result is known.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::scope::ScopeId;

/// A boxed, single-threaded future.
pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

/// A suspended computation that can be polled again.
///
/// Implemented by runloop tasks; the output type is erased so that scopes
/// with different result types can resume each other's computations.
pub(crate) trait Resumable {
    /// Scope that owns this computation and receives its result.
    fn owner(&self) -> ScopeId;

    /// Poll the computation once, publishing its value to the owner if it
    /// completes.
    fn resume(self: Rc<Self>);
}

thread_local! {
    static CURRENT: RefCell<Vec<Rc<dyn Resumable>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the current-task stack even when the poll unwinds.
struct Entered;

impl Drop for Entered {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `task` recorded as the computation being polled.
pub(crate) fn enter<T>(task: Rc<dyn Resumable>, f: impl FnOnce() -> T) -> T {
    CURRENT.with(|stack| stack.borrow_mut().push(task));
    let _entered = Entered;
    f()
}

/// The computation currently being polled, if any.
pub(crate) fn current() -> Option<Rc<dyn Resumable>> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

/// Number of computations being polled on this thread.
pub(crate) fn depth() -> usize {
    CURRENT.with(|stack| stack.borrow().len())
}

/// Poll a future once with a waker that does nothing.
pub(crate) fn poll_once<T>(future: &mut LocalBoxFuture<T>) -> Poll<T> {
    let mut cx = Context::from_waker(Waker::noop());
    future.as_mut().poll(&mut cx)
}
