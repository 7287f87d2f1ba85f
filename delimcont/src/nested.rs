//! # Nested Runloop
//!
//! [`NestedDelimContScope`] lets a body call `shift` on an enclosing scope
//! from inside an inner `reset`:
//!
//! ```text
//! reset { outer ->
//!     val y = reset { inner -> outer.shift { k -> k(1) * 2 } + 1 }
//!     y + 10
//! }
//! ```
//!
//! Every `reset` creates a **child** scope holding a non-owning link to the
//! scope it was created from. Child scopes are driven by
//! [`invoke_nested`](NestedDelimContScope::invoke_nested), a future polled
//! by the enclosing computation.
//!
//! ## Delegation
//!
//! When a child has neither a result nor pending work of its own, its
//! computation is waiting on an ancestor. The child then walks up its
//! parent chain and runs one step of the nearest ancestor that has pending
//! work, repeating while any ancestor has work left.
//!
//! If a delegated step gives that ancestor its final result, the ancestor
//! has short-circuited past the child. The child is **parked**: its driver
//! stays pending forever and its remaining computation never runs. A child
//! whose ancestor already finished parks as well.
//!
//! ## States
//!
//! ```text
//! Running -> Suspended (local work) -> Delegating (ancestor work)
//!         -> Finished | Parked
//! ```

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::iter;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tracing::{debug, trace, trace_span, warn};

use crate::config::{self, ScopeConfig};
use crate::continuation::Continuation;
use crate::error::{fatal, ScopeError, ScopeResult};
use crate::runloop::{Drive, Idle, ScopeCore};
use crate::scope::{DelimitedScope, RunnableDelimitedScope, ScopeId};
use crate::task::LocalBoxFuture;

type Body<R> = Box<dyn FnOnce(NestedDelimContScope<R>) -> LocalBoxFuture<R>>;

/// Type-erased link in a parent chain.
pub(crate) trait ScopeNode {
    fn id(&self) -> ScopeId;

    /// Enclosing scope, if it is still alive.
    fn parent(&self) -> Option<Rc<dyn ScopeNode>>;

    fn has_work(&self) -> bool;

    fn has_result(&self) -> bool;

    /// Run this scope's pending handler invocation.
    fn step(&self) -> ScopeResult<()>;
}

/// `node` followed by its ancestors, innermost first.
fn chain(node: Option<Rc<dyn ScopeNode>>) -> impl Iterator<Item = Rc<dyn ScopeNode>> {
    iter::successors(node, |node| node.parent())
}

struct NestedNode<R> {
    core: Rc<ScopeCore<R>>,
    parent: Option<Weak<dyn ScopeNode>>,
    body: RefCell<Option<Body<R>>>,
}

impl<R: 'static> NestedNode<R> {
    fn take_body(&self) -> ScopeResult<Body<R>> {
        self.body
            .borrow_mut()
            .take()
            .ok_or(ScopeError::AlreadyStarted { scope: self.core.id() })
    }

    /// Idle handler of a child scope: service ancestors until none has
    /// work left.
    fn perform_parent_work(&self) -> ScopeResult<Idle> {
        let scope = self.core.id();
        let mut progressed = false;

        while let Some(active) = chain(self.parent()).find(|node| node.has_work()) {
            trace!(scope = %scope, ancestor = %active.id(), "running ancestor step");
            active.step()?;
            progressed = true;
            if active.has_result() {
                debug!(scope = %scope, ancestor = %active.id(), "ancestor finished, parking");
                return Ok(Idle::Park);
            }
        }

        if let Some(finished) = chain(self.parent()).find(|node| node.has_result()) {
            debug!(scope = %scope, ancestor = %finished.id(), "ancestor already finished, parking");
            return Ok(Idle::Park);
        }

        if progressed {
            Ok(Idle::Progressed)
        } else {
            Err(ScopeError::NoPendingWork { scope })
        }
    }
}

impl<R: 'static> ScopeNode for NestedNode<R> {
    fn id(&self) -> ScopeId {
        self.core.id()
    }

    fn parent(&self) -> Option<Rc<dyn ScopeNode>> {
        self.parent.as_ref()?.upgrade()
    }

    fn has_work(&self) -> bool {
        self.core.has_work()
    }

    fn has_result(&self) -> bool {
        self.core.has_result()
    }

    fn step(&self) -> ScopeResult<()> {
        self.core.step()
    }
}

/// Delimited-continuation scope that supports shifting on enclosing scopes.
pub struct NestedDelimContScope<R> {
    node: Rc<NestedNode<R>>,
}

/// A nested scope created by `reset` or [`NestedDelimContScope::child`].
pub type ChildDelimContScope<R> = NestedDelimContScope<R>;

impl<R: 'static> NestedDelimContScope<R> {
    /// Create a top-level scope for `body` using the process-wide
    /// configuration.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        Self::with_config(config::scope_config(), body)
    }

    /// Create a top-level scope for `body` with an explicit configuration.
    pub fn with_config<F, Fut>(config: ScopeConfig, body: F) -> Self
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        Self::build(config, None, body)
    }

    fn build<F, Fut>(config: ScopeConfig, parent: Option<Weak<dyn ScopeNode>>, body: F) -> Self
    where
        F: FnOnce(Self) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let body: Body<R> = Box::new(move |scope| Box::pin(body(scope)) as LocalBoxFuture<R>);
        Self {
            node: Rc::new(NestedNode {
                core: ScopeCore::new(config, false),
                parent,
                body: RefCell::new(Some(body)),
            }),
        }
    }

    /// Create a child of this scope without running it.
    ///
    /// Drive it with [`invoke_nested`](Self::invoke_nested) from one of this
    /// scope's computations.
    pub fn child<B, F, Fut>(&self, body: F) -> NestedDelimContScope<B>
    where
        B: 'static,
        F: FnOnce(NestedDelimContScope<B>) -> Fut + 'static,
        Fut: Future<Output = B> + 'static,
    {
        let parent: Rc<dyn ScopeNode> = self.node.clone();
        NestedDelimContScope::build(self.config(), Some(Rc::downgrade(&parent)), body)
    }

    /// Whether this scope was created inside another one.
    pub fn is_child(&self) -> bool {
        self.node.parent.is_some()
    }

    /// Identity of the enclosing scope, if it is still alive.
    pub fn parent_id(&self) -> Option<ScopeId> {
        self.node.parent().map(|parent| parent.id())
    }

    /// The nearest scope, starting with this one, that has pending work.
    pub fn active_parent(&self) -> Option<ScopeId> {
        let node: Rc<dyn ScopeNode> = self.node.clone();
        chain(Some(node)).find(|node| node.has_work()).map(|node| node.id())
    }

    /// Trampoline steps taken so far.
    pub fn steps(&self) -> u64 {
        self.node.core.steps()
    }

    /// Configuration snapshot this scope runs with.
    pub fn config(&self) -> ScopeConfig {
        self.node.core.config()
    }

    /// Drive this scope from inside an enclosing computation.
    ///
    /// Whenever the scope runs out of local work it services its ancestors.
    /// The future stays pending forever if an ancestor finishes first.
    ///
    /// # Panics
    /// On the same contract violations as
    /// [`invoke`](RunnableDelimitedScope::invoke).
    pub fn invoke_nested(self) -> LocalBoxFuture<R> {
        Box::pin(InvokeNested {
            scope: self.node.core.id(),
            pending: Some(self),
            parked: false,
        })
    }
}

impl<R> Clone for NestedDelimContScope<R> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<R: 'static> fmt::Debug for NestedDelimContScope<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedDelimContScope")
            .field("id", &self.node.core.id())
            .field("parent", &self.parent_id())
            .field("steps", &self.node.core.steps())
            .finish()
    }
}

impl<R: 'static> DelimitedScope<R> for NestedDelimContScope<R> {
    type Child<B: 'static> = NestedDelimContScope<B>;

    fn shift<A, F, Fut>(&self, handler: F) -> LocalBoxFuture<A>
    where
        A: Clone + 'static,
        F: FnOnce(Continuation<A, R>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
    {
        self.node.core.shift_once(handler)
    }

    fn shift_cps<A, B, F, Fut, C, CFut>(&self, handler: F, tail: C) -> LocalBoxFuture<Infallible>
    where
        A: Clone + 'static,
        B: 'static,
        F: FnOnce(Continuation<A, B>) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        C: Fn(NestedDelimContScope<B>, A) -> CFut + 'static,
        CFut: Future<Output = B> + 'static,
    {
        let config = self.config();
        let tail = Rc::new(tail);
        self.node.core.shift_cps_with(handler, move |a: A| {
            let tail = Rc::clone(&tail);
            NestedDelimContScope::with_config(config, move |scope| (*tail)(scope, a)).invoke()
        })
    }

    fn reset<B, F, Fut>(&self, body: F) -> LocalBoxFuture<B>
    where
        B: 'static,
        F: Fn(NestedDelimContScope<B>) -> Fut + 'static,
        Fut: Future<Output = B> + 'static,
    {
        self.child(body).invoke_nested()
    }
}

impl<R: 'static> RunnableDelimitedScope<R> for NestedDelimContScope<R> {
    fn id(&self) -> ScopeId {
        self.node.core.id()
    }

    /// Drive the scope as a top-level scope.
    ///
    /// On a child this does not delegate to ancestors, so shifting on an
    /// enclosing scope from inside it fails; use
    /// [`invoke_nested`](NestedDelimContScope::invoke_nested) instead.
    fn try_invoke(self) -> ScopeResult<R> {
        let node = Rc::clone(&self.node);
        let scope = node.core.id();
        if self.is_child() && node.core.config().warn_blocking_nested_invoke {
            warn!(
                scope = %scope,
                parent = ?self.parent_id(),
                "blocking invoke on a child scope, shifts on enclosing scopes will not be delegated; use invoke_nested"
            );
        }
        let body = node.take_body()?;

        let span = trace_span!("scope", id = %scope, kind = "nested");
        let _entered = span.enter();

        node.core.start(body(self));
        match node.core.drive(|| Err(ScopeError::NoPendingWork { scope }))? {
            Drive::Finished(value) => Ok(value),
            Drive::Parked => Err(ScopeError::NoPendingWork { scope }),
        }
    }
}

/// Future returned by [`NestedDelimContScope::invoke_nested`].
struct InvokeNested<R> {
    scope: ScopeId,
    pending: Option<NestedDelimContScope<R>>,
    parked: bool,
}

impl<R: 'static> Future for InvokeNested<R> {
    type Output = R;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<R> {
        let this = self.get_mut();
        if this.parked {
            return Poll::Pending;
        }
        let Some(handle) = this.pending.take() else {
            fatal(ScopeError::AlreadyStarted { scope: this.scope });
        };

        let node = Rc::clone(&handle.node);
        let body = node.take_body().unwrap_or_else(|err| fatal(err));

        let span = trace_span!("scope", id = %this.scope, kind = "nested", parent = ?handle.parent_id());
        let _entered = span.enter();

        node.core.start(body(handle));
        match node.core.drive(|| node.perform_parent_work()) {
            Ok(Drive::Finished(value)) => Poll::Ready(value),
            Ok(Drive::Parked) => {
                this.parked = true;
                Poll::Pending
            }
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::absurd;

    fn run<R: 'static, Fut>(body: impl FnOnce(NestedDelimContScope<R>) -> Fut + 'static) -> R
    where
        Fut: Future<Output = R> + 'static,
    {
        NestedDelimContScope::with_config(ScopeConfig::default(), body).invoke()
    }

    #[test]
    fn test_outer_shift_short_circuits_inner_reset() {
        let value = run(|outer: NestedDelimContScope<i32>| async move {
            let shifted = outer.clone();
            let y: i32 = outer
                .reset(move |_inner: NestedDelimContScope<i32>| {
                    let shifted = shifted.clone();
                    async move {
                        let x: i32 = shifted.shift(|_k| async { 10 }).await;
                        x + 1000
                    }
                })
                .await;
            y + 1
        });
        assert_eq!(value, 10);
    }

    #[test]
    fn test_outer_shift_resumes_through_inner_reset() {
        let value = run(|outer: NestedDelimContScope<i32>| async move {
            let shifted = outer.clone();
            let y: i32 = outer
                .reset(move |_inner: NestedDelimContScope<i32>| {
                    let shifted = shifted.clone();
                    async move {
                        let x: i32 = shifted.shift(|k| async move { k.invoke(1).await * 2 }).await;
                        x + 1
                    }
                })
                .await;
            y + 10
        });
        assert_eq!(value, 24);
    }

    #[test]
    fn test_inner_shift_stays_local() {
        let value = run(|outer: NestedDelimContScope<i32>| async move {
            let y: i32 = outer
                .reset(|inner: NestedDelimContScope<i32>| async move {
                    let x: i32 = inner.shift(|k| async move { k.invoke(2).await * 3 }).await;
                    x
                })
                .await;
            y + 1
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_grandparent_shift_resumes() {
        let value = run(|top: NestedDelimContScope<i32>| async move {
            let grand = top.clone();
            let mid: i32 = top
                .reset(move |middle: NestedDelimContScope<i32>| {
                    let grand = grand.clone();
                    async move {
                        let inner: i32 = middle
                            .reset(move |_c: NestedDelimContScope<i32>| {
                                let grand = grand.clone();
                                async move { grand.shift(|k| async move { k.invoke(5).await + 1 }).await }
                            })
                            .await;
                        inner * 2
                    }
                })
                .await;
            mid + 100
        });
        assert_eq!(value, 111);
    }

    #[test]
    fn test_grandparent_short_circuit_parks_every_child() {
        let value = run(|top: NestedDelimContScope<i32>| async move {
            let grand = top.clone();
            let mid: i32 = top
                .reset(move |middle: NestedDelimContScope<i32>| {
                    let grand = grand.clone();
                    async move {
                        let inner: i32 = middle
                            .reset(move |_c: NestedDelimContScope<i32>| {
                                let grand = grand.clone();
                                async move {
                                    let _: i32 = grand.shift(|_k| async { 10 }).await;
                                    0
                                }
                            })
                            .await;
                        inner * 2
                    }
                })
                .await;
            mid + 100
        });
        assert_eq!(value, 10);
    }

    #[test]
    #[should_panic(expected = "no further work to do but also no result")]
    fn test_top_level_without_work_is_fatal() {
        run(|_scope: NestedDelimContScope<i32>| std::future::pending::<i32>());
    }

    #[test]
    fn test_parent_links_and_active_parent() {
        let parent = NestedDelimContScope::with_config(ScopeConfig::default(), |s: NestedDelimContScope<i32>| async move {
            let x: i32 = s.shift(|k| async move { k.invoke(1).await }).await;
            x
        });
        assert!(!parent.is_child());
        assert_eq!(parent.active_parent(), None);

        let body = parent.node.take_body().unwrap();
        parent.node.core.start(body(parent.clone()));
        assert_eq!(parent.active_parent(), Some(parent.id()));

        let child = parent.child(|_c: NestedDelimContScope<i32>| async { 0 });
        assert!(child.is_child());
        assert_eq!(child.parent_id(), Some(parent.id()));
        assert_eq!(child.active_parent(), Some(parent.id()));
        assert!(format!("{child:?}").contains("NestedDelimContScope"));
    }

    #[test]
    fn test_blocking_invoke_on_child_still_runs_local_work() {
        crate::log::init_for_tests();
        let parent = NestedDelimContScope::with_config(ScopeConfig::default(), |_s| async { 0 });
        let child = parent.child(|c: NestedDelimContScope<i32>| async move {
            let x: i32 = c.shift(|k| async move { k.invoke(4).await + 1 }).await;
            x
        });
        assert_eq!(child.invoke(), 5);
    }

    #[test]
    fn test_invoke_nested_without_parent_behaves_like_top_level() {
        let scope = NestedDelimContScope::with_config(ScopeConfig::default(), |s: NestedDelimContScope<i32>| async move {
            let x: i32 = s.shift(|k| async move { k.invoke(3).await * 3 }).await;
            x
        });
        let value = run(move |_outer: NestedDelimContScope<i32>| scope.invoke_nested());
        assert_eq!(value, 9);
    }

    #[test]
    fn test_shift_cps_starts_top_level_scope() {
        let value = run(|scope: NestedDelimContScope<i32>| async move {
            let never = scope
                .shift_cps(
                    |k: Continuation<i32, i32>| async move { k.invoke(6).await },
                    |inner, a| async move {
                        assert!(!inner.is_child());
                        a * 7
                    },
                )
                .await;
            absurd(never)
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn test_handler_may_reset_and_invoke_inside_child() {
        // The outer continuation is invoked from a handler running in the
        // outer scope, with a child scope nested inside the handler.
        let value = run(|outer: NestedDelimContScope<i32>| async move {
            let handler_scope = outer.clone();
            let x: i32 = outer
                .shift(move |k| async move {
                    let doubled: i32 = handler_scope
                        .reset(|inner: NestedDelimContScope<i32>| async move {
                            let v: i32 = inner.shift(|k2| async move { k2.invoke(2).await * 2 }).await;
                            v
                        })
                        .await;
                    k.invoke(doubled).await + 1
                })
                .await;
            x * 10
        });
        assert_eq!(value, 41);
    }
}
