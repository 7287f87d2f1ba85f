//! # Scope Errors
//!
//! Failures raised by the runloops. All of them are programming-contract
//! violations: a correct program never observes one, and none of them is
//! retried or recovered locally.
//!
//! Errors found by a driving loop are returned from
//! [`RunnableDelimitedScope::try_invoke`](crate::RunnableDelimitedScope::try_invoke).
//! Errors found while a suspended computation is being polled cannot cross
//! the `Future` boundary, so they are raised through [`fatal`] as a panic
//! carrying the error message.

use thiserror::Error;

use crate::continuation::ContinuationId;
use crate::scope::ScopeId;

/// Errors that can occur while driving a delimited scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The trampoline found neither a result nor pending work.
    #[error("{scope} is suspended with no further work to do but also no result")]
    NoPendingWork { scope: ScopeId },

    /// A second shift was published while one was still pending.
    #[error("{scope} already has a pending shift; only one shift may be in flight")]
    ShiftInFlight { scope: ScopeId },

    /// A single-shot continuation was invoked twice.
    #[error("single-shot continuation {continuation} resumed more than once")]
    ContinuationReused { continuation: ContinuationId },

    /// A continuation was invoked from a computation of another scope.
    #[error("continuation {continuation} of {owner} invoked from a computation owned by {caller}")]
    ForeignContinuation {
        continuation: ContinuationId,
        owner: ScopeId,
        caller: ScopeId,
    },

    /// `shift` was called from a computation of another scope.
    #[error("shift on {scope} called from a computation owned by {caller}")]
    ShiftOutsideScope { scope: ScopeId, caller: ScopeId },

    /// A shift or continuation future was polled outside any scope.
    #[error("shift or continuation used while no scope is running")]
    OutsideRunloop,

    /// The scope owning a continuation no longer exists.
    #[error("{scope} was dropped before its continuation was invoked")]
    ScopeDropped { scope: ScopeId },

    /// The scope body has already been run.
    #[error("{scope} has already been started")]
    AlreadyStarted { scope: ScopeId },

    /// A captured computation was resumed while running or after finishing.
    #[error("computation captured by {scope} is running or already finished")]
    ComputationUnavailable { scope: ScopeId },

    /// A replayed shift expected a value of a different type than recorded.
    #[error("replay of {scope} diverged at depth {depth}: recorded value has a different type")]
    ReplayDiverged { scope: ScopeId, depth: usize },

    /// The configured replay stack limit was reached.
    #[error("{scope} recorded more than {limit} continuation arguments")]
    ReplayStackExhausted { scope: ScopeId, limit: usize },
}

/// Result type for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Raise a contract violation from inside a poll.
#[track_caller]
pub(crate) fn fatal(err: ScopeError) -> ! {
    panic!("{err}")
}
