//! # Delimited Continuation Runloops
//!
//! `delimcont` implements the `shift`/`reset` control operators on top of
//! plain Rust futures:
//!
//! - **Single-shot runloop** ([`DelimContScope`]): each captured
//!   continuation can be invoked once
//! - **Multi-shot runloop** ([`MultiShotDelimContScope`]): continuations can
//!   be invoked repeatedly by replaying the body with recorded values
//! - **Nested runloop** ([`NestedDelimContScope`]): inner `reset` blocks may
//!   shift on enclosing scopes
//!
//! ## Technical Standards
//!
//! - **Control operators**: Danvy and Filinski, "Abstracting Control" (1990)
//! - **Trampolining**: one pending handler per scope, driven by a loop so
//!   that native stack depth stays constant across shifts
//! - **Suspension**: bodies are `async` blocks polled with
//!   [`Waker::noop`](std::task::Waker::noop); no executor is involved
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         DELIMCONT                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │ Single-shot  │  │  Multi-shot  │  │    Nested    │          │
//! │  │ (single.rs)  │  │(multishot.rs)│  │ (nested.rs)  │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │   Runloop    │  │ Continuation │  │     Task     │          │
//! │  │ (runloop.rs) │  │(continuation)│  │  (task.rs)   │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use delimcont::{reset, DelimitedScope};
//!
//! let value = reset(|scope| async move {
//!     let x: i32 = scope.shift(|k| async move { k.invoke(1).await + 10 }).await;
//!     x * 2
//! });
//! assert_eq!(value, 12);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod continuation;
pub mod error;
pub mod log;
pub mod multishot;
pub mod nested;
mod runloop;
pub mod scope;
pub mod single;
mod task;

use std::future::Future;

// Re-exports
pub use config::{ConfigError, LogFormat, LogLevel, RuntimeConfig, RuntimeConfigBuilder, ScopeConfig};
pub use continuation::{Continuation, ContinuationId, DelimitedContinuation};
pub use error::{ScopeError, ScopeResult};
pub use multishot::{MultiShotDelimContScope, PrefilledDelimContScope};
pub use nested::{ChildDelimContScope, NestedDelimContScope};
pub use scope::{absurd, DelimitedScope, RunnableDelimitedScope, ScopeId};
pub use single::DelimContScope;
pub use task::LocalBoxFuture;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run `body` in a single-shot scope and return its result.
///
/// # Panics
/// Panics with the [`ScopeError`] message on a contract violation.
pub fn reset<R, F, Fut>(body: F) -> R
where
    R: 'static,
    F: FnOnce(DelimContScope<R>) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
{
    DelimContScope::new(body).invoke()
}

/// Run `body` in a multi-shot scope and return its result.
///
/// # Panics
/// Panics with the [`ScopeError`] message on a contract violation.
pub fn reset_multi_shot<R, F, Fut>(body: F) -> R
where
    R: 'static,
    F: Fn(MultiShotDelimContScope<R>) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
{
    MultiShotDelimContScope::new(body).invoke()
}

/// Run `body` in a top-level nested scope and return its result.
///
/// # Panics
/// Panics with the [`ScopeError`] message on a contract violation.
pub fn reset_nested<R, F, Fut>(body: F) -> R
where
    R: 'static,
    F: FnOnce(NestedDelimContScope<R>) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
{
    NestedDelimContScope::new(body).invoke()
}

/// Install a process-wide configuration and a logging subscriber for it.
///
/// Scopes created afterwards snapshot the installed [`ScopeConfig`].
///
/// # Example
///
/// ```rust,ignore
/// use delimcont::{init_with_runtime_config, RuntimeConfig};
///
/// let config = RuntimeConfig::builder()
///     .replay_stack_limit(Some(10_000))
///     .build()
///     .unwrap();
///
/// init_with_runtime_config(config);
/// ```
pub fn init_with_runtime_config(config: RuntimeConfig) {
    log::try_init_with(&config.log);
    config::install(config);
}

/// Install configuration read from `DELIMCONT_*` environment variables.
///
/// See [`RuntimeConfig::from_env`] for the full list of supported variables.
pub fn init_from_env() {
    init_with_runtime_config(RuntimeConfig::from_env());
}
