//! Logging Infrastructure
//!
//! The runloops emit `tracing` events:
//!
//! - **trace**: every trampoline step, shift publication and continuation
//!   resumption, tagged with the scope and continuation ids
//! - **debug**: scope completion with its step count
//! - **warn**: blocking `invoke` on a child nested scope
//!
//! Nothing is printed unless the embedding application installs a
//! subscriber. [`init`] installs a `tracing-subscriber` fmt subscriber that
//! honours `RUST_LOG` first and the configured [`LogConfig`] second.
//!
//! # Example
//!
//! ```rust,ignore
//! use delimcont::log;
//!
//! log::init();
//! let value = delimcont::reset(|scope| async move { 42 });
//! ```

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{self, LogConfig, LogFormat, LogLevel};

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Build the filter for a log configuration.
///
/// `RUST_LOG` wins when it is set and parses.
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Install a global subscriber using the process-wide configuration.
///
/// Returns `false` if a global subscriber was already installed.
pub fn try_init() -> bool {
    try_init_with(&config::current().log)
}

/// Install a global subscriber for the given configuration.
///
/// Returns `false` if a global subscriber was already installed.
pub fn try_init_with(config: &LogConfig) -> bool {
    if config.level == LogLevel::Off {
        return true;
    }
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);
    match config.format {
        LogFormat::Plain => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Install a global subscriber, ignoring an already installed one.
pub fn init() {
    let _ = try_init();
}

/// Install a subscriber that writes through the test harness capture.
///
/// Safe to call from every test; only the first call installs.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LogConfig {
            level: LogLevel::Warn,
            format: LogFormat::Plain,
        }))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(LevelFilter::from(LogLevel::Off), LevelFilter::OFF);
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn test_off_level_installs_nothing() {
        let config = LogConfig {
            level: LogLevel::Off,
            format: LogFormat::Json,
        };
        assert!(try_init_with(&config));
    }

    #[test]
    fn test_init_for_tests_is_idempotent() {
        init_for_tests();
        init_for_tests();
    }
}
