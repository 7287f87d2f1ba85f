//! Runtime Configuration
//!
//! Configuration for the delimited-continuation runloops. It can be set
//! programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `DELIMCONT_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DELIMCONT_STRICT_OWNERSHIP` | Reject shifts/continuations used from another scope ("true"/"false") | true |
//! | `DELIMCONT_WARN_NESTED_INVOKE` | Warn when a child nested scope is driven with blocking `invoke` | true |
//! | `DELIMCONT_REPLAY_STACK_LIMIT` | Maximum recorded multi-shot arguments per scope (0 = unbounded) | 0 |
//! | `DELIMCONT_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `DELIMCONT_LOG_FORMAT` | Log format (plain/json) | plain |
//!
//! # Example
//!
//! ```rust,ignore
//! use delimcont::config::{self, RuntimeConfig};
//!
//! let config = RuntimeConfig::builder()
//!     .strict_ownership(false)
//!     .replay_stack_limit(Some(4096))
//!     .build()?;
//! config::install(config);
//! ```

use std::env;
use std::sync::OnceLock;

use parking_lot::RwLock;
use thiserror::Error;

/// Log level for runtime logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable text.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse a format from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Per-scope behaviour switches.
///
/// Every scope takes a snapshot of this at construction. Child scopes,
/// CPS scopes and multi-shot replays inherit the snapshot of the scope that
/// created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeConfig {
    /// Reject `shift` calls and continuation invocations that come from a
    /// computation owned by a different scope (single-shot and multi-shot
    /// variants only; the nested variant allows it).
    /// Default: true.
    pub strict_ownership: bool,

    /// Emit a warning when a child nested scope is driven with the blocking
    /// `invoke` instead of `invoke_nested`.
    /// Default: true.
    pub warn_blocking_nested_invoke: bool,

    /// Maximum number of continuation arguments a multi-shot scope records.
    /// `None` means unbounded (default).
    pub replay_stack_limit: Option<usize>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            strict_ownership: true,
            warn_blocking_nested_invoke: true,
            replay_stack_limit: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum level emitted when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Scope behaviour.
    pub scope: ScopeConfig,
    /// Logging configuration.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables that are not set, or hold values that do not parse, keep
    /// their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_bool("DELIMCONT_STRICT_OWNERSHIP") {
            config.scope.strict_ownership = val;
        }

        if let Some(val) = parse_env_bool("DELIMCONT_WARN_NESTED_INVOKE") {
            config.scope.warn_blocking_nested_invoke = val;
        }

        if let Some(val) = parse_env_usize("DELIMCONT_REPLAY_STACK_LIMIT") {
            config.scope.replay_stack_limit = if val > 0 { Some(val) } else { None };
        }

        if let Ok(val) = env::var("DELIMCONT_LOG_LEVEL") {
            if let Some(level) = LogLevel::from_str(&val) {
                config.log.level = level;
            }
        }

        if let Ok(val) = env::var("DELIMCONT_LOG_FORMAT") {
            if let Some(format) = LogFormat::from_str(&val) {
                config.log.format = format;
            }
        }

        config
    }

    /// Load configuration from environment variables, reporting the first
    /// value that does not parse.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_bool("DELIMCONT_STRICT_OWNERSHIP")? {
            config.scope.strict_ownership = val;
        }

        if let Some(val) = env_bool("DELIMCONT_WARN_NESTED_INVOKE")? {
            config.scope.warn_blocking_nested_invoke = val;
        }

        if let Ok(raw) = env::var("DELIMCONT_REPLAY_STACK_LIMIT") {
            let val = raw.parse::<usize>().map_err(|e| ConfigError::EnvParse {
                var: "DELIMCONT_REPLAY_STACK_LIMIT".into(),
                message: e.to_string(),
            })?;
            config.scope.replay_stack_limit = if val > 0 { Some(val) } else { None };
        }

        if let Ok(raw) = env::var("DELIMCONT_LOG_LEVEL") {
            config.log.level = LogLevel::from_str(&raw).ok_or_else(|| ConfigError::EnvParse {
                var: "DELIMCONT_LOG_LEVEL".into(),
                message: format!("unknown log level '{raw}'"),
            })?;
        }

        if let Ok(raw) = env::var("DELIMCONT_LOG_FORMAT") {
            config.log.format = LogFormat::from_str(&raw).ok_or_else(|| ConfigError::EnvParse {
                var: "DELIMCONT_LOG_FORMAT".into(),
                message: format!("unknown log format '{raw}'"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scope.replay_stack_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "replay_stack_limit".into(),
                message: "must be positive; use None for an unbounded stack".into(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
    /// Environment variable parse error.
    #[error("failed to parse environment variable '{var}': {message}")]
    EnvParse {
        /// Variable name.
        var: String,
        /// Error message.
        message: String,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the cross-scope ownership check.
    pub fn strict_ownership(mut self, enabled: bool) -> Self {
        self.config.scope.strict_ownership = enabled;
        self
    }

    /// Enable or disable the blocking nested invoke warning.
    pub fn warn_blocking_nested_invoke(mut self, enabled: bool) -> Self {
        self.config.scope.warn_blocking_nested_invoke = enabled;
        self
    }

    /// Bound the multi-shot replay stack.
    pub fn replay_stack_limit(mut self, limit: Option<usize>) -> Self {
        self.config.scope.replay_stack_limit = limit;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Build the configuration, validating it.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> RuntimeConfig {
        self.config
    }
}

/// Process-wide configuration.
static RUNTIME_CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

fn global() -> &'static RwLock<RuntimeConfig> {
    RUNTIME_CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::from_env()))
}

/// Install the process-wide configuration.
///
/// Only scopes constructed afterwards observe the change.
pub fn install(config: RuntimeConfig) {
    *global().write() = config;
}

/// Snapshot of the process-wide configuration.
///
/// Loaded from the environment on first use.
pub fn current() -> RuntimeConfig {
    global().read().clone()
}

/// Snapshot of the process-wide scope configuration.
pub fn scope_config() -> ScopeConfig {
    global().read().scope
}

fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw).map(Some).ok_or_else(|| ConfigError::EnvParse {
            var: name.into(),
            message: format!("expected a boolean, got '{raw}'"),
        }),
        Err(_) => Ok(None),
    }
}
