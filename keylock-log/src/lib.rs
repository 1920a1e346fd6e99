//! keylock logging setup
//!
//! Every keylock crate emits events through `tracing`. This crate installs the
//! subscriber that turns them into output, controlled by environment variables.
//!
//! # Usage
//!
//! ```rust,no_run
//! keylock_log::init();
//! tracing::info!(key = "job-42", "lock acquired");
//! ```
//!
//! # Environment Variables
//!
//! - `KEYLOCK_DEBUG=1` - Enable debug logging
//! - `KEYLOCK_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `KEYLOCK_LOG_FORMAT=pretty|compact|json` - Set output format
//! - `KEYLOCK_LOG_COLOR=1|0` - Enable/disable ANSI colors
//!
//! `RUST_LOG`, when set, takes precedence over `KEYLOCK_LOG_LEVEL`.

use once_cell::sync::Lazy;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

// ============================================================================
// Log Levels
// ============================================================================

/// Log level for keylock logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |v: String| v == "1" || v.eq_ignore_ascii_case("true");

        let debug = lookup("KEYLOCK_DEBUG").map(flag).unwrap_or(false);

        let level = lookup("KEYLOCK_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("KEYLOCK_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        // JSON output never carries escape codes
        let color = format != Format::Json && lookup("KEYLOCK_LOG_COLOR").map(flag).unwrap_or(false);

        Self {
            debug,
            level,
            format,
            color,
            target: true,
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

/// Get the process-wide configuration read from the environment.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Install the global subscriber using [`config()`].
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    init_with(config());
}

/// Install the global subscriber using an explicit configuration.
pub fn init_with(config: &LogConfig) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = match config.format {
        Format::Json => registry
            .with(fmt::layer().json().with_target(config.target))
            .try_init(),
        Format::Compact => registry
            .with(fmt::layer().compact().with_ansi(config.color).with_target(config.target))
            .try_init(),
        Format::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(config.color).with_target(config.target))
            .try_init(),
    };

    // Another subscriber (e.g. a test harness) already owns the global slot.
    if installed.is_err() {
        tracing::debug!("global tracing subscriber already set");
    }
}

/// Whether [`init`] or [`init_with`] has run.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}
