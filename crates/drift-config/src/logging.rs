//! Structured logging utilities for drift filesystem components.
//!
//! Provides consistent logging with component prefixes and structured
//! fields.
//!
//! # Usage
//!
//! ```ignore
//! use drift_config::logging::*;
//!
//! log_naming_info!("storage registered", files = 12);
//! log_storage_debug!("pruning duplicate", path = "/x");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const NAMING: &'static str = "NAMING";
    pub const STORAGE: &'static str = "STORAGE";
    pub const RMI: &'static str = "RMI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// === NAMING logging macros ===

#[macro_export]
macro_rules! log_naming_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "NAMING", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_naming_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "NAMING", $($key = $value,)* $msg)
    };
}

// === STORAGE logging macros ===

#[macro_export]
macro_rules! log_storage_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "STORAGE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_storage_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "STORAGE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_storage_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "STORAGE", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter, honoring `DRIFT_LOG`
/// when set. Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter =
        EnvFilter::try_from_env("DRIFT_LOG").unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_constants_are_stable() {
        assert_eq!(Component::NAMING, "NAMING");
        assert_eq!(Component::STORAGE, "STORAGE");
        assert_eq!(Component::RMI, "RMI");
    }
}
