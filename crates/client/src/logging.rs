//! Logging module.
//!
//! Provides the crate's logging macros. They all dispatch to `tracing`, so the
//! binary (or an embedding application) decides where output goes by installing
//! a subscriber.

/// Log an info message
pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "hms_client", "{}", msg);
}

/// Log an error message
pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "hms_client", "{}", msg);
}

/// Log a warning message
pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "hms_client", "{}", msg);
}

/// Log a debug message
pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "hms_client", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
