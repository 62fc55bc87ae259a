// Error types for the performance monitoring core
//
// Internal failures are described by numbered error values so host bindings
// can map them without string matching. None of them ever escape into
// application code; callers log them and fall back to sentinel values.

mod monitor;

pub use monitor::{log_monitor_error, MonitorError, MonitorErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the FFI boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
