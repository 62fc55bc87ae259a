// Monitor error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Monitor error code constants
///
/// Single source of truth for the numeric codes exposed to host bindings.
///
/// Error code range: 3001-3004
pub struct MonitorErrorCodes {}

impl MonitorErrorCodes {
    /// The monitor runtime could not be built
    pub const RUNTIME_INIT_FAILED: i32 = 3001;

    /// A detector thread could not be spawned
    pub const THREAD_SPAWN_FAILED: i32 = 3002;

    /// Writing a crash or metrics log failed
    pub const LOG_WRITE_FAILED: i32 = 3003;

    /// The process-wide monitor has not been initialized
    pub const NOT_INITIALIZED: i32 = 3004;
}

/// Log a monitor error with structured context
///
/// Internal failures are reported here and then discarded; monitoring must
/// never surface errors into application logic.
pub fn log_monitor_error(err: &MonitorError, context: &str) {
    error!(
        "Monitor error in {}: code={}, component=PerformanceMonitor, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Monitoring core errors
///
/// Error code range: 3001-3004
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// Tokio runtime construction failed
    RuntimeInit { reason: String },

    /// Spawning a dedicated detector thread failed
    ThreadSpawn { thread: String, reason: String },

    /// Crash or metrics log could not be written
    LogWrite { path: String, reason: String },

    /// `initialize` has not run yet
    NotInitialized,
}

impl ErrorCode for MonitorError {
    fn code(&self) -> i32 {
        match self {
            MonitorError::RuntimeInit { .. } => MonitorErrorCodes::RUNTIME_INIT_FAILED,
            MonitorError::ThreadSpawn { .. } => MonitorErrorCodes::THREAD_SPAWN_FAILED,
            MonitorError::LogWrite { .. } => MonitorErrorCodes::LOG_WRITE_FAILED,
            MonitorError::NotInitialized => MonitorErrorCodes::NOT_INITIALIZED,
        }
    }

    fn message(&self) -> String {
        match self {
            MonitorError::RuntimeInit { reason } => {
                format!("Failed to build monitor runtime: {}", reason)
            }
            MonitorError::ThreadSpawn { thread, reason } => {
                format!("Failed to spawn thread '{}': {}", thread, reason)
            }
            MonitorError::LogWrite { path, reason } => {
                format!("Failed to write log file {}: {}", path, reason)
            }
            MonitorError::NotInitialized => {
                "Performance monitor not initialized. Call initialize() first.".to_string()
            }
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MonitorError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MonitorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_error_codes() {
        assert_eq!(
            MonitorError::RuntimeInit {
                reason: "test".to_string()
            }
            .code(),
            MonitorErrorCodes::RUNTIME_INIT_FAILED
        );
        assert_eq!(
            MonitorError::ThreadSpawn {
                thread: "watchdog".to_string(),
                reason: "test".to_string()
            }
            .code(),
            3002
        );
        assert_eq!(
            MonitorError::LogWrite {
                path: "perf_logs".to_string(),
                reason: "test".to_string()
            }
            .code(),
            MonitorErrorCodes::LOG_WRITE_FAILED
        );
        assert_eq!(MonitorError::NotInitialized.code(), 3004);
    }

    #[test]
    fn test_monitor_error_display() {
        let err = MonitorError::NotInitialized;
        let display = format!("{}", err);
        assert!(display.contains("MonitorError"));
        assert!(display.contains("3004"));
        assert!(display.contains("initialize()"));
    }
}
