// Performance Monitor Core
// In-process CPU, frame, memory, battery, ANR, leak and crash monitoring

// Module declarations
pub mod battery;
pub mod config;
pub mod detectors;
pub mod error;
pub mod logfiles;
pub mod looper;
pub mod metrics;
pub mod monitor;
pub mod telemetry;
pub mod testing;

#[cfg(target_os = "android")]
mod jni_bridge;

// Re-exports for convenience
pub use config::MonitorConfig;
pub use error::{ErrorCode, MonitorError};
pub use monitor::{
    emit_event, initialize, instance, record_custom_metric, shutdown, watch_for_leaks,
    HostBindings, MonitorContext, PerformanceMonitor,
};
pub use telemetry::{EventSubscription, PerformanceEvent, PerformanceSnapshot};

/// Initialize Android logging
///
/// Routes both `tracing` events and `log` records to logcat.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    match tracing_android::layer("PerfMonitor") {
        Ok(layer) => {
            let _ = tracing_subscriber::registry().with(layer).try_init();
        }
        Err(err) => eprintln!("logcat layer unavailable: {}", err),
    }
}

/// Initialize desktop logging (stderr). Safe to call more than once.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).try_init();
}
