//! Detectors that watch the process and report through an [`EventSink`].
//!
//! [`EventSink`]: crate::telemetry::EventSink

pub mod anr;
pub mod crash;
pub mod leak;

pub use anr::AnrDetector;
pub use crash::{CrashReporter, CRASH_EXIT_CODE};
pub use leak::{LivenessProbe, MemoryLeakDetector, LEAK_GRACE_PERIOD_MS};
