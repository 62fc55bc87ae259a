//! Performance event taxonomy delivered on the monitor's event stream.

use serde::{Deserialize, Serialize};

use super::now_timestamp_ms;

/// Discriminant of [`PerformanceEvent`], handy for filtering and logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Crash,
    Anr,
    MemoryLeak,
    BatteryDrain,
    MetricAlert,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Crash => "crash",
            EventKind::Anr => "anr",
            EventKind::MemoryLeak => "memory_leak",
            EventKind::BatteryDrain => "battery_drain",
            EventKind::MetricAlert => "metric_alert",
        }
    }
}

/// Events produced by the detectors and by manual callers.
///
/// Every variant carries the wall-clock epoch milliseconds at capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerformanceEvent {
    Crash {
        thread_name: String,
        message: String,
        stack_trace: String,
        timestamp: u64,
    },
    Anr {
        duration_ms: u64,
        stack_trace: String,
        timestamp: u64,
    },
    MemoryLeak {
        label: String,
        retained_heap_kb: u64,
        timestamp: u64,
    },
    BatteryDrain {
        level: i32,
        temperature_c: f32,
        timestamp: u64,
    },
    MetricAlert {
        metric_name: String,
        detail: String,
        timestamp: u64,
    },
}

impl PerformanceEvent {
    /// Free-form alert stamped with the current time.
    pub fn metric_alert(metric_name: impl Into<String>, detail: impl Into<String>) -> Self {
        PerformanceEvent::MetricAlert {
            metric_name: metric_name.into(),
            detail: detail.into(),
            timestamp: now_timestamp_ms(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PerformanceEvent::Crash { timestamp, .. }
            | PerformanceEvent::Anr { timestamp, .. }
            | PerformanceEvent::MemoryLeak { timestamp, .. }
            | PerformanceEvent::BatteryDrain { timestamp, .. }
            | PerformanceEvent::MetricAlert { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PerformanceEvent::Crash { .. } => EventKind::Crash,
            PerformanceEvent::Anr { .. } => EventKind::Anr,
            PerformanceEvent::MemoryLeak { .. } => EventKind::MemoryLeak,
            PerformanceEvent::BatteryDrain { .. } => EventKind::BatteryDrain,
            PerformanceEvent::MetricAlert { .. } => EventKind::MetricAlert,
        }
    }
}
