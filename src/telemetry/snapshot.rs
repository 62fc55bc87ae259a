//! Plain value types describing measured metrics.

use serde::{Deserialize, Serialize};

/// Battery level sentinel used before the first reading arrives.
pub const UNKNOWN_BATTERY_LEVEL: i32 = -1;

/// Latest battery state as normalized by the battery monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    /// Charge percentage 0..=100, or -1 when unknown
    pub level: i32,
    pub temperature_c: f32,
    pub is_charging: bool,
}

impl BatterySnapshot {
    pub fn unknown() -> Self {
        Self {
            level: UNKNOWN_BATTERY_LEVEL,
            temperature_c: 0.0,
            is_charging: false,
        }
    }

    pub fn is_known(&self) -> bool {
        self.level >= 0
    }
}

impl Default for BatterySnapshot {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Best known metrics as of `timestamp`.
///
/// Values are replaced as a whole; fields stay at their zero/unknown
/// defaults until the first measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub cpu_percent: f32,
    pub fps: f32,
    pub avg_frame_ms: f32,
    pub memory_usage_mb: f32,
    pub heap_usage_mb: f32,
    pub battery_level: i32,
    pub battery_temperature_c: f32,
    pub is_charging: bool,
    pub uptime_ms: u64,
    pub timestamp: u64,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            fps: 0.0,
            avg_frame_ms: 0.0,
            memory_usage_mb: 0.0,
            heap_usage_mb: 0.0,
            battery_level: UNKNOWN_BATTERY_LEVEL,
            battery_temperature_c: 0.0,
            is_charging: false,
            uptime_ms: 0,
            timestamp: 0,
        }
    }
}

impl PerformanceSnapshot {
    /// Copy of `self` with the battery fields taken from `battery`.
    pub fn with_battery(&self, battery: &BatterySnapshot) -> Self {
        Self {
            battery_level: battery.level,
            battery_temperature_c: battery.temperature_c,
            is_charging: battery.is_charging,
            ..self.clone()
        }
    }

    /// One comma-separated line for the daily metrics log:
    /// timestamp, cpu, fps, frameMs, memMb, heapMb, battery, temperature, charging.
    pub fn to_log_line(&self) -> String {
        format!(
            "{},{:.1},{:.1},{:.2},{:.1},{:.1},{},{:.1},{}",
            self.timestamp,
            self.cpu_percent,
            self.fps,
            self.avg_frame_ms,
            self.memory_usage_mb,
            self.heap_usage_mb,
            self.battery_level,
            self.battery_temperature_c,
            self.is_charging
        )
    }
}
