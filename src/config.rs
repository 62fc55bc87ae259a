//! Monitor configuration
//!
//! The three tunables are supplied once at initialization and never mutated
//! afterwards. They can be loaded from a JSON file so field builds can be
//! retuned without recompiling; any problem with the file falls back to the
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default sampling period for the periodic metrics loop
pub const DEFAULT_METRICS_INTERVAL_MS: u64 = 2_000;
/// Default watchdog timeout before the primary thread counts as stalled
pub const DEFAULT_ANR_TIMEOUT_MS: u64 = 5_000;
/// Default grace period before a watched object is checked for retention
pub const DEFAULT_LEAK_DETECTION_DELAY_MS: u64 = 6_000;

/// Performance monitor tunables (all values in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Period of the snapshot sampling loop
    pub metrics_interval_ms: u64,
    /// Watchdog timeout for the primary context ping
    pub anr_timeout_ms: u64,
    /// Delay between `watch_for_leaks` and the retention check
    pub leak_detection_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
            anr_timeout_ms: DEFAULT_ANR_TIMEOUT_MS,
            leak_detection_delay_ms: DEFAULT_LEAK_DETECTION_DELAY_MS,
        }
    }
}

impl MonitorConfig {
    /// Replace any zero value with its default
    ///
    /// A zero interval would spin the sampling loop and a zero timeout would
    /// report every cycle as a stall.
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let pick = |name: &str, value: u64, fallback: u64| {
            if value == 0 {
                log::warn!(
                    "[Config] {} must be positive, using default {}ms",
                    name,
                    fallback
                );
                fallback
            } else {
                value
            }
        };

        Self {
            metrics_interval_ms: pick(
                "metrics_interval_ms",
                self.metrics_interval_ms,
                defaults.metrics_interval_ms,
            ),
            anr_timeout_ms: pick("anr_timeout_ms", self.anr_timeout_ms, defaults.anr_timeout_ms),
            leak_detection_delay_ms: pick(
                "leak_detection_delay_ms",
                self.leak_detection_delay_ms,
                defaults.leak_detection_delay_ms,
            ),
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn anr_timeout(&self) -> Duration {
        Duration::from_millis(self.anr_timeout_ms)
    }

    pub fn leak_detection_delay(&self) -> Duration {
        Duration::from_millis(self.leak_detection_delay_ms)
    }

    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed and validated configuration, or the defaults if the file
    /// doesn't exist or the JSON is invalid. Missing fields take defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<MonitorConfig>(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config.validated()
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}
