//! Background tasks run on the monitor runtime: the periodic snapshot loop
//! and the battery forwarder.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::log_monitor_error;
use crate::logfiles::MetricsLog;
use crate::metrics::{CpuSampler, FrameTimeCollector, MemoryProbe};
use crate::telemetry::{
    now_timestamp_ms, BatterySnapshot, EventSink, PerformanceEvent, PerformanceSnapshot,
};

/// Level drop, in percentage points, that counts as abnormal drain.
pub const BATTERY_DRAIN_THRESHOLD: i32 = 5;

pub(crate) struct SamplingLoop {
    pub interval: Duration,
    pub started: Instant,
    pub snapshots: Arc<watch::Sender<PerformanceSnapshot>>,
    pub frames: Arc<FrameTimeCollector>,
    pub metrics_log: MetricsLog,
    pub cancel: CancellationToken,
}

impl SamplingLoop {
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "[PerformanceMonitor] Sampling loop started"
        );

        let sampler = Arc::new(SnapshotSampler {
            probes: Mutex::new((CpuSampler::new(), MemoryProbe::new())),
            started: self.started,
            snapshots: self.snapshots,
            frames: self.frames,
            metrics_log: self.metrics_log,
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // OS reads and the log append block, keep them off the workers.
            let sampler = Arc::clone(&sampler);
            if let Err(err) = tokio::task::spawn_blocking(move || sampler.sample_once()).await {
                tracing::warn!(error = %err, "[PerformanceMonitor] Sampling task failed");
            }
        }

        tracing::info!("[PerformanceMonitor] Sampling loop stopped");
    }
}

/// One tick of work: read the probes, publish, append to the daily log.
struct SnapshotSampler {
    probes: Mutex<(CpuSampler, MemoryProbe)>,
    started: Instant,
    snapshots: Arc<watch::Sender<PerformanceSnapshot>>,
    frames: Arc<FrameTimeCollector>,
    metrics_log: MetricsLog,
}

impl SnapshotSampler {
    fn sample_once(&self) -> PerformanceSnapshot {
        let (cpu_percent, usage) = {
            let mut probes = self
                .probes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let (cpu, memory) = &mut *probes;
            (cpu.sample(), memory.sample())
        };

        let mut snapshot = PerformanceSnapshot {
            cpu_percent,
            fps: self.frames.fps(),
            avg_frame_ms: self.frames.avg_frame_ms(),
            memory_usage_mb: usage.process_mb,
            heap_usage_mb: usage.heap_mb,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            timestamp: now_timestamp_ms(),
            ..PerformanceSnapshot::default()
        };

        // Battery fields are written only by the forwarder.
        self.snapshots.send_modify(|current| {
            snapshot.battery_level = current.battery_level;
            snapshot.battery_temperature_c = current.battery_temperature_c;
            snapshot.is_charging = current.is_charging;
            *current = snapshot.clone();
        });

        tracing::debug!(
            cpu = snapshot.cpu_percent,
            fps = snapshot.fps,
            memory_mb = snapshot.memory_usage_mb,
            "[PerformanceMonitor] Snapshot"
        );

        if let Err(err) = self.metrics_log.append(&snapshot) {
            log_monitor_error(&err, "metrics_log");
        }
        snapshot
    }
}

/// Forward every known battery reading into the snapshot feed.
pub(crate) async fn forward_battery(
    mut battery: watch::Receiver<BatterySnapshot>,
    snapshots: Arc<watch::Sender<PerformanceSnapshot>>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    loop {
        let reading = *battery.borrow_and_update();
        if reading.is_known() {
            apply_battery_update(&snapshots, sink.as_ref(), &reading);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = battery.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Merge `reading` into the current snapshot and report drain against the
/// level it replaces.
pub(crate) fn apply_battery_update(
    snapshots: &watch::Sender<PerformanceSnapshot>,
    sink: &dyn EventSink,
    reading: &BatterySnapshot,
) {
    let mut previous_level = reading.level;
    snapshots.send_modify(|current| {
        previous_level = current.battery_level;
        *current = current.with_battery(reading);
    });

    if is_battery_drain(previous_level, reading) {
        log::warn!(
            "[PerformanceMonitor] Battery drained from {}% to {}%",
            previous_level,
            reading.level
        );
        sink.emit(PerformanceEvent::BatteryDrain {
            level: reading.level,
            temperature_c: reading.temperature_c,
            timestamp: now_timestamp_ms(),
        });
    }
}

/// A drop of at least [`BATTERY_DRAIN_THRESHOLD`] points while discharging.
///
/// Unknown levels on either side never count.
pub fn is_battery_drain(previous_level: i32, reading: &BatterySnapshot) -> bool {
    previous_level >= 0
        && reading.level >= 0
        && !reading.is_charging
        && previous_level - reading.level >= BATTERY_DRAIN_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ManualFrameClock;
    use crate::testing::RecordingSink;

    fn reading(level: i32, is_charging: bool) -> BatterySnapshot {
        BatterySnapshot {
            level,
            temperature_c: 31.0,
            is_charging,
        }
    }

    #[test]
    fn drop_of_seven_points_emits_drain() {
        let snapshots = watch::Sender::new(PerformanceSnapshot::default());
        let sink = RecordingSink::new();

        apply_battery_update(&snapshots, &sink, &reading(55, false));
        apply_battery_update(&snapshots, &sink, &reading(48, false));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            PerformanceEvent::BatteryDrain { level, temperature_c, .. } => {
                assert_eq!(*level, 48);
                assert_eq!(*temperature_c, 31.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(snapshots.borrow().battery_level, 48);
    }

    #[test]
    fn charging_suppresses_drain() {
        let snapshots = watch::Sender::new(PerformanceSnapshot::default());
        let sink = RecordingSink::new();

        apply_battery_update(&snapshots, &sink, &reading(55, false));
        apply_battery_update(&snapshots, &sink, &reading(48, true));

        assert!(sink.events().is_empty());
        assert!(snapshots.borrow().is_charging);
    }

    #[test]
    fn first_reading_and_small_drops_are_quiet() {
        let snapshots = watch::Sender::new(PerformanceSnapshot::default());
        let sink = RecordingSink::new();

        apply_battery_update(&snapshots, &sink, &reading(80, false));
        apply_battery_update(&snapshots, &sink, &reading(76, false));
        apply_battery_update(&snapshots, &sink, &reading(72, false));

        assert!(sink.events().is_empty());
    }

    #[test]
    fn battery_update_keeps_other_fields() {
        let snapshots = watch::Sender::new(PerformanceSnapshot {
            cpu_percent: 37.5,
            fps: 58.0,
            ..PerformanceSnapshot::default()
        });
        let sink = RecordingSink::new();

        apply_battery_update(&snapshots, &sink, &reading(64, true));

        let current = snapshots.borrow().clone();
        assert_eq!(current.cpu_percent, 37.5);
        assert_eq!(current.fps, 58.0);
        assert_eq!(current.battery_level, 64);
        assert_eq!(current.battery_temperature_c, 31.0);
    }

    #[tokio::test]
    async fn sampling_loop_publishes_and_appends_daily_log() {
        let dir = tempfile::tempdir().unwrap();
        let metrics_log = MetricsLog::new(dir.path().join("perf_logs"));
        let snapshots = Arc::new(watch::Sender::new(PerformanceSnapshot {
            battery_level: 62,
            ..PerformanceSnapshot::default()
        }));
        let mut rx = snapshots.subscribe();
        let frames = Arc::new(FrameTimeCollector::new(Arc::new(ManualFrameClock::new())));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            SamplingLoop {
                interval: Duration::from_millis(20),
                started: Instant::now(),
                snapshots: Arc::clone(&snapshots),
                frames,
                metrics_log: metrics_log.clone(),
                cancel: cancel.clone(),
            }
            .run(),
        );

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("a snapshot within the timeout")
            .unwrap();
        cancel.cancel();
        task.await.unwrap();

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.battery_level, 62);
        assert!(snapshot.timestamp > 0);
        let files = std::fs::read_dir(metrics_log.dir()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn unknown_levels_never_count_as_drain() {
        assert!(!is_battery_drain(-1, &reading(40, false)));
        assert!(!is_battery_drain(60, &reading(-1, false)));
        assert!(is_battery_drain(60, &reading(55, false)));
    }
}
