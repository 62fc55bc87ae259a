//! Coordinator that owns every detector and publishes the two observable
//! feeds: the latest [`PerformanceSnapshot`] and the [`PerformanceEvent`]
//! stream.
//!
//! A process normally runs exactly one monitor, reached through the
//! module-level [`initialize`] / [`instance`] functions. Tests and embedders
//! that need isolation can hold a [`PerformanceMonitor`] directly.

mod context;
mod sampling;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::Stream;
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::battery::BatteryMonitor;
use crate::config::MonitorConfig;
use crate::detectors::{AnrDetector, CrashReporter, MemoryLeakDetector};
use crate::error::MonitorError;
use crate::logfiles::MetricsLog;
use crate::metrics::FrameTimeCollector;
use crate::telemetry::{
    EventBus, EventBusStats, EventSink, EventSubscription, PerformanceEvent, PerformanceSnapshot,
};

pub use context::{default_log_root, HostBindings, MonitorContext};
pub use sampling::{is_battery_drain, BATTERY_DRAIN_THRESHOLD};

use sampling::{forward_battery, SamplingLoop};

const MONITOR_WORKER_THREADS: usize = 2;

/// Running monitor instance.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    bus: Arc<EventBus>,
    snapshots: Arc<watch::Sender<PerformanceSnapshot>>,
    battery: BatteryMonitor,
    crash_reporter: Option<CrashReporter>,
    leak_detector: MemoryLeakDetector,
    anr_detector: AnrDetector,
    frames: Arc<FrameTimeCollector>,
    cancel: CancellationToken,
    runtime: Mutex<Option<Runtime>>,
    stopped: AtomicBool,
}

impl PerformanceMonitor {
    /// Build every component and begin monitoring.
    pub fn start(context: MonitorContext, config: MonitorConfig) -> Result<Self, MonitorError> {
        let config = config.validated();
        let started = Instant::now();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(MONITOR_WORKER_THREADS)
            .thread_name("perf-monitor")
            .enable_all()
            .build()
            .map_err(|err| MonitorError::RuntimeInit {
                reason: err.to_string(),
            })?;

        let bus = Arc::new(EventBus::default());
        let sink: Arc<dyn EventSink> = bus.clone();
        let snapshots = Arc::new(watch::Sender::new(PerformanceSnapshot::default()));

        let battery = BatteryMonitor::new(context.battery_source());
        let leak_detector =
            MemoryLeakDetector::new(runtime.handle().clone(), Arc::clone(&sink), config.leak_detection_delay());
        let anr_detector = AnrDetector::new(context.main_thread(), Arc::clone(&sink), config.anr_timeout());
        anr_detector.start()?;

        let crash_reporter = context.installs_crash_handler().then(|| {
            let reporter = CrashReporter::new(context.crash_dir(), Arc::clone(&sink));
            reporter.install();
            reporter
        });

        let frames = Arc::new(FrameTimeCollector::new(context.frame_scheduler()));
        frames.start();

        let cancel = CancellationToken::new();
        runtime.spawn(
            SamplingLoop {
                interval: config.metrics_interval(),
                started,
                snapshots: Arc::clone(&snapshots),
                frames: Arc::clone(&frames),
                metrics_log: MetricsLog::new(context.metrics_dir()),
                cancel: cancel.clone(),
            }
            .run(),
        );
        runtime.spawn(forward_battery(
            battery.subscribe(),
            Arc::clone(&snapshots),
            Arc::clone(&sink),
            cancel.clone(),
        ));

        tracing::info!(
            log_root = %context.log_root().display(),
            metrics_interval_ms = config.metrics_interval_ms,
            anr_timeout_ms = config.anr_timeout_ms,
            leak_detection_delay_ms = config.leak_detection_delay_ms,
            "[PerformanceMonitor] Started"
        );

        Ok(Self {
            config,
            bus,
            snapshots,
            battery,
            crash_reporter,
            leak_detector,
            anr_detector,
            frames,
            cancel,
            runtime: Mutex::new(Some(runtime)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Latest-value snapshot feed; starts at the current snapshot.
    pub fn metrics(&self) -> watch::Receiver<PerformanceSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn metrics_stream(&self) -> impl Stream<Item = PerformanceSnapshot> + Send {
        WatchStream::new(self.snapshots.subscribe())
    }

    pub fn current_snapshot(&self) -> PerformanceSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Event feed: the most recent events first, then live ones.
    pub fn events(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    pub fn event_stats(&self) -> EventBusStats {
        self.bus.stats()
    }

    /// Report `target` if it is still alive after the leak detection delay.
    pub fn watch_for_leaks<T: Any + Send + Sync>(&self, target: &Arc<T>, label: impl Into<String>) {
        if !self.is_running() {
            return;
        }
        self.leak_detector.watch(target, label);
    }

    pub fn emit_event(&self, event: PerformanceEvent) {
        self.bus.publish(event);
    }

    /// Publish a `MetricAlert` for an application-defined measurement.
    pub fn record_custom_metric(&self, name: impl Into<String>, detail: impl Into<String>) {
        self.bus.publish(PerformanceEvent::metric_alert(name, detail));
    }

    /// Stop every detector and background task. Idempotent.
    ///
    /// Must not be called from inside a monitor runtime task.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.anr_detector.stop();
        self.frames.stop();
        self.battery.unsubscribe();
        if let Some(reporter) = &self.crash_reporter {
            reporter.uninstall();
        }

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        tracing::info!("[PerformanceMonitor] Stopped");
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

static MONITOR: OnceCell<PerformanceMonitor> = OnceCell::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Start the process-wide monitor. The first successful call wins; later
/// calls return the existing instance and drop their arguments.
pub fn initialize(
    context: MonitorContext,
    config: MonitorConfig,
) -> Result<&'static PerformanceMonitor, MonitorError> {
    if let Some(monitor) = MONITOR.get() {
        log::debug!("[PerformanceMonitor] Already initialized");
        return Ok(monitor);
    }

    let monitor = MONITOR.get_or_try_init(|| PerformanceMonitor::start(context, config))?;
    INITIALIZED.store(true, Ordering::SeqCst);
    Ok(monitor)
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

pub fn instance() -> Option<&'static PerformanceMonitor> {
    MONITOR.get()
}

/// Like [`instance`], for callers that treat a missing monitor as an error.
pub fn try_instance() -> Result<&'static PerformanceMonitor, MonitorError> {
    MONITOR.get().ok_or(MonitorError::NotInitialized)
}

/// Ignored before [`initialize`].
pub fn watch_for_leaks<T: Any + Send + Sync>(target: &Arc<T>, label: impl Into<String>) {
    if let Some(monitor) = instance() {
        monitor.watch_for_leaks(target, label);
    }
}

/// Ignored before [`initialize`].
pub fn emit_event(event: PerformanceEvent) {
    if let Some(monitor) = instance() {
        monitor.emit_event(event);
    }
}

/// Ignored before [`initialize`].
pub fn record_custom_metric(name: impl Into<String>, detail: impl Into<String>) {
    if let Some(monitor) = instance() {
        monitor.record_custom_metric(name, detail);
    }
}

/// Stop the process-wide monitor. The instance stays registered, so
/// [`initialize`] does not start a second one.
pub fn shutdown() {
    if let Some(monitor) = instance() {
        monitor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{BatteryIntent, BatteryStatus};
    use crate::testing::{spawn_pump, wait_until};
    use std::time::Duration;

    fn quick_config() -> MonitorConfig {
        MonitorConfig {
            metrics_interval_ms: 40,
            anr_timeout_ms: 2_000,
            leak_detection_delay_ms: 30,
        }
    }

    fn start_monitor(root: &std::path::Path) -> (PerformanceMonitor, HostBindings) {
        let (context, bindings) = MonitorContext::standalone();
        let context = context.with_log_root(root).without_crash_handler();
        let monitor = PerformanceMonitor::start(context, quick_config()).unwrap();
        (monitor, bindings)
    }

    #[test]
    fn periodic_loop_publishes_snapshots_and_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, bindings) = start_monitor(dir.path());
        let pump = spawn_pump(bindings.looper.clone());

        assert!(wait_until(Duration::from_secs(5), || {
            monitor.current_snapshot().timestamp > 0
        }));
        let snapshot = monitor.current_snapshot();
        assert!((0.0..=100.0).contains(&snapshot.cpu_percent));
        assert!(snapshot.memory_usage_mb >= 0.0);

        let metrics_dir = dir.path().join("perf_logs");
        assert!(wait_until(Duration::from_secs(5), || {
            std::fs::read_dir(&metrics_dir)
                .map(|entries| entries.count() == 1)
                .unwrap_or(false)
        }));

        monitor.shutdown();
        pump.stop();
    }

    #[test]
    fn battery_broadcast_merges_into_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, bindings) = start_monitor(dir.path());

        bindings.battery.dispatch(BatteryIntent {
            level: Some(45),
            scale: Some(100),
            status: Some(BatteryStatus::Charging),
            temperature_tenths_c: Some(305),
        });

        assert!(wait_until(Duration::from_secs(5), || {
            monitor.current_snapshot().battery_level == 45
        }));
        let snapshot = monitor.current_snapshot();
        assert!(snapshot.is_charging);
        assert!((snapshot.battery_temperature_c - 30.5).abs() < 1e-4);
        monitor.shutdown();
    }

    #[test]
    fn custom_metrics_reach_late_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _bindings) = start_monitor(dir.path());

        monitor.record_custom_metric("db_query_ms", "412ms for feed page");
        let mut events = monitor.events();
        match events.try_recv() {
            Some(PerformanceEvent::MetricAlert { metric_name, detail, .. }) => {
                assert_eq!(metric_name, "db_query_ms");
                assert_eq!(detail, "412ms for feed page");
            }
            other => panic!("unexpected event {:?}", other),
        }
        monitor.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_leak_watching() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, _bindings) = start_monitor(dir.path());

        monitor.shutdown();
        monitor.shutdown();
        assert!(!monitor.is_running());

        let target = Arc::new(7u32);
        monitor.watch_for_leaks(&target, "AfterShutdown");
        std::thread::sleep(Duration::from_millis(200));
        assert!(monitor.events().drain().is_empty());
    }

    #[test]
    fn zero_config_values_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (context, _bindings) = MonitorContext::standalone();
        let context = context.with_log_root(dir.path()).without_crash_handler();
        let monitor = PerformanceMonitor::start(
            context,
            MonitorConfig {
                metrics_interval_ms: 0,
                ..quick_config()
            },
        )
        .unwrap();

        assert_eq!(
            monitor.config().metrics_interval_ms,
            crate::config::DEFAULT_METRICS_INTERVAL_MS
        );
        monitor.shutdown();
    }
}
