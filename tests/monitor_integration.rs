//! End-to-end tests of the monitor against in-process host bindings.
//!
//! The process-wide singleton can only be initialized once per process, so
//! everything touching it lives in a single test.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use perf_monitor::battery::{BatteryIntent, BatteryStatus};
use perf_monitor::config::MonitorConfig;
use perf_monitor::monitor::{self, MonitorContext, PerformanceMonitor};
use perf_monitor::telemetry::{EventKind, PerformanceEvent};
use perf_monitor::testing::{spawn_pump, wait_until};

fn config(anr_timeout_ms: u64) -> MonitorConfig {
    MonitorConfig {
        metrics_interval_ms: 50,
        anr_timeout_ms,
        leak_detection_delay_ms: 50,
    }
}

fn discharging(level: i32) -> BatteryIntent {
    BatteryIntent {
        level: Some(level),
        scale: Some(100),
        status: Some(BatteryStatus::Discharging),
        temperature_tenths_c: Some(330),
    }
}

#[test]
fn global_monitor_lifecycle() {
    let dir = tempfile::tempdir().unwrap();

    // Calls before initialization are ignored.
    let early = Arc::new(String::from("early"));
    monitor::watch_for_leaks(&early, "BeforeInit");
    monitor::record_custom_metric("before_init", "ignored");
    assert!(monitor::instance().is_none());
    assert!(monitor::try_instance().is_err());

    let (context, host) = MonitorContext::standalone();
    let context = context.with_log_root(dir.path()).without_crash_handler();
    let first = monitor::initialize(context, config(5_000)).unwrap();
    assert!(monitor::is_initialized());

    let (other_context, _other_host) = MonitorContext::standalone();
    let second = monitor::initialize(other_context, config(10)).unwrap();
    assert!(std::ptr::eq(first, second));
    assert_eq!(second.config().anr_timeout_ms, 5_000);

    let pump = spawn_pump(host.looper.clone());
    let retained = Arc::new(vec![1u8; 1024]);
    monitor::watch_for_leaks(&retained, "RetainedBuffer");
    monitor::record_custom_metric("cold_start_ms", "840");

    let mut events = first.events();
    let mut seen = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        seen.extend(events.drain());
        seen.iter().any(|event| event.kind() == EventKind::MemoryLeak)
    }));

    assert!(seen.iter().all(|event| match event {
        PerformanceEvent::MetricAlert { metric_name, .. } => metric_name == "cold_start_ms",
        PerformanceEvent::MemoryLeak { label, .. } => label == "RetainedBuffer",
        _ => true,
    }));
    assert_eq!(
        seen.iter()
            .filter(|event| event.kind() == EventKind::MemoryLeak)
            .count(),
        1
    );

    monitor::shutdown();
    assert!(!first.is_running());
    assert!(monitor::instance().is_some());
    pump.stop();
    drop(retained);
}

#[test]
fn stalled_ui_thread_is_reported_through_the_event_feed() {
    let dir = tempfile::tempdir().unwrap();
    let (context, host) = MonitorContext::standalone();
    let context = context.with_log_root(dir.path()).without_crash_handler();
    let monitor = PerformanceMonitor::start(context, config(100)).unwrap();

    host.looper.post_named(
        "inflate_layout",
        Box::new(|| std::thread::sleep(Duration::from_millis(350))),
    );
    let pump = spawn_pump(host.looper.clone());

    let mut events = monitor.events();
    let mut anrs = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        anrs.extend(
            events
                .drain()
                .into_iter()
                .filter(|event| event.kind() == EventKind::Anr),
        );
        !anrs.is_empty()
    }));

    match &anrs[0] {
        PerformanceEvent::Anr { duration_ms, stack_trace, .. } => {
            assert!(*duration_ms >= 100);
            assert!(stack_trace.contains("inflate_layout"), "{}", stack_trace);
        }
        other => panic!("unexpected event {:?}", other),
    }

    monitor.shutdown();
    pump.stop();
}

#[test]
fn battery_drain_and_snapshots_reach_observers() {
    let dir = tempfile::tempdir().unwrap();
    let (context, host) = MonitorContext::standalone();
    let context = context.with_log_root(dir.path()).without_crash_handler();
    let monitor = PerformanceMonitor::start(context, config(5_000)).unwrap();
    let pump = spawn_pump(host.looper.clone());

    host.battery.dispatch(discharging(55));
    assert!(wait_until(Duration::from_secs(5), || {
        monitor.current_snapshot().battery_level == 55
    }));
    host.battery.dispatch(discharging(48));

    let mut events = monitor.events();
    let mut drains = Vec::new();
    assert!(wait_until(Duration::from_secs(5), || {
        drains.extend(
            events
                .drain()
                .into_iter()
                .filter(|event| event.kind() == EventKind::BatteryDrain),
        );
        !drains.is_empty()
    }));
    match &drains[0] {
        PerformanceEvent::BatteryDrain { level, temperature_c, .. } => {
            assert_eq!(*level, 48);
            assert!((temperature_c - 33.0).abs() < 1e-4);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let snapshot = runtime.block_on(async {
        let mut stream = Box::pin(monitor.metrics_stream());
        // The first item is the current value; the second is a fresh sample.
        stream.next().await;
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .ok()
            .flatten()
    });
    let snapshot = snapshot.expect("a fresh snapshot");
    assert_eq!(snapshot.battery_level, 48);
    assert!(snapshot.uptime_ms > 0);

    monitor.shutdown();
    pump.stop();
}

#[test]
fn overflowing_the_event_feed_keeps_the_newest_events() {
    let dir = tempfile::tempdir().unwrap();
    let (context, _host) = MonitorContext::standalone();
    let context = context.with_log_root(dir.path()).without_crash_handler();
    let monitor = PerformanceMonitor::start(context, config(5_000)).unwrap();

    let mut slow = monitor.events();
    for index in 0..50 {
        monitor.record_custom_metric("burst", index.to_string());
    }

    let received: Vec<String> = slow
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            PerformanceEvent::MetricAlert { detail, .. } => Some(detail),
            _ => None,
        })
        .collect();
    assert_eq!(received.len(), 40);
    assert_eq!(received.first().map(String::as_str), Some("10"));
    assert_eq!(received.last().map(String::as_str), Some("49"));
    assert_eq!(slow.missed(), 10);

    let late: Vec<PerformanceEvent> = monitor.events().drain();
    assert_eq!(late.len(), 8);

    monitor.shutdown();
}
