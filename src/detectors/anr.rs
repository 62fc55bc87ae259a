//! Watchdog for stalls of the primary (UI) execution context.
//!
//! A dedicated thread repeatedly posts a trivial ping onto the primary
//! context and checks, one timeout later, whether it ran. An unanswered ping
//! is reported as an ANR together with a description of what the primary
//! context was doing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{log_monitor_error, MonitorError};
use crate::looper::MainThread;
use crate::telemetry::{now_timestamp_ms, EventSink, PerformanceEvent};

const WATCHDOG_THREAD_NAME: &str = "perf-anr-watchdog";

struct WatchdogHandle {
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

/// Primary-context stall detector.
pub struct AnrDetector {
    main_thread: Arc<dyn MainThread>,
    sink: Arc<dyn EventSink>,
    timeout: Duration,
    running: Arc<AtomicBool>,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl AnrDetector {
    pub fn new(main_thread: Arc<dyn MainThread>, sink: Arc<dyn EventSink>, timeout: Duration) -> Self {
        Self {
            main_thread,
            sink,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
            watchdog: Mutex::new(None),
        }
    }

    fn lock_watchdog(&self) -> MutexGuard<'_, Option<WatchdogHandle>> {
        self.watchdog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the watchdog thread. Calling it while running is a no-op.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut watchdog = self.lock_watchdog();
        if watchdog.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);

        let cycle = WatchdogCycle {
            main_thread: Arc::clone(&self.main_thread),
            sink: Arc::clone(&self.sink),
            timeout: self.timeout,
            running: Arc::clone(&self.running),
            cancel: cancel.clone(),
            clock: Instant::now(),
            last_response_ms: Arc::new(AtomicU64::new(0)),
            answered_seq: Arc::new(AtomicU64::new(0)),
        };

        let thread = thread::Builder::new()
            .name(WATCHDOG_THREAD_NAME.to_string())
            .spawn(move || cycle.run())
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                MonitorError::ThreadSpawn {
                    thread: WATCHDOG_THREAD_NAME.to_string(),
                    reason: err.to_string(),
                }
            })?;

        log::info!(
            "[AnrDetector] Watchdog started (timeout {}ms)",
            self.timeout.as_millis()
        );
        *watchdog = Some(WatchdogHandle { cancel, thread });
        Ok(())
    }

    /// Stop the watchdog. Safe from any thread; no event is emitted after
    /// this returns unless called from the watchdog thread itself.
    pub fn stop(&self) {
        let Some(handle) = self.lock_watchdog().take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        handle.cancel.cancel();

        if thread::current().id() == handle.thread.thread().id() {
            return;
        }
        if handle.thread.join().is_err() {
            log::error!("[AnrDetector] Watchdog thread panicked");
        }
        log::info!("[AnrDetector] Watchdog stopped");
    }
}

impl Drop for AnrDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the watchdog thread.
///
/// Timestamps are milliseconds since `clock`, so they are monotonic.
struct WatchdogCycle {
    main_thread: Arc<dyn MainThread>,
    sink: Arc<dyn EventSink>,
    timeout: Duration,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    clock: Instant,
    last_response_ms: Arc<AtomicU64>,
    answered_seq: Arc<AtomicU64>,
}

impl WatchdogCycle {
    fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                log_monitor_error(
                    &MonitorError::RuntimeInit {
                        reason: err.to_string(),
                    },
                    "anr_watchdog",
                );
                return;
            }
        };
        runtime.block_on(self.watch());
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    async fn watch(&self) {
        let timeout_ms = self.timeout.as_millis() as u64;
        self.last_response_ms.store(self.now_ms(), Ordering::SeqCst);
        let mut seq = 0u64;

        while self.running.load(Ordering::SeqCst) {
            seq += 1;
            let posted_ms = self.now_ms();
            self.post_ping(seq);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timeout) => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if self.answered_seq.load(Ordering::SeqCst) >= seq {
                continue;
            }

            let now_ms = self.now_ms();
            let silent_since = self.last_response_ms.load(Ordering::SeqCst).min(posted_ms);
            let duration_ms = now_ms.saturating_sub(silent_since).max(timeout_ms);
            let stack_trace = self.main_thread.stack_trace();

            log::warn!(
                "[AnrDetector] Primary thread unresponsive for {}ms: {}",
                duration_ms,
                stack_trace
            );
            self.sink.emit(PerformanceEvent::Anr {
                duration_ms,
                stack_trace,
                timestamp: now_timestamp_ms(),
            });
        }
    }

    fn post_ping(&self, seq: u64) {
        let clock = self.clock;
        let last_response_ms = Arc::clone(&self.last_response_ms);
        let answered_seq = Arc::clone(&self.answered_seq);
        self.main_thread.post(Box::new(move || {
            last_response_ms.store(clock.elapsed().as_millis() as u64, Ordering::SeqCst);
            answered_seq.fetch_max(seq, Ordering::SeqCst);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::Looper;
    use crate::testing::{spawn_pump, RecordingSink};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn anr_durations(sink: &RecordingSink) -> Vec<u64> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                PerformanceEvent::Anr { duration_ms, .. } => Some(duration_ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn responsive_primary_thread_reports_nothing() {
        let looper = Arc::new(Looper::new());
        let pump = spawn_pump(looper.clone());
        let sink = Arc::new(RecordingSink::new());
        let detector = AnrDetector::new(looper.clone(), sink.clone(), TIMEOUT);

        detector.start().unwrap();
        thread::sleep(TIMEOUT * 4);
        detector.stop();
        pump.stop();

        assert!(anr_durations(&sink).is_empty());
    }

    #[test]
    fn stalled_primary_thread_reports_once_per_window() {
        let looper = Arc::new(Looper::new());
        let sink = Arc::new(RecordingSink::new());
        let detector = AnrDetector::new(looper.clone(), sink.clone(), TIMEOUT);

        // Nobody pumps the looper, so every ping goes unanswered.
        detector.start().unwrap();
        thread::sleep(TIMEOUT * 3 + TIMEOUT / 2);
        detector.stop();

        let durations = anr_durations(&sink);
        assert!(
            (3..=4).contains(&durations.len()),
            "expected one stall report per elapsed window, got {:?}",
            durations
        );
        assert!(durations.iter().all(|&ms| ms >= TIMEOUT.as_millis() as u64));
        assert!(durations.windows(2).all(|pair| pair[0] <= pair[1]));

        // Consecutive reports are a full window apart (epoch ms truncation
        // may shave one millisecond).
        let stamps: Vec<u64> = sink.events().iter().map(|event| event.timestamp()).collect();
        assert!(
            stamps
                .windows(2)
                .all(|pair| pair[1] - pair[0] >= TIMEOUT.as_millis() as u64 - 1),
            "reports closer than one window: {:?}",
            stamps
        );
    }

    #[test]
    fn recovery_stops_reports() {
        let looper = Arc::new(Looper::new());
        let sink = Arc::new(RecordingSink::new());
        let detector = AnrDetector::new(looper.clone(), sink.clone(), TIMEOUT);

        detector.start().unwrap();
        thread::sleep(TIMEOUT * 2 + TIMEOUT / 2);
        assert!(!anr_durations(&sink).is_empty());

        let pump = spawn_pump(looper.clone());
        thread::sleep(TIMEOUT * 2);
        let settled = anr_durations(&sink).len();
        thread::sleep(TIMEOUT * 4);
        detector.stop();
        pump.stop();

        assert_eq!(anr_durations(&sink).len(), settled);
    }

    #[test]
    fn stop_prevents_further_reports() {
        let looper = Arc::new(Looper::new());
        let sink = Arc::new(RecordingSink::new());
        let detector = AnrDetector::new(looper.clone(), sink.clone(), TIMEOUT);

        detector.start().unwrap();
        detector.start().unwrap();
        assert!(detector.is_running());
        detector.stop();
        detector.stop();
        assert!(!detector.is_running());

        thread::sleep(TIMEOUT * 3);
        assert!(anr_durations(&sink).is_empty());
    }

    #[test]
    fn report_carries_primary_thread_description() {
        let looper = Arc::new(Looper::new());
        let sink = Arc::new(RecordingSink::new());
        let detector = AnrDetector::new(looper.clone(), sink.clone(), TIMEOUT);

        detector.start().unwrap();
        thread::sleep(TIMEOUT + TIMEOUT / 2);
        detector.stop();

        let events = sink.events();
        match events.first() {
            Some(PerformanceEvent::Anr { stack_trace, .. }) => {
                assert!(stack_trace.contains("tasks queued"), "{}", stack_trace)
            }
            other => panic!("expected an ANR, got {:?}", other),
        }
    }
}
