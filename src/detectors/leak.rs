//! Delayed retention checks for objects that should have been released.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::metrics::MemoryProbe;
use crate::telemetry::{now_timestamp_ms, EventSink, PerformanceEvent};

/// Extra wait after the configured delay before the probe is checked.
pub const LEAK_GRACE_PERIOD_MS: u64 = 100;

/// Non-owning handle that can only answer whether its target still exists.
#[derive(Clone)]
pub struct LivenessProbe {
    target: Weak<dyn Any + Send + Sync>,
}

impl LivenessProbe {
    pub fn observe<T: Any + Send + Sync>(target: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(target);
        Self { target: weak }
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

/// Decrements the pending counter even when the runtime drops the task.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Schedules one retention check per watched object on the monitor runtime.
pub struct MemoryLeakDetector {
    runtime: Handle,
    sink: Arc<dyn EventSink>,
    delay: Duration,
    pending: Arc<AtomicUsize>,
}

impl MemoryLeakDetector {
    pub fn new(runtime: Handle, sink: Arc<dyn EventSink>, delay: Duration) -> Self {
        Self {
            runtime,
            sink,
            delay,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Check `target` after the configured delay; emits `MemoryLeak` if some
    /// other owner still keeps it alive by then.
    ///
    /// The detector only holds a weak reference, so watching never delays
    /// the release it is checking for.
    pub fn watch<T: Any + Send + Sync>(&self, target: &Arc<T>, label: impl Into<String>) {
        let probe = LivenessProbe::observe(target);
        let label = label.into();
        let sink = Arc::clone(&self.sink);
        let wait = self.delay + Duration::from_millis(LEAK_GRACE_PERIOD_MS);

        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(Arc::clone(&self.pending));

        log::debug!("[MemoryLeakDetector] Watching '{}' for {:?}", label, wait);
        self.runtime.spawn(async move {
            let _guard = guard;
            tokio::time::sleep(wait).await;

            if !probe.is_alive() {
                log::debug!("[MemoryLeakDetector] '{}' released", label);
                return;
            }

            let retained_heap_kb = MemoryProbe::new().retained_heap_kb();
            log::warn!(
                "[MemoryLeakDetector] '{}' still alive after {:?} (heap {} KB)",
                label,
                wait,
                retained_heap_kb
            );
            sink.emit(PerformanceEvent::MemoryLeak {
                label,
                retained_heap_kb,
                timestamp: now_timestamp_ms(),
            });
        });
    }

    /// Checks scheduled but not finished yet.
    pub fn pending_checks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
