//! Windowed frame-interval and FPS estimation.
//!
//! The render loop supplies one timestamp per produced frame through a
//! [`FrameScheduler`]. FPS is only ever published over whole windows of at
//! least one second, trading per-frame precision for stable values.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

const FPS_WINDOW_NANOS: u64 = 1_000_000_000;
const NANOS_PER_MS: f64 = 1_000_000.0;

/// One-shot callback receiving the frame timestamp in nanoseconds.
pub type FrameCallback = Box<dyn FnOnce(u64) + Send>;

/// Per-frame callback source, e.g. Android's Choreographer.
///
/// A posted callback fires once, on the next frame.
pub trait FrameScheduler: Send + Sync {
    fn post_frame_callback(&self, callback: FrameCallback);
}

/// Frame scheduler driven by the host render loop.
///
/// The loop calls [`ManualFrameClock::tick`] once per presented frame.
/// Callbacks posted while a tick runs wait for the next tick.
#[derive(Default)]
pub struct ManualFrameClock {
    pending: Mutex<Vec<FrameCallback>>,
}

impl ManualFrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame to every pending callback; returns how many ran.
    pub fn tick(&self, frame_time_nanos: u64) -> usize {
        let callbacks = {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *pending)
        };
        let count = callbacks.len();
        for callback in callbacks {
            callback(frame_time_nanos);
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.len())
            .unwrap_or(0)
    }
}

impl FrameScheduler for ManualFrameClock {
    fn post_frame_callback(&self, callback: FrameCallback) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(callback);
    }
}

#[derive(Debug, Default)]
struct FrameWindow {
    previous_frame_nanos: Option<u64>,
    window_start_nanos: Option<u64>,
    frames_in_window: u32,
    fps: f32,
    avg_frame_ms: f32,
    last_frame_ms: f32,
}

impl FrameWindow {
    fn record(&mut self, frame_time_nanos: u64) {
        if let Some(previous) = self.previous_frame_nanos {
            let gap = frame_time_nanos.saturating_sub(previous);
            self.last_frame_ms = (gap as f64 / NANOS_PER_MS) as f32;
            self.frames_in_window += 1;
        }
        self.previous_frame_nanos = Some(frame_time_nanos);

        let start = *self.window_start_nanos.get_or_insert(frame_time_nanos);
        let span = frame_time_nanos.saturating_sub(start);
        if span >= FPS_WINDOW_NANOS {
            let frames = self.frames_in_window as f64;
            self.fps = (frames / (span as f64 / 1e9)) as f32;
            self.avg_frame_ms = if frames > 0.0 {
                (span as f64 / NANOS_PER_MS / frames) as f32
            } else {
                0.0
            };
            self.window_start_nanos = Some(frame_time_nanos);
            self.frames_in_window = 0;
        }
    }
}

struct CollectorInner {
    scheduler: Arc<dyn FrameScheduler>,
    running: AtomicBool,
    generation: AtomicU64,
    window: Mutex<FrameWindow>,
}

impl CollectorInner {
    fn lock_window(&self) -> MutexGuard<'_, FrameWindow> {
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn arm(self: &Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.post_frame_callback(Box::new(move |frame_time_nanos| {
            if let Some(inner) = weak.upgrade() {
                inner.on_frame(frame_time_nanos, generation);
            }
        }));
    }

    fn on_frame(self: &Arc<Self>, frame_time_nanos: u64, generation: u64) {
        // Callbacks left over from an earlier start/stop cycle die here.
        if !self.is_current(generation) {
            return;
        }
        self.lock_window().record(frame_time_nanos);

        if self.is_current(generation) {
            self.arm(generation);
        }
    }
}

/// FPS / frame-time collector driven by a [`FrameScheduler`].
pub struct FrameTimeCollector {
    inner: Arc<CollectorInner>,
}

impl FrameTimeCollector {
    pub fn new(scheduler: Arc<dyn FrameScheduler>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                scheduler,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                window: Mutex::new(FrameWindow::default()),
            }),
        }
    }

    /// Begin collecting. No-op while already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut window = self.inner.lock_window();
            window.previous_frame_nanos = None;
            window.window_start_nanos = None;
            window.frames_in_window = 0;
        }
        log::debug!("[FrameTimeCollector] Started (generation {})", generation);
        self.inner.arm(generation);
    }

    /// Stop collecting. Safe from any thread; pending callbacks become no-ops.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        log::debug!("[FrameTimeCollector] Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// FPS over the most recently completed window (0 before the first one).
    pub fn fps(&self) -> f32 {
        self.inner.lock_window().fps
    }

    /// Mean frame interval of the most recently completed window.
    pub fn avg_frame_ms(&self) -> f32 {
        self.inner.lock_window().avg_frame_ms
    }

    /// Most recent single inter-frame gap.
    pub fn last_frame_ms(&self) -> f32 {
        self.inner.lock_window().last_frame_ms
    }
}

impl Drop for FrameTimeCollector {
    fn drop(&mut self) {
        self.stop();
    }
}
