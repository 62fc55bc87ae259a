//! Primary (UI) execution context seam.
//!
//! The watchdog needs two things from the primary thread: a way to post a
//! trivial task onto it, and a description of what it is doing when it
//! stalls. [`MainThread`] captures exactly that; [`Looper`] is the shipped
//! implementation for hosts that pump their own UI loop.

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::mpsc;

pub type MainThreadTask = Box<dyn FnOnce() + Send>;

/// Primary execution context observed by the ANR watchdog.
pub trait MainThread: Send + Sync {
    /// Queue `task` to run on the primary context. Must not block.
    fn post(&self, task: MainThreadTask);

    /// Human-readable description of what the primary context is executing.
    fn stack_trace(&self) -> String;
}

struct QueuedTask {
    label: &'static str,
    task: MainThreadTask,
}

struct ActiveTask {
    label: &'static str,
    thread_name: String,
    started: Instant,
}

/// Task queue drained by the host's primary thread.
///
/// The host calls [`Looper::run_pending`] from its UI loop. While a task
/// runs, the looper remembers its label and start time so a stall report can
/// name it.
pub struct Looper {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    queued: AtomicUsize,
    active: Mutex<Option<ActiveTask>>,
    last_pump_thread: Mutex<Option<String>>,
}

impl Looper {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            queued: AtomicUsize::new(0),
            active: Mutex::new(None),
            last_pump_thread: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTask>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a task with a label that shows up in stall reports.
    pub fn post_named(&self, label: &'static str, task: MainThreadTask) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueuedTask { label, task }).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Run every task queued so far on the calling thread; returns how many ran.
    ///
    /// Tasks posted by a running task are left for the next call.
    pub fn run_pending(&self) -> usize {
        let thread_name = current_thread_name();
        if let Ok(mut last) = self.last_pump_thread.lock() {
            *last = Some(thread_name.clone());
        }

        let batch: Vec<QueuedTask> = {
            let mut rx = self
                .rx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        let count = batch.len();
        for QueuedTask { label, task } in batch {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            *self.lock_active() = Some(ActiveTask {
                label,
                thread_name: thread_name.clone(),
                started: Instant::now(),
            });
            task();
            *self.lock_active() = None;
        }
        count
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

impl Default for Looper {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThread for Looper {
    fn post(&self, task: MainThreadTask) {
        self.post_named("task", task);
    }

    fn stack_trace(&self) -> String {
        let queued = self.queued();
        match self.lock_active().as_ref() {
            Some(active) => format!(
                "thread '{}' blocked in task '{}' for {}ms ({} tasks queued)",
                active.thread_name,
                active.label,
                active.started.elapsed().as_millis(),
                queued
            ),
            None => {
                let thread = self
                    .last_pump_thread
                    .lock()
                    .ok()
                    .and_then(|name| name.clone())
                    .unwrap_or_else(|| "<never pumped>".to_string());
                format!(
                    "thread '{}' is not draining its queue ({} tasks queued)",
                    thread, queued
                )
            }
        }
    }
}

/// Name of the calling thread, or its id when unnamed.
pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    thread
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", thread.id()))
}

/// Backtrace of the calling thread, captured regardless of `RUST_BACKTRACE`.
pub fn capture_stack_trace() -> String {
    Backtrace::force_capture().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn tasks_run_on_pumping_thread_in_order() {
        let looper = Looper::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..3 {
            let order = order.clone();
            looper.post(Box::new(move || order.lock().unwrap().push(index)));
        }
        assert_eq!(looper.queued(), 3);

        assert_eq!(looper.run_pending(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(looper.queued(), 0);
    }

    #[test]
    fn stack_trace_names_the_blocking_task() {
        let looper = Arc::new(Looper::new());
        let release = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicBool::new(false));

        {
            let release = release.clone();
            let entered = entered.clone();
            looper.post_named(
                "decode_frame",
                Box::new(move || {
                    entered.store(true, Ordering::SeqCst);
                    while !release.load(Ordering::SeqCst) {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                }),
            );
        }

        let pump = {
            let looper = looper.clone();
            std::thread::Builder::new()
                .name("ui".to_string())
                .spawn(move || looper.run_pending())
                .unwrap()
        };

        while !entered.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let trace = looper.stack_trace();
        release.store(true, Ordering::SeqCst);
        pump.join().unwrap();

        assert!(trace.contains("'ui'"), "{}", trace);
        assert!(trace.contains("decode_frame"), "{}", trace);
    }

    #[test]
    fn idle_looper_reports_queue_depth() {
        let looper = Looper::new();
        looper.post(Box::new(|| {}));
        let trace = looper.stack_trace();
        assert!(trace.contains("1 tasks queued"), "{}", trace);
    }
}
