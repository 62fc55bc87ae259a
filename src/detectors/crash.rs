//! Panic capture: persist a crash record and emit a `Crash` event before the
//! previous panic hook runs.

use std::any::Any;
use std::panic::{self, PanicHookInfo};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::log_monitor_error;
use crate::logfiles::{write_crash_record, CrashRecord};
use crate::looper::{capture_stack_trace, current_thread_name};
use crate::telemetry::{now_timestamp_ms, EventSink, PerformanceEvent};

/// Process exit status used when no previous panic hook exists to forward to.
pub const CRASH_EXIT_CODE: i32 = 10;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Process-wide panic handler.
///
/// Clones share one installation.
#[derive(Clone)]
pub struct CrashReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    crash_dir: PathBuf,
    sink: Arc<dyn EventSink>,
    installed: AtomicBool,
    previous: Mutex<Option<PanicHook>>,
}

impl CrashReporter {
    pub fn new(crash_dir: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                crash_dir: crash_dir.into(),
                sink,
                installed: AtomicBool::new(false),
                previous: Mutex::new(None),
            }),
        }
    }

    pub fn crash_dir(&self) -> &Path {
        &self.inner.crash_dir
    }

    pub fn is_installed(&self) -> bool {
        self.inner.installed.load(Ordering::SeqCst)
    }

    /// Install the panic hook, keeping the current one to forward to.
    ///
    /// Idempotent. Must not be called from a panicking thread.
    pub fn install(&self) {
        if self.inner.installed.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = panic::take_hook();
        *self.inner.lock_previous() = Some(previous);

        let inner = Arc::clone(&self.inner);
        panic::set_hook(Box::new(move |info| inner.on_panic(info)));
        log::info!(
            "[CrashReporter] Installed, records go to {}",
            self.inner.crash_dir.display()
        );
    }

    /// Restore the hook that was active before [`CrashReporter::install`].
    pub fn uninstall(&self) {
        if !self.inner.installed.swap(false, Ordering::SeqCst) {
            return;
        }

        let previous = self.inner.lock_previous().take();
        // Drops our hook; the default one is reinstalled when there is nothing
        // to restore.
        let _ours = panic::take_hook();
        if let Some(previous) = previous {
            panic::set_hook(previous);
        }
        log::info!("[CrashReporter] Uninstalled");
    }

    /// Persist and emit a crash without going through the panic hook.
    ///
    /// Returns the written file, or `None` when writing failed.
    pub fn report(
        &self,
        thread_name: &str,
        message: &str,
        stack_trace: &str,
    ) -> Option<PathBuf> {
        self.inner.report(thread_name, message, stack_trace)
    }
}

impl ReporterInner {
    fn lock_previous(&self) -> MutexGuard<'_, Option<PanicHook>> {
        self.previous
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_panic(&self, info: &PanicHookInfo<'_>) {
        let thread_name = current_thread_name();
        let message = panic_message(info.payload());
        let location = info
            .location()
            .map(|location| location.to_string())
            .unwrap_or_else(|| "<unknown location>".to_string());
        let stack_trace = format!("at {}\n{}", location, capture_stack_trace());

        self.report(&thread_name, &message, &stack_trace);

        match self.lock_previous().as_ref() {
            Some(previous) => previous(info),
            None => {
                log::error!(
                    "[CrashReporter] No previous panic hook, exiting with {}",
                    CRASH_EXIT_CODE
                );
                std::process::exit(CRASH_EXIT_CODE);
            }
        }
    }

    fn report(&self, thread_name: &str, message: &str, stack_trace: &str) -> Option<PathBuf> {
        let timestamp = now_timestamp_ms();
        let record = CrashRecord {
            thread_name: thread_name.to_string(),
            message: message.to_string(),
            stack_trace: stack_trace.to_string(),
            timestamp_ms: timestamp,
        };

        let written = match write_crash_record(&self.crash_dir, &record) {
            Ok(path) => {
                log::error!(
                    "[CrashReporter] Thread '{}' crashed: {} (saved to {})",
                    thread_name,
                    message,
                    path.display()
                );
                Some(path)
            }
            Err(err) => {
                log_monitor_error(&err, "crash_reporter");
                None
            }
        };

        self.sink.emit(PerformanceEvent::Crash {
            thread_name: record.thread_name,
            message: record.message,
            stack_trace: record.stack_trace,
            timestamp,
        });
        written
    }
}

/// Text of a panic payload; `panic!` produces either `&str` or `String`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
