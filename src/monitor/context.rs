use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::battery::{BatteryBroadcaster, BatterySource};
use crate::logfiles::{CRASH_DIR_NAME, METRICS_DIR_NAME};
use crate::looper::{Looper, MainThread};
use crate::metrics::{FrameScheduler, ManualFrameClock};

const LOG_ROOT_DIR_NAME: &str = "perf_monitor";

/// `<local data dir>/perf_monitor`, or the temp dir when the platform has no
/// local data directory.
pub fn default_log_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOG_ROOT_DIR_NAME)
}

/// Host services the monitor attaches to.
#[derive(Clone)]
pub struct MonitorContext {
    log_root: PathBuf,
    battery_source: Arc<dyn BatterySource>,
    main_thread: Arc<dyn MainThread>,
    frame_scheduler: Arc<dyn FrameScheduler>,
    install_crash_handler: bool,
}

/// Concrete host-side handles created by [`MonitorContext::standalone`].
///
/// The host pumps `looper` from its UI loop, ticks `frames` once per
/// rendered frame and dispatches battery intents on `battery`.
#[derive(Clone)]
pub struct HostBindings {
    pub looper: Arc<Looper>,
    pub frames: Arc<ManualFrameClock>,
    pub battery: Arc<BatteryBroadcaster>,
}

impl MonitorContext {
    pub fn new(
        battery_source: Arc<dyn BatterySource>,
        main_thread: Arc<dyn MainThread>,
        frame_scheduler: Arc<dyn FrameScheduler>,
    ) -> Self {
        Self {
            log_root: default_log_root(),
            battery_source,
            main_thread,
            frame_scheduler,
            install_crash_handler: true,
        }
    }

    /// Context backed by in-process host bindings.
    pub fn standalone() -> (Self, HostBindings) {
        let bindings = HostBindings {
            looper: Arc::new(Looper::new()),
            frames: Arc::new(ManualFrameClock::new()),
            battery: Arc::new(BatteryBroadcaster::new()),
        };
        let context = Self::new(
            bindings.battery.clone(),
            bindings.looper.clone(),
            bindings.frames.clone(),
        );
        (context, bindings)
    }

    pub fn with_log_root(mut self, log_root: impl Into<PathBuf>) -> Self {
        self.log_root = log_root.into();
        self
    }

    /// Leave the process panic hook untouched.
    pub fn without_crash_handler(mut self) -> Self {
        self.install_crash_handler = false;
        self
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    pub fn crash_dir(&self) -> PathBuf {
        self.log_root.join(CRASH_DIR_NAME)
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.log_root.join(METRICS_DIR_NAME)
    }

    pub fn installs_crash_handler(&self) -> bool {
        self.install_crash_handler
    }

    pub(crate) fn battery_source(&self) -> Arc<dyn BatterySource> {
        Arc::clone(&self.battery_source)
    }

    pub(crate) fn main_thread(&self) -> Arc<dyn MainThread> {
        Arc::clone(&self.main_thread)
    }

    pub(crate) fn frame_scheduler(&self) -> Arc<dyn FrameScheduler> {
        Arc::clone(&self.frame_scheduler)
    }
}
