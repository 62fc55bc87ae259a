//! Battery state monitoring.
//!
//! The platform delivers battery-changed broadcasts through a
//! [`BatterySource`]; [`BatteryMonitor`] normalizes each raw intent into a
//! [`BatterySnapshot`] and republishes it as a latest-value stream. There is
//! no polling: nothing happens between broadcasts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::telemetry::{BatterySnapshot, UNKNOWN_BATTERY_LEVEL};

/// Charging status reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl BatteryStatus {
    /// Map Android's `BatteryManager.BATTERY_STATUS_*` constants.
    pub fn from_android_code(code: i32) -> Self {
        match code {
            2 => BatteryStatus::Charging,
            3 => BatteryStatus::Discharging,
            4 => BatteryStatus::NotCharging,
            5 => BatteryStatus::Full,
            _ => BatteryStatus::Unknown,
        }
    }

    pub fn is_charging(&self) -> bool {
        matches!(self, BatteryStatus::Charging | BatteryStatus::Full)
    }
}

/// Raw battery-changed broadcast as the platform delivers it.
///
/// Every extra is optional; missing ones fall back to sentinel values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryIntent {
    pub level: Option<i32>,
    pub scale: Option<i32>,
    pub status: Option<BatteryStatus>,
    /// Tenths of a degree Celsius, as in `EXTRA_TEMPERATURE`
    pub temperature_tenths_c: Option<i32>,
}

impl BatteryIntent {
    /// Normalize into a snapshot.
    ///
    /// Level becomes `level * 100 / scale` when scale is positive, otherwise
    /// the raw level passes through. Known levels are clamped to 0..=100.
    pub fn normalize(&self) -> BatterySnapshot {
        let level = match (self.level, self.scale) {
            (Some(level), Some(scale)) if scale > 0 && level >= 0 => i64::from(level)
                .checked_mul(100)
                .map(|scaled| (scaled / i64::from(scale)).min(100) as i32)
                .unwrap_or(UNKNOWN_BATTERY_LEVEL),
            (Some(level), _) if level >= 0 => level.min(100),
            _ => UNKNOWN_BATTERY_LEVEL,
        };

        BatterySnapshot {
            level,
            temperature_c: self
                .temperature_tenths_c
                .map(|tenths| tenths as f32 / 10.0)
                .unwrap_or(0.0),
            is_charging: self.status.map(|s| s.is_charging()).unwrap_or(false),
        }
    }
}

/// Handle returned by [`BatterySource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type BatteryCallback = Box<dyn Fn(&BatteryIntent) + Send + Sync>;

/// Narrow interface over the OS battery broadcast.
pub trait BatterySource: Send + Sync {
    fn subscribe(&self, callback: BatteryCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process battery broadcast that platform glue feeds.
///
/// Behaves like a sticky broadcast: a new subscriber immediately receives
/// the most recent intent, if any was dispatched.
#[derive(Default)]
pub struct BatteryBroadcaster {
    next_id: AtomicU64,
    state: Mutex<BroadcasterState>,
}

#[derive(Default)]
struct BroadcasterState {
    sticky: Option<BatteryIntent>,
    subscribers: HashMap<SubscriptionId, Arc<BatteryCallback>>,
}

impl BatteryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, BroadcasterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an intent to every subscriber on the calling thread.
    pub fn dispatch(&self, intent: BatteryIntent) {
        let callbacks: Vec<Arc<BatteryCallback>> = {
            let mut state = self.lock_state();
            state.sticky = Some(intent);
            state.subscribers.values().cloned().collect()
        };
        for callback in callbacks {
            (*callback)(&intent);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_state().subscribers.len()
    }
}

impl BatterySource for BatteryBroadcaster {
    fn subscribe(&self, callback: BatteryCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback = Arc::new(callback);
        let sticky = {
            let mut state = self.lock_state();
            state.subscribers.insert(id, Arc::clone(&callback));
            state.sticky
        };
        if let Some(intent) = sticky {
            (*callback)(&intent);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock_state().subscribers.remove(&id);
    }
}

/// Republishes normalized battery state as a latest-value stream.
pub struct BatteryMonitor {
    source: Arc<dyn BatterySource>,
    subscription: Mutex<Option<SubscriptionId>>,
    latest: Arc<watch::Sender<BatterySnapshot>>,
}

impl BatteryMonitor {
    /// Subscribes to `source` once, for the lifetime of the monitor.
    pub fn new(source: Arc<dyn BatterySource>) -> Self {
        let latest = Arc::new(watch::Sender::new(BatterySnapshot::unknown()));
        let publisher = Arc::clone(&latest);
        let subscription = source.subscribe(Box::new(move |intent| {
            let snapshot = intent.normalize();
            log::debug!(
                "[BatteryMonitor] level={} temp={:.1}C charging={}",
                snapshot.level,
                snapshot.temperature_c,
                snapshot.is_charging
            );
            publisher.send_replace(snapshot);
        }));

        Self {
            source,
            subscription: Mutex::new(Some(subscription)),
            latest,
        }
    }

    /// Stop listening to the source. Later broadcasts leave `latest` as is.
    pub fn unsubscribe(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(id) = id {
            self.source.unsubscribe(id);
        }
    }

    pub fn latest(&self) -> BatterySnapshot {
        *self.latest.borrow()
    }

    /// Observe updates; the receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<BatterySnapshot> {
        self.latest.subscribe()
    }
}

impl Drop for BatteryMonitor {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
