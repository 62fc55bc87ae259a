//! Event bus and value types shared by every detector.
//!
//! The bus multiplexes crash, ANR, leak, battery and custom alert events into
//! a small replay ring plus a bounded broadcast channel. Each subscriber
//! holds at most `replay + extra` events. Producers never block: when a
//! subscriber falls behind, the oldest buffered events are dropped for that
//! subscriber and the newest are kept.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub mod events;
pub mod snapshot;

pub use events::{EventKind, PerformanceEvent};
pub use snapshot::{BatterySnapshot, PerformanceSnapshot, UNKNOWN_BATTERY_LEVEL};

/// Most recent events replayed to every new subscriber.
pub const REPLAY_CAPACITY: usize = 8;
/// Live events buffered per subscriber beyond the replay.
pub const EXTRA_BUFFER_CAPACITY: usize = 32;

/// Destination for detector output.
///
/// Each detector holds its own sink handle; the coordinator hands every
/// detector the same [`EventBus`], which fans them into one stream.
/// Implementations must not block and must not panic, since the crash
/// reporter emits from inside the panic hook.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PerformanceEvent);
}

/// Counters describing bus activity for diagnostics surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusStats {
    pub recent: Vec<PerformanceEvent>,
    pub total_events: u64,
    pub evicted_from_replay: u64,
}

/// Multicast event bus with replay and drop-oldest overflow.
pub struct EventBus {
    tx: broadcast::Sender<PerformanceEvent>,
    replay: Mutex<VecDeque<PerformanceEvent>>,
    replay_capacity: usize,
    subscriber_capacity: usize,
    total_events: AtomicU64,
    evicted_events: AtomicU64,
}

impl EventBus {
    /// Every subscriber buffers up to `replay_capacity + extra_capacity`
    /// events before the oldest are dropped.
    pub fn new(replay_capacity: usize, extra_capacity: usize) -> Self {
        let subscriber_capacity = (replay_capacity + extra_capacity).max(1);
        // tokio rounds the channel up to a power of two; subscriptions trim
        // back down to `subscriber_capacity`.
        let (tx, _) = broadcast::channel(subscriber_capacity);
        Self {
            tx,
            replay: Mutex::new(VecDeque::with_capacity(replay_capacity)),
            replay_capacity,
            subscriber_capacity,
            total_events: AtomicU64::new(0),
            evicted_events: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock must not disable the bus, the crash
    // reporter publishes from the panic hook.
    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<PerformanceEvent>> {
        self.replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish without blocking. Sending with no subscribers is not an error.
    pub fn publish(&self, event: PerformanceEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        // Send under the replay lock so a concurrent subscribe sees each event
        // exactly once, either in its backlog or live.
        let mut replay = self.lock_replay();
        if self.replay_capacity > 0 {
            if replay.len() == self.replay_capacity {
                replay.pop_front();
                self.evicted_events.fetch_add(1, Ordering::Relaxed);
            }
            replay.push_back(event.clone());
        }
        let _ = self.tx.send(event);
    }

    /// Subscribe: replays the buffered recent events, then delivers live ones.
    pub fn subscribe(&self) -> EventSubscription {
        let replay = self.lock_replay();
        let pending = replay.iter().cloned().collect();
        let rx = self.tx.subscribe();
        EventSubscription {
            pending,
            capacity: self.subscriber_capacity,
            rx,
            missed: 0,
        }
    }

    /// Events a single subscriber can hold before dropping the oldest.
    pub fn subscriber_capacity(&self) -> usize {
        self.subscriber_capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn stats(&self) -> EventBusStats {
        let replay = self.lock_replay();
        EventBusStats {
            recent: replay.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            evicted_from_replay: self.evicted_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(REPLAY_CAPACITY, EXTRA_BUFFER_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: PerformanceEvent) {
        self.publish(event);
    }
}

/// Receiver side of the [`EventBus`].
///
/// Yields the replay backlog first, then live events. Events dropped because
/// this subscriber lagged are counted in [`EventSubscription::missed`].
pub struct EventSubscription {
    pending: VecDeque<PerformanceEvent>,
    capacity: usize,
    rx: broadcast::Receiver<PerformanceEvent>,
    missed: u64,
}

impl EventSubscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PerformanceEvent> {
        self.fill_pending();
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive. `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<PerformanceEvent> {
        self.fill_pending();
        self.pending.pop_front()
    }

    // Move everything the channel holds into `pending`, keeping only the
    // newest `capacity` events.
    fn fill_pending(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.pending.len() == self.capacity {
                        self.pending.pop_front();
                        self.missed += 1;
                    }
                    self.pending.push_back(event);
                }
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
            }
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        self.missed += skipped;
        log::debug!("[EventBus] Subscriber lagged, {} events dropped", skipped);
    }

    /// Drain everything currently pending.
    pub fn drain(&mut self) -> Vec<PerformanceEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events this subscriber lost to overflow so far.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn into_stream(self) -> impl Stream<Item = PerformanceEvent> + Send {
        let live = BroadcastStream::new(self.rx).filter_map(|result| result.ok());
        tokio_stream::iter(self.pending).chain(live)
    }
}

/// Wall-clock epoch milliseconds.
pub fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
