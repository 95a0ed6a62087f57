//! In-process typed event bus.
//!
//! Decouples monitoring sessions from downstream consumers: storage and
//! analysis collaborators subscribe here instead of being called by the
//! loop. Dispatch is synchronous on the publisher's thread in registration
//! order; a misbehaving handler is logged and contained, never propagated
//! back into the loop. A bounded FIFO ring keeps recent events queryable.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Events the bus carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScreenshotCaptured,
    ChangeDetected,
    MonitorStarted,
    MonitorStopped,
    MonitorError,
}

/// One published event. Immutable once published.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Who published it, usually a session id.
    pub source: String,
    pub payload: Value,
    /// Frame bytes for captured/changed events; shared, not serialized.
    #[serde(skip)]
    pub frame: Option<Arc<Vec<u8>>>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            payload,
            frame: None,
        }
    }

    pub fn with_frame(mut self, frame: Arc<Vec<u8>>) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Handle returned by subscribe, usable for unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    by_type: HashMap<EventType, Vec<Subscriber>>,
    all: Vec<Subscriber>,
    history: VecDeque<Event>,
}

/// Default bound on retained history.
pub const DEFAULT_HISTORY_CAP: usize = 300;

/// Process-wide pub/sub with bounded history. One mutex guards the
/// subscriber registry and the ring; handlers run outside it so a handler
/// may publish follow-up events without deadlocking.
pub struct EventBus {
    inner: Mutex<BusInner>,
    next_id: AtomicU64,
    history_cap: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAP)
    }

    pub fn with_capacity(history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
            next_id: AtomicU64::new(1),
            history_cap,
        }
    }

    /// Subscribes to one event type. Handlers fire in registration order.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.by_type.entry(event_type).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Subscribes to every event type.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.all.push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        for subscribers in inner.by_type.values_mut() {
            subscribers.retain(|s| s.id != subscription.0);
        }
        inner.all.retain(|s| s.id != subscription.0);
    }

    /// Publishes an event: appends to history (evicting past the cap) and
    /// runs matching handlers synchronously. Handler failures and panics are
    /// logged, never propagated to the publisher.
    pub fn publish(&self, event: Event) {
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock().unwrap();
            inner.history.push_back(event.clone());
            while inner.history.len() > self.history_cap {
                inner.history.pop_front();
            }

            let typed = inner
                .by_type
                .get(&event.event_type)
                .into_iter()
                .flatten()
                .map(|s| s.handler.clone());
            let all = inner.all.iter().map(|s| s.handler.clone());
            typed.chain(all).collect()
        };

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(event_type = ?event.event_type, error = %e, "Event handler failed");
                }
                Err(_) => {
                    warn!(event_type = ?event.event_type, "Event handler panicked");
                }
            }
        }
    }

    /// Most recent events, oldest first, at most `limit`.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Most recent events of one type, oldest first, at most `limit`.
    pub fn history_of(&self, event_type: EventType, limit: usize) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        let matching: Vec<Event> = inner
            .history
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
