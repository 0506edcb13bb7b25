//! Topic-based publish/subscribe event bus.
//!
//! The bus is the only channel subsystems use to observe one another. It is
//! a plain synchronous dispatch table: `publish` invokes every handler for
//! the event, then every wildcard (`"*"`) handler, in subscription order.
//! Handler failures are isolated: an erroring handler never prevents later
//! handlers from running; the failure is logged and re-published as a
//! [`BUS_ERROR`] diagnostic event.
//!
//! Every published event is appended to a bounded history ring (oldest
//! entries evicted first) that consumers may query but not mutate.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::error::BusError;

/// Event name used for handler failure diagnostics.
pub const BUS_ERROR: &str = "bus:error";

/// Wildcard subscription name matching every event.
pub const WILDCARD: &str = "*";

const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Token identifying a subscription, returned by [`EventBus::subscribe`].
pub type SubscriptionId = u64;

type HandlerFn = Arc<dyn Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync>;

/// A single entry in the bus history ring.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Counters describing bus activity.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub total_events: u64,
    pub unique_events: usize,
    pub active_subscriptions: usize,
    pub wildcard_subscriptions: usize,
    pub history_size: usize,
    pub max_history_size: usize,
}

struct Subscription {
    id: SubscriptionId,
    handler: HandlerFn,
    once: bool,
}

#[derive(Default)]
struct BusState {
    handlers: HashMap<String, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
    history: VecDeque<EventRecord>,
    next_id: SubscriptionId,
    total_events: u64,
}

/// Topic-based publish/subscribe bus with bounded history.
pub struct EventBus {
    state: Mutex<BusState>,
    max_history: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(max_history: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            max_history,
        }
    }

    /// Publishes `data` under `event`.
    ///
    /// The event is recorded in history first, then delivered synchronously
    /// to every matching handler. Handlers run outside the bus lock, so a
    /// handler may itself publish without deadlocking.
    pub fn publish(&self, event: &str, data: Value) {
        let batch = {
            let mut state = self.state.lock();
            state.total_events += 1;
            state.history.push_back(EventRecord {
                event: event.to_string(),
                data: data.clone(),
                timestamp: Utc::now(),
            });
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }

            let mut batch: Vec<HandlerFn> = Vec::new();
            let mut drained = false;
            if let Some(subs) = state.handlers.get_mut(event) {
                batch.extend(subs.iter().map(|s| Arc::clone(&s.handler)));
                subs.retain(|s| !s.once);
                drained = subs.is_empty();
            }
            if drained {
                state.handlers.remove(event);
            }
            batch.extend(state.wildcard.iter().map(|s| Arc::clone(&s.handler)));
            state.wildcard.retain(|s| !s.once);
            batch
        };

        for handler in batch {
            if let Err(error) = handler(event, &data) {
                tracing::warn!(event, %error, "event handler failed");
                if event != BUS_ERROR {
                    self.publish(
                        BUS_ERROR,
                        json!({ "event": event, "error": error.to_string() }),
                    );
                }
            }
        }
    }

    /// Registers `handler` for `event`; `"*"` subscribes to every event.
    ///
    /// Returns a token accepted by [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_subscription(event, Arc::new(handler), false)
    }

    /// Like [`EventBus::subscribe`], but the handler is removed after its
    /// first delivery.
    pub fn once<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_subscription(event, Arc::new(handler), true)
    }

    fn add_subscription(&self, event: &str, handler: HandlerFn, once: bool) -> SubscriptionId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let subscription = Subscription { id, handler, once };
        if event == WILDCARD {
            state.wildcard.push(subscription);
        } else {
            state
                .handlers
                .entry(event.to_string())
                .or_default()
                .push(subscription);
        }
        id
    }

    /// Removes a specific subscription. Returns whether it was present.
    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        if event == WILDCARD {
            let before = state.wildcard.len();
            state.wildcard.retain(|s| s.id != id);
            return state.wildcard.len() != before;
        }
        let mut removed = false;
        let mut drained = false;
        if let Some(subs) = state.handlers.get_mut(event) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed = subs.len() != before;
            drained = subs.is_empty();
        }
        if drained {
            state.handlers.remove(event);
        }
        removed
    }

    /// Resolves with the next `event`'s data, or fails after `timeout`.
    pub async fn wait_for_event(
        &self,
        event: &str,
        timeout: Duration,
    ) -> std::result::Result<Value, BusError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.once(event, move |_event, data| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(data.clone());
            }
            Ok(())
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(BusError::Closed {
                event: event.to_string(),
            }),
            Err(_) => {
                self.unsubscribe(event, id);
                Err(BusError::Timeout {
                    event: event.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Returns history entries, optionally restricted to one event name.
    pub fn history(&self, event: Option<&str>) -> Vec<EventRecord> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .filter(|r| event.map_or(true, |e| r.event == e))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    /// Active subscription counts per event name (wildcards under `"*"`).
    pub fn subscription_counts(&self) -> HashMap<String, usize> {
        let state = self.state.lock();
        let mut counts: HashMap<String, usize> = state
            .handlers
            .iter()
            .map(|(event, subs)| (event.clone(), subs.len()))
            .collect();
        if !state.wildcard.is_empty() {
            counts.insert(WILDCARD.to_string(), state.wildcard.len());
        }
        counts
    }

    pub fn metrics(&self) -> BusMetrics {
        let state = self.state.lock();
        let unique: HashSet<&str> = state.history.iter().map(|r| r.event.as_str()).collect();
        BusMetrics {
            total_events: state.total_events,
            unique_events: unique.len(),
            active_subscriptions: state.handlers.values().map(Vec::len).sum::<usize>()
                + state.wildcard.len(),
            wildcard_subscriptions: state.wildcard.len(),
            history_size: state.history.len(),
            max_history_size: self.max_history,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
