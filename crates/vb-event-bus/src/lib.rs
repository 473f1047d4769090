//! Live subscriber fan-out
//!
//! The [`SubscriberHub`] is the message broker between the engine and the
//! connected clients (WebSocket sessions). The engine publishes state updates
//! and problem reports; every open [`Subscription`] receives them in order.
//! The hub also keeps the latest update so new subscribers can be greeted with
//! the current state, and counts live subscriptions because the poll interval
//! depends on whether anyone is watching.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};
use vb_core::{StateUpdate, SubscriberTransport};

/// Default channel capacity for subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber receives, tagged with `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    Update { update: StateUpdate },
    Problem { message: String, time: DateTime<Utc> },
}

struct HubInner {
    sender: broadcast::Sender<BusMessage>,
    latest: watch::Sender<Option<StateUpdate>>,
    /// Connection time per live subscription
    subscribers: DashMap<SubscriberId, DateTime<Utc>>,
    next_id: AtomicU64,
}

/// Cheap to clone; all clones share the same channels
#[derive(Clone)]
pub struct SubscriberHub {
    inner: Arc<HubInner>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(HubInner {
                sender,
                latest,
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a subscription; it counts as live until dropped
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.subscribers.insert(id, Utc::now());
        debug!(subscriber = %id, total = self.inner.subscribers.len(), "Subscriber connected");

        Subscription {
            id,
            rx: self.inner.sender.subscribe(),
            hub: Arc::clone(&self.inner),
        }
    }

    /// The most recent update, if any poll has succeeded yet
    pub fn latest(&self) -> Option<StateUpdate> {
        self.inner.latest.borrow().clone()
    }

    pub fn publish(&self, message: BusMessage) {
        trace!(receivers = self.inner.sender.receiver_count(), "Publishing bus message");
        // A send error only means nobody is listening
        let _ = self.inner.sender.send(message);
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberTransport for SubscriberHub {
    fn broadcast(&self, update: &StateUpdate) {
        self.inner.latest.send_replace(Some(update.clone()));
        self.publish(BusMessage::Update {
            update: update.clone(),
        });
    }

    fn broadcast_problem(&self, text: &str) {
        debug!(problem = text, "Broadcasting problem");
        self.publish(BusMessage::Problem {
            message: text.to_string(),
            time: Utc::now(),
        });
    }

    fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// A live subscription; unregisters itself on drop
pub struct Subscription {
    id: SubscriberId,
    rx: broadcast::Receiver<BusMessage>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, skipping over any this subscriber was too slow to take
    ///
    /// Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(subscriber = %self.id, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.subscribers.remove(&self.id);
        debug!(subscriber = %self.id, total = self.hub.subscribers.len(), "Subscriber disconnected");
    }
}
