//! In-process publish/subscribe fan-out for delivery events.
//!
//! [`Topic`] is a mutex-guarded list of callbacks. Publishing takes a snapshot
//! of the list and releases the lock before invoking anyone, so handlers may
//! subscribe or unsubscribe (themselves included) while a notification is in
//! progress without deadlocking or skipping the remaining subscribers. A
//! panicking handler is caught and logged; the others still run.
//!
//! There is no buffering: a subscriber only sees events published after it
//! subscribed.

use crate::message::{DeliveredMessage, DeliveryError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, trace};

#[cfg(test)]
#[path = "broadcaster_tests.rs"]
mod tests;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifier of one subscription on a [`Topic`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A single event kind with synchronous, ordered fan-out
pub struct Topic<T> {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> Topic<T> {
    /// Create an empty topic; `name` only appears in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler; it is notified after all earlier subscribers
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        trace!(topic = self.name, subscription = id.0, "Subscribed");
        id
    }

    /// Remove a handler, returning false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        let removed = subscribers.len() != before;
        trace!(topic = self.name, subscription = id.0, removed, "Unsubscribed");
        removed
    }

    /// Notify every current subscriber in subscription order
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: &T) -> usize {
        let snapshot: Vec<(SubscriptionId, Handler<T>)> = self.lock().clone();

        let mut notified = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => notified += 1,
                Err(panic) => {
                    let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };

                    error!(
                        topic = self.name,
                        subscription = id.0,
                        panic = %panic_msg,
                        "Subscriber panicked while handling event"
                    );
                }
            }
        }

        notified
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Handler<T>)>> {
        // A handler never runs under this lock, so a poisoned list is still consistent
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The two event kinds the delivery loop reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageDelivered,
    DeliveryError,
}

/// Token returned by [`EventBroadcaster`] subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    kind: EventKind,
    id: SubscriptionId,
}

impl SubscriptionToken {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Fan-out channel for "message delivered" and "delivery error" events
///
/// Shared by all receive workers and all exchange calls; it must outlive both.
pub struct EventBroadcaster {
    delivered: Topic<DeliveredMessage>,
    errors: Topic<DeliveryError>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            delivered: Topic::new("message_delivered"),
            errors: Topic::new("delivery_error"),
        }
    }

    /// Subscribe to delivered messages
    pub fn on_message_delivered<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&DeliveredMessage) + Send + Sync + 'static,
    {
        SubscriptionToken {
            kind: EventKind::MessageDelivered,
            id: self.delivered.subscribe(handler),
        }
    }

    /// Subscribe to delivery errors
    pub fn on_delivery_error<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        SubscriptionToken {
            kind: EventKind::DeliveryError,
            id: self.errors.subscribe(handler),
        }
    }

    /// Remove a subscription of either kind
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        match token.kind {
            EventKind::MessageDelivered => self.delivered.unsubscribe(token.id),
            EventKind::DeliveryError => self.errors.unsubscribe(token.id),
        }
    }

    pub fn publish_delivered(&self, message: &DeliveredMessage) -> usize {
        self.delivered.publish(message)
    }

    pub fn publish_error(&self, error: &DeliveryError) -> usize {
        self.errors.publish(error)
    }

    /// Number of live subscriptions of one kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::MessageDelivered => self.delivered.subscriber_count(),
            EventKind::DeliveryError => self.errors.subscriber_count(),
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
