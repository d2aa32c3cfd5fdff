//! In-memory queue transport for testing and development.
//!
//! This module provides a fully functional in-memory transport that:
//! - Creates queues on demand when a logical address is resolved
//! - Hides received messages for a visibility timeout until they are deleted
//! - Rate limits native purges with a per-queue cooldown window
//! - Can inject receive failures to exercise critical fault handling
//!
//! Time is measured with `tokio::time::Instant` so paused-clock tests can
//! step over visibility timeouts and purge cooldowns.

use crate::config::{InMemorySettings, MAX_RECEIVE_BATCH};
use crate::error::{TransportError, ValidationError};
use crate::message::{QueueUrl, RawMessage, ReceiptHandle, Timestamp};
use crate::transport::{QueueResolver, QueueTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// URL scheme of queues created by the in-memory transport
pub const MEMORY_URL_PREFIX: &str = "memory://queues/";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueUrl, InMemoryQueue>,
    settings: InMemorySettings,
    pending_receive_failures: u32,
}

impl QueueStorage {
    fn new(settings: InMemorySettings) -> Self {
        Self {
            queues: HashMap::new(),
            settings,
            pending_receive_failures: 0,
        }
    }

    fn queue_mut(&mut self, queue: &QueueUrl) -> Result<&mut InMemoryQueue, TransportError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound {
                queue: queue.to_string(),
            })
    }
}

/// Internal state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages (FIFO order)
    visible: VecDeque<StoredMessage>,
    /// Received messages hidden until deleted or their visibility expires
    in_flight: HashMap<String, InFlightMessage>,
    /// When the last accepted native purge ran
    last_purge: Option<Instant>,
    deleted: u64,
}

impl InMemoryQueue {
    /// Return in-flight messages whose visibility timeout elapsed
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.visible_again_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(in_flight) = self.in_flight.remove(&receipt) {
                self.visible.push_back(in_flight.message);
            }
        }
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    payload: String,
    enqueued_at: Timestamp,
}

/// A message currently hidden from receivers
struct InFlightMessage {
    message: StoredMessage,
    visible_again_at: Instant,
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory transport implementing both queue operations and queue resolution
#[derive(Clone)]
pub struct InMemoryTransport {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryTransport {
    /// Create new in-memory transport with settings
    pub fn new(settings: InMemorySettings) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(settings))),
        }
    }

    /// Make the next `count` receive calls fail with a connection error
    pub fn fail_next_receives(&self, count: u32) {
        if let Ok(mut storage) = self.storage.write() {
            storage.pending_receive_failures = count;
        }
    }

    /// Number of visible messages, `None` if the queue does not exist
    pub fn visible_count(&self, queue: &QueueUrl) -> Option<usize> {
        let storage = self.storage.read().ok()?;
        storage.queues.get(queue).map(|q| q.visible.len())
    }

    /// Number of received-but-undeleted messages, `None` if the queue does not exist
    pub fn in_flight_count(&self, queue: &QueueUrl) -> Option<usize> {
        let storage = self.storage.read().ok()?;
        storage.queues.get(queue).map(|q| q.in_flight.len())
    }

    /// Enqueue time of the oldest visible message
    pub fn oldest_visible_enqueued_at(&self, queue: &QueueUrl) -> Option<Timestamp> {
        let storage = self.storage.read().ok()?;
        storage
            .queues
            .get(queue)?
            .visible
            .front()
            .map(|m| m.enqueued_at.clone())
    }

    /// Number of messages deleted through receipt handles
    pub fn deleted_count(&self, queue: &QueueUrl) -> Option<u64> {
        let storage = self.storage.read().ok()?;
        storage.queues.get(queue).map(|q| q.deleted)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, QueueStorage>, TransportError> {
        self.storage.read().map_err(|_| lock_poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, QueueStorage>, TransportError> {
        self.storage.write().map_err(|_| lock_poisoned())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemorySettings::default())
    }
}

fn lock_poisoned() -> TransportError {
    TransportError::ProviderError {
        code: "LockPoisoned".to_string(),
        message: "in-memory queue storage lock poisoned".to_string(),
    }
}

/// Validate a logical queue name (SQS rules: 1-80 of alphanumerics, hyphens, underscores)
fn validate_queue_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 80 {
        return Err(ValidationError::OutOfRange {
            field: "queue_name".to_string(),
            message: "must be 1-80 characters".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "queue_name".to_string(),
            message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
        });
    }

    Ok(())
}

#[async_trait]
impl QueueResolver for InMemoryTransport {
    async fn resolve_queue_url(&self, address: &str) -> Result<QueueUrl, TransportError> {
        validate_queue_name(address)?;
        let url = QueueUrl::new(format!("{}{}", MEMORY_URL_PREFIX, address))?;

        let mut storage = self.write()?;
        storage.queues.entry(url.clone()).or_insert_with(|| {
            debug!(queue = %url, "Creating in-memory queue");
            InMemoryQueue::default()
        });

        Ok(url)
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn send(&self, queue: &QueueUrl, payload: String) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        let queue = storage.queue_mut(queue)?;
        queue.visible.push_back(StoredMessage {
            payload,
            enqueued_at: Timestamp::now(),
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let mut storage = self.write()?;

        if storage.pending_receive_failures > 0 {
            storage.pending_receive_failures -= 1;
            return Err(TransportError::ConnectionFailed {
                message: "injected receive failure".to_string(),
            });
        }

        let visibility_timeout = storage.settings.visibility_timeout();
        let now = Instant::now();
        let queue = storage.queue_mut(queue)?;
        queue.release_expired(now);

        let take = max_messages.min(MAX_RECEIVE_BATCH) as usize;
        let mut received = Vec::with_capacity(take.min(queue.visible.len()));

        while received.len() < take {
            let Some(message) = queue.visible.pop_front() else {
                break;
            };

            let receipt = uuid::Uuid::new_v4().to_string();
            received.push(RawMessage {
                payload: message.payload.clone(),
                receipt_handle: ReceiptHandle::new(receipt.clone()),
            });
            queue.in_flight.insert(
                receipt,
                InFlightMessage {
                    message,
                    visible_again_at: now + visibility_timeout,
                },
            );
        }

        Ok(received)
    }

    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        let queue = storage.queue_mut(queue)?;

        match queue.in_flight.remove(receipt.as_str()) {
            Some(_) => {
                queue.deleted += 1;
                Ok(())
            }
            None => Err(TransportError::ReceiptNotFound {
                receipt: receipt.to_string(),
            }),
        }
    }

    async fn purge(&self, queue_url: &QueueUrl) -> Result<(), TransportError> {
        let mut storage = self.write()?;
        let cooldown = storage.settings.purge_cooldown();
        let now = Instant::now();
        let queue = storage.queue_mut(queue_url)?;

        if let Some(last) = queue.last_purge {
            if now.duration_since(last) < cooldown {
                return Err(TransportError::PurgeInProgress {
                    queue: queue_url.to_string(),
                });
            }
        }

        queue.visible.clear();
        queue.in_flight.clear();
        queue.last_purge = Some(now);
        Ok(())
    }

    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, TransportError> {
        let storage = self.read()?;
        let queue = storage
            .queues
            .get(queue)
            .ok_or_else(|| TransportError::QueueNotFound {
                queue: queue.to_string(),
            })?;

        let now = Instant::now();
        let reappearing = queue
            .in_flight
            .values()
            .filter(|m| m.visible_again_at <= now)
            .count();

        Ok((queue.visible.len() + reappearing) as u64)
    }
}
