//! Contracts consumed from the queue transport client and queue resolution.
//!
//! The harness never talks to a queue service directly. Everything it needs
//! goes through these two traits so that cloud clients, the in-memory
//! provider and test doubles are interchangeable.

use crate::error::TransportError;
use crate::message::{QueueUrl, RawMessage, ReceiptHandle};
use async_trait::async_trait;

/// Primitive queue operations of the underlying transport client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue a raw payload
    async fn send(&self, queue: &QueueUrl, payload: String) -> Result<(), TransportError>;

    /// Receive up to `max_messages` currently visible messages
    ///
    /// Returns an empty list when nothing is visible; never blocks waiting
    /// for messages to arrive.
    async fn receive(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Permanently remove a received message
    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), TransportError>;

    /// Native purge of every message in the queue
    ///
    /// Fails with [`TransportError::PurgeInProgress`] while a previous purge
    /// is inside the provider's cooldown window.
    async fn purge(&self, queue: &QueueUrl) -> Result<(), TransportError>;

    /// Approximate number of currently visible messages
    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, TransportError>;
}

/// Resolution of logical endpoint addresses into queue URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueResolver: Send + Sync {
    async fn resolve_queue_url(&self, address: &str) -> Result<QueueUrl, TransportError>;
}
