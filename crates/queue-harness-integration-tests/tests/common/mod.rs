//! Common test utilities for queue-harness integration tests
//!
//! This module provides:
//! - Settings tuned for fast in-memory runs
//! - A transport wrapper that records calls and injects purge failures
//! - Polling helpers for asynchronous assertions

use async_trait::async_trait;
use queue_harness::{
    HarnessSettings, InMemoryTransport, QueueResolver, QueueTransport, QueueUrl, RawMessage,
    ReceiptHandle, RetryBudget, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

// ============================================================================
// Settings
// ============================================================================

/// Settings with short waits so a full fixture starts in milliseconds
///
/// Also installs the test tracing subscriber; set `RUST_LOG` to see output.
#[allow(dead_code)]
pub fn fast_settings() -> HarnessSettings {
    queue_harness::telemetry::init_tracing();

    let mut settings = HarnessSettings::default();
    settings.exchange = RetryBudget::new(200, Duration::from_millis(10));
    settings.drain.settle_interval_ms = 10;
    settings.push.idle_poll_interval_ms = 5;
    settings.push.failure_backoff_ms = 5;
    settings.push.critical_failure_threshold = 3;
    settings
}

// ============================================================================
// Recording Transport
// ============================================================================

/// In-memory transport that counts calls and can reject purges
#[derive(Clone)]
#[allow(dead_code)]
pub struct RecordingTransport {
    inner: InMemoryTransport,
    purge_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    purge_error: Arc<Mutex<Option<TransportError>>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            inner: InMemoryTransport::default(),
            purge_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            purge_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Every following purge fails with `error`
    pub fn reject_purges_with(&self, error: TransportError) {
        *self.purge_error.lock().unwrap() = Some(error);
    }

    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryTransport {
        &self.inner
    }
}

#[async_trait]
impl QueueTransport for RecordingTransport {
    async fn send(&self, queue: &QueueUrl, payload: String) -> Result<(), TransportError> {
        self.inner.send(queue, payload).await
    }

    async fn receive(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.inner.receive(queue, max_messages).await
    }

    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(queue, receipt).await
    }

    async fn purge(&self, queue: &QueueUrl) -> Result<(), TransportError> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self.purge_error.lock().unwrap().clone();
        match injected {
            Some(error) => Err(error),
            None => self.inner.purge(queue).await,
        }
    }

    async fn approximate_message_count(&self, queue: &QueueUrl) -> Result<u64, TransportError> {
        self.inner.approximate_message_count(queue).await
    }
}

#[async_trait]
impl QueueResolver for RecordingTransport {
    async fn resolve_queue_url(&self, address: &str) -> Result<QueueUrl, TransportError> {
        self.inner.resolve_queue_url(address).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Poll `condition` every 5ms for up to two seconds
#[allow(dead_code)]
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}
