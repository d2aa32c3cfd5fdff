//! Per-test harness fixture.
//!
//! Owns one broadcaster, one delivery loop, one exchange coordinator and one
//! drain protocol for a single input queue. The broadcaster lives as long as
//! the fixture and so outlives every receive worker, which
//! [`HarnessFixture::shutdown`] stops.
//!
//! ```no_run
//! use queue_harness::{HarnessFixture, HarnessSettings, OutgoingMessage};
//!
//! # async fn example() -> Result<(), queue_harness::HarnessError> {
//! let fixture = HarnessFixture::in_memory(HarnessSettings::default()).await?;
//! let delivered = fixture.exchange(OutgoingMessage::new("ping")).await?;
//! assert_eq!(delivered.body_as_str().unwrap(), "ping");
//! fixture.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::broadcaster::EventBroadcaster;
use crate::config::HarnessSettings;
use crate::delivery_loop::DeliveryLoop;
use crate::drain::{DrainReport, QueueDrain};
use crate::error::{HarnessError, LifecycleError};
use crate::exchange::{ExchangeCoordinator, ExchangeOutcome};
use crate::message::{DeliveredMessage, OutgoingMessage, QueueUrl, SendOptions};
use crate::providers::InMemoryTransport;
use crate::pump::QueueMessagePump;
use crate::transport::{QueueResolver, QueueTransport};
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "fixture_tests.rs"]
mod tests;

/// Running harness bound to one input queue
///
/// Await [`shutdown`](Self::shutdown) before dropping the fixture. It stops
/// the receive workers and waits for them to exit. A fixture dropped without
/// it only closes the shutdown channel: each worker leaves at its next idle
/// wait and is never joined, so a message arriving in between may still be
/// consumed.
pub struct HarnessFixture {
    settings: HarnessSettings,
    input_queue: QueueUrl,
    broadcaster: Arc<EventBroadcaster>,
    delivery_loop: DeliveryLoop,
    coordinator: ExchangeCoordinator,
    drain: QueueDrain,
}

impl HarnessFixture {
    /// Resolve and drain the input queue, then start the delivery loop.
    ///
    /// The returned fixture owns running workers; call
    /// [`shutdown`](Self::shutdown) when the test is done with it.
    pub async fn start(
        transport: Arc<dyn QueueTransport>,
        resolver: Arc<dyn QueueResolver>,
        settings: HarnessSettings,
    ) -> Result<Self, HarnessError> {
        settings.validate()?;

        let input_queue = resolver
            .resolve_queue_url(&settings.push.input_queue)
            .await
            .map_err(|source| LifecycleError::QueueResolution {
                address: settings.push.input_queue.clone(),
                source,
            })?;

        let drain = QueueDrain::new(Arc::clone(&transport), settings.drain.clone());
        drain.drain(&input_queue).await?;

        let broadcaster = Arc::new(EventBroadcaster::new());
        let pump = Arc::new(QueueMessagePump::new(transport, resolver));
        let delivery_loop = DeliveryLoop::new(pump, Arc::clone(&broadcaster));
        delivery_loop.init(settings.push.clone()).await?;
        delivery_loop.start(settings.runtime).await?;

        let coordinator = ExchangeCoordinator::new(Arc::clone(&broadcaster), settings.exchange);

        info!(input_queue = %input_queue, "Harness fixture started");
        Ok(Self {
            settings,
            input_queue,
            broadcaster,
            delivery_loop,
            coordinator,
            drain,
        })
    }

    /// Fixture over a fresh [`InMemoryTransport`] built from `settings.memory`
    pub async fn in_memory(settings: HarnessSettings) -> Result<Self, HarnessError> {
        let transport = Arc::new(InMemoryTransport::new(settings.memory.clone()));
        Self::start(transport.clone(), transport, settings).await
    }

    /// Send `message` to the input queue and wait for its delivery
    pub async fn exchange(
        &self,
        message: OutgoingMessage,
    ) -> Result<DeliveredMessage, HarnessError> {
        let options = SendOptions::new(self.settings.push.input_queue.clone());
        self.coordinator
            .exchange(|| self.delivery_loop.send(message, options))
            .await
    }

    /// Like [`exchange`](Self::exchange) but returns the tagged outcome
    pub async fn exchange_outcome(
        &self,
        message: OutgoingMessage,
    ) -> Result<ExchangeOutcome, HarnessError> {
        let options = SendOptions::new(self.settings.push.input_queue.clone());
        self.coordinator
            .exchange_outcome(|| self.delivery_loop.send(message, options))
            .await
    }

    /// Drain the input queue while the loop keeps running
    pub async fn drain_input_queue(&self) -> Result<DrainReport, HarnessError> {
        self.drain.drain(&self.input_queue).await
    }

    /// Stop the delivery loop; the fixture can still be inspected afterwards
    pub async fn shutdown(&self) -> Result<(), HarnessError> {
        self.delivery_loop.stop().await?;
        info!(input_queue = %self.input_queue, "Harness fixture shut down");
        Ok(())
    }

    pub fn input_queue(&self) -> &QueueUrl {
        &self.input_queue
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn delivery_loop(&self) -> &DeliveryLoop {
        &self.delivery_loop
    }

    pub fn coordinator(&self) -> &ExchangeCoordinator {
        &self.coordinator
    }
}
