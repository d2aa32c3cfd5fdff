//! Delivery loop adapter.
//!
//! Owns the lifecycle of the background receive loop and routes its callbacks:
//! delivered messages and delivery errors go to the shared [`EventBroadcaster`],
//! critical faults go to a separate diagnostic [`Topic`] and are recorded. A
//! critical fault never reaches an exchange outcome.

use crate::broadcaster::{EventBroadcaster, SubscriptionId, Topic};
use crate::config::{PushRuntimeSettings, PushSettings};
use crate::error::HarnessError;
use crate::message::{
    CriticalPumpFault, DeliveredMessage, DeliveryError, OutgoingMessage, SendOptions,
};
use crate::pump::{MessagePump, PumpHandlers};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

#[cfg(test)]
#[path = "delivery_loop_tests.rs"]
mod tests;

/// Adapter between a [`MessagePump`] and the [`EventBroadcaster`]
pub struct DeliveryLoop {
    pump: Arc<dyn MessagePump>,
    broadcaster: Arc<EventBroadcaster>,
    critical_faults: Arc<Topic<CriticalPumpFault>>,
    recorded_faults: Arc<Mutex<Vec<CriticalPumpFault>>>,
}

impl DeliveryLoop {
    pub fn new(pump: Arc<dyn MessagePump>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            pump,
            broadcaster,
            critical_faults: Arc::new(Topic::new("critical_fault")),
            recorded_faults: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Hand the broadcaster-publishing handlers to the pump
    pub async fn init(&self, settings: PushSettings) -> Result<(), HarnessError> {
        let delivered_to = Arc::clone(&self.broadcaster);
        let errors_to = Arc::clone(&self.broadcaster);
        let critical_faults = Arc::clone(&self.critical_faults);
        let recorded_faults = Arc::clone(&self.recorded_faults);

        let handlers = PumpHandlers {
            on_message: Arc::new(move |message: DeliveredMessage| -> Result<(), DeliveryError> {
                delivered_to.publish_delivered(&message);
                Ok(())
            }),
            on_error: Arc::new(move |delivery_error: DeliveryError| {
                errors_to.publish_error(&delivery_error);
            }),
            on_critical_error: Arc::new(move |fault: CriticalPumpFault| {
                error!(
                    queue = %fault.queue,
                    worker_id = fault.worker_id,
                    consecutive_failures = fault.consecutive_failures,
                    reason = %fault.reason,
                    "Critical fault in delivery loop"
                );
                recorded_faults
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(fault.clone());
                critical_faults.publish(&fault);
            }),
        };

        self.pump.init(handlers, settings).await?;
        Ok(())
    }

    pub async fn start(&self, runtime: PushRuntimeSettings) -> Result<(), HarnessError> {
        self.pump.start(runtime).await?;
        info!(
            concurrency_limit = runtime.concurrency_limit,
            "Delivery loop running"
        );
        Ok(())
    }

    /// Stop all workers; safe to call repeatedly
    pub async fn stop(&self) -> Result<(), HarnessError> {
        self.pump.stop().await?;
        Ok(())
    }

    /// Send through the pump
    pub async fn send(
        &self,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> Result<(), HarnessError> {
        self.pump.send(message, options).await?;
        Ok(())
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    /// Observe critical faults as they happen
    pub fn on_critical_fault<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CriticalPumpFault) + Send + Sync + 'static,
    {
        self.critical_faults.subscribe(handler)
    }

    pub fn remove_critical_fault_handler(&self, id: SubscriptionId) -> bool {
        self.critical_faults.unsubscribe(id)
    }

    /// Every critical fault reported since the loop was created
    pub fn critical_faults(&self) -> Vec<CriticalPumpFault> {
        self.recorded_faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent critical fault as an error value
    pub fn last_critical_fault(&self) -> Option<HarnessError> {
        self.critical_faults()
            .pop()
            .map(HarnessError::CriticalPumpFault)
    }
}
