//! Synchronous exchange coordinator.
//!
//! Turns the push-based delivery stream into a single-shot "send, then wait for
//! the next event of either kind" call:
//!
//! 1. subscribe a single-slot cell to delivered messages
//! 2. subscribe a second cell to delivery errors
//! 3. run the send action
//! 4. poll every `delay` until a cell is filled or `max_attempts` polls passed
//! 5. unsubscribe both (on every exit path, including a failing send action or
//!    the caller dropping the future)
//! 6. report the captured error, else the captured message, else `TimedOut`
//!
//! The first event after subscription wins, so a coordinator supports exactly
//! one active exchange at a time. An overlapping call fails fast with
//! [`HarnessError::ExchangeInProgress`]. Correlating events by message id
//! would lift the restriction.

use crate::broadcaster::{EventBroadcaster, SubscriptionToken};
use crate::config::RetryBudget;
use crate::error::HarnessError;
use crate::message::{DeliveredMessage, DeliveryError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod tests;

/// Result of one exchange attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Delivered(DeliveredMessage),
    Failed(DeliveryError),
    TimedOut,
}

impl ExchangeOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Coordinates one send with the next delivery event
pub struct ExchangeCoordinator {
    broadcaster: Arc<EventBroadcaster>,
    budget: RetryBudget,
    active: AtomicBool,
}

impl ExchangeCoordinator {
    pub fn new(broadcaster: Arc<EventBroadcaster>, budget: RetryBudget) -> Self {
        Self {
            broadcaster,
            budget,
            active: AtomicBool::new(false),
        }
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Send and wait for the resulting delivery
    ///
    /// # Errors
    ///
    /// - [`HarnessError::TimedOut`] when nothing arrived within the budget
    /// - [`HarnessError::DeliveryFailed`] carrying the original delivery error
    /// - the send action's own error, converted into [`HarnessError`]
    /// - [`HarnessError::ExchangeInProgress`] when another exchange is active
    pub async fn exchange<F, Fut, E>(&self, send: F) -> Result<DeliveredMessage, HarnessError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<HarnessError>,
    {
        match self.exchange_outcome(send).await? {
            ExchangeOutcome::Delivered(message) => Ok(message),
            ExchangeOutcome::Failed(delivery_error) => {
                Err(HarnessError::DeliveryFailed(delivery_error))
            }
            ExchangeOutcome::TimedOut => Err(HarnessError::TimedOut {
                attempts: self.budget.max_attempts,
                delay: self.budget.delay(),
            }),
        }
    }

    /// Send and wait, returning the tagged outcome
    ///
    /// Only a failing send action or an overlapping call produce `Err`.
    pub async fn exchange_outcome<F, Fut, E>(&self, send: F) -> Result<ExchangeOutcome, HarnessError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<HarnessError>,
    {
        let _active = ActiveExchange::acquire(&self.active)?;

        let delivered: Arc<OnceLock<DeliveredMessage>> = Arc::new(OnceLock::new());
        let failed: Arc<OnceLock<DeliveryError>> = Arc::new(OnceLock::new());

        let delivered_slot = Arc::clone(&delivered);
        let delivered_subscription = ScopedSubscription::new(
            &self.broadcaster,
            self.broadcaster.on_message_delivered(move |message| {
                let _ = delivered_slot.set(message.clone());
            }),
        );

        let failed_slot = Arc::clone(&failed);
        let error_subscription = ScopedSubscription::new(
            &self.broadcaster,
            self.broadcaster.on_delivery_error(move |delivery_error| {
                let _ = failed_slot.set(delivery_error.clone());
            }),
        );

        if let Err(e) = send().await {
            return Err(e.into());
        }

        let mut attempts = 0;
        while delivered.get().is_none() && failed.get().is_none() {
            if attempts >= self.budget.max_attempts {
                break;
            }
            tokio::time::sleep(self.budget.delay()).await;
            attempts += 1;
        }

        drop(error_subscription);
        drop(delivered_subscription);

        if let Some(delivery_error) = failed.get() {
            debug!(attempts, error = %delivery_error, "Exchange observed delivery error");
            return Ok(ExchangeOutcome::Failed(delivery_error.clone()));
        }

        if let Some(message) = delivered.get() {
            debug!(attempts, message_id = %message.message_id, "Exchange observed delivery");
            return Ok(ExchangeOutcome::Delivered(message.clone()));
        }

        warn!(
            attempts,
            delay_ms = self.budget.delay_ms,
            "Exchange timed out waiting for a delivery event"
        );
        Ok(ExchangeOutcome::TimedOut)
    }
}

/// Unsubscribes from the broadcaster when dropped
struct ScopedSubscription<'a> {
    broadcaster: &'a EventBroadcaster,
    token: SubscriptionToken,
}

impl<'a> ScopedSubscription<'a> {
    fn new(broadcaster: &'a EventBroadcaster, token: SubscriptionToken) -> Self {
        Self { broadcaster, token }
    }
}

impl Drop for ScopedSubscription<'_> {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.token);
    }
}

/// Marks the coordinator busy for the lifetime of one exchange
struct ActiveExchange<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ActiveExchange<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, HarnessError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HarnessError::ExchangeInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
