//! Queue drain protocol.
//!
//! Empties a queue of every visible message and is safe to repeat:
//!
//! 1. Try the native purge. Providers allow one purge per queue per cooldown
//!    window and reject the rest with "purge in progress"; that rejection is
//!    tolerated because the manual loop below completes the job. Any other
//!    purge failure is fatal.
//! 2. Loop: wait the settle interval, read the approximate visible count and
//!    stop at zero; otherwise receive a batch, delete each message by receipt
//!    and go again. A receive returning nothing also ends the loop.
//!
//! A drain that never observes an empty queue gives up after `max_rounds`.

use crate::config::DrainSettings;
use crate::error::{DrainError, HarnessError, TransportError};
use crate::message::QueueUrl;
use crate::transport::QueueTransport;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;

/// What the native purge attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    Purged,
    AlreadyInProgress,
}

/// Summary of one drain call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub purge: PurgeOutcome,
    /// Manual receive-and-delete rounds; zero means the fallback never ran
    pub rounds: u32,
    pub removed: usize,
    pub last_approximate_count: u64,
}

impl DrainReport {
    pub fn used_fallback(&self) -> bool {
        self.rounds > 0
    }
}

/// Idempotent queue emptying over a [`QueueTransport`]
pub struct QueueDrain {
    transport: Arc<dyn QueueTransport>,
    settings: DrainSettings,
}

impl QueueDrain {
    pub fn new(transport: Arc<dyn QueueTransport>, settings: DrainSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &DrainSettings {
        &self.settings
    }

    /// Empty `queue`; see the module docs for the protocol
    pub async fn drain(&self, queue: &QueueUrl) -> Result<DrainReport, HarnessError> {
        self.run(queue)
            .await
            .map_err(|source| HarnessError::DrainFailed {
                queue: queue.clone(),
                source,
            })
    }

    async fn run(&self, queue: &QueueUrl) -> Result<DrainReport, DrainError> {
        let purge = self.purge(queue).await?;
        let mut report = DrainReport {
            purge,
            rounds: 0,
            removed: 0,
            last_approximate_count: 0,
        };

        loop {
            tokio::time::sleep(self.settings.settle_interval()).await;

            let approximate = self
                .transport
                .approximate_message_count(queue)
                .await
                .map_err(DrainError::Count)?;
            report.last_approximate_count = approximate;

            if approximate == 0 {
                break;
            }

            if report.rounds >= self.settings.max_rounds {
                return Err(DrainError::RoundsExhausted {
                    rounds: report.rounds,
                    remaining: approximate,
                });
            }

            let batch = self
                .transport
                .receive(queue, self.settings.batch_size)
                .await
                .map_err(DrainError::Receive)?;

            if batch.is_empty() {
                break;
            }

            for message in &batch {
                self.transport
                    .delete(queue, &message.receipt_handle)
                    .await
                    .map_err(DrainError::Delete)?;
            }

            report.rounds += 1;
            report.removed += batch.len();
            debug!(
                queue = %queue,
                round = report.rounds,
                deleted = batch.len(),
                approximate_count = approximate,
                "Drain round completed"
            );
        }

        info!(
            queue = %queue,
            purge = ?report.purge,
            rounds = report.rounds,
            removed = report.removed,
            "Queue drained"
        );
        Ok(report)
    }

    async fn purge(&self, queue: &QueueUrl) -> Result<PurgeOutcome, DrainError> {
        match self.transport.purge(queue).await {
            Ok(()) => Ok(PurgeOutcome::Purged),
            Err(e @ TransportError::PurgeInProgress { .. }) => {
                info!(
                    queue = %queue,
                    error = %e,
                    "Native purge rejected, falling back to manual drain"
                );
                Ok(PurgeOutcome::AlreadyInProgress)
            }
            Err(e) => Err(DrainError::Purge(e)),
        }
    }
}
