//! Message pump: the background receive loop that turns queue messages into
//! delivery callbacks.
//!
//! [`MessagePump`] is the contract the delivery loop adapter drives.
//! [`QueueMessagePump`] implements it over any [`QueueTransport`]:
//!
//! - `init` resolves the input (and optional error) queue and stores handlers
//! - `start` spawns up to `concurrency_limit` independent receive workers
//! - each worker receives a batch, decodes every payload from the JSON
//!   [`WireEnvelope`], invokes the message handler or the error handler, and
//!   deletes the message
//! - consecutive receive failures reaching the configured threshold raise a
//!   [`CriticalPumpFault`] through the critical error handler
//! - `stop` flips a watch channel and joins every worker; a receive already in
//!   flight completes before its worker exits
//!
//! State machine: `Created -> Initialized -> Running -> Stopped`.

use crate::config::{PushRuntimeSettings, PushSettings};
use crate::error::{LifecycleError, TransportError};
use crate::message::{
    CriticalPumpFault, DeliveredMessage, DeliveryError, OutgoingMessage, QueueUrl, RawMessage,
    SendOptions, Timestamp, WireEnvelope,
};
use crate::transport::{QueueResolver, QueueTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;

/// Invoked for every successfully decoded message
pub type OnMessage = Arc<dyn Fn(DeliveredMessage) -> Result<(), DeliveryError> + Send + Sync>;

/// Invoked for every message that failed decoding or handling
pub type OnError = Arc<dyn Fn(DeliveryError) + Send + Sync>;

/// Invoked for unrecoverable receive-loop faults
pub type OnCriticalError = Arc<dyn Fn(CriticalPumpFault) + Send + Sync>;

/// Callbacks handed to the pump on `init`
#[derive(Clone)]
pub struct PumpHandlers {
    pub on_message: OnMessage,
    pub on_error: OnError,
    pub on_critical_error: OnCriticalError,
}

/// Contract of the message pump / dispatcher
#[async_trait]
pub trait MessagePump: Send + Sync {
    /// Wire handlers and settings; allowed once, before `start`
    async fn init(&self, handlers: PumpHandlers, settings: PushSettings)
        -> Result<(), LifecycleError>;

    /// Launch the receive workers
    async fn start(&self, runtime: PushRuntimeSettings) -> Result<(), LifecycleError>;

    /// Signal workers to exit and wait for them; repeated calls are no-ops
    async fn stop(&self) -> Result<(), LifecycleError>;

    /// Send a message to a logical destination
    async fn send(&self, message: OutgoingMessage, options: SendOptions)
        -> Result<(), TransportError>;
}

/// Everything a worker needs, shared between workers
struct WorkerContext {
    transport: Arc<dyn QueueTransport>,
    handlers: PumpHandlers,
    settings: PushSettings,
    input_queue: QueueUrl,
    error_queue: Option<QueueUrl>,
}

enum PumpState {
    Created,
    Initialized(Arc<WorkerContext>),
    Running {
        shutdown: watch::Sender<bool>,
        workers: Vec<JoinHandle<()>>,
    },
    Stopped,
}

impl PumpState {
    fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized(_) => "initialized",
            Self::Running { .. } => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// [`MessagePump`] over a [`QueueTransport`]
pub struct QueueMessagePump {
    transport: Arc<dyn QueueTransport>,
    resolver: Arc<dyn QueueResolver>,
    state: Mutex<PumpState>,
}

impl QueueMessagePump {
    pub fn new(transport: Arc<dyn QueueTransport>, resolver: Arc<dyn QueueResolver>) -> Self {
        Self {
            transport,
            resolver,
            state: Mutex::new(PumpState::Created),
        }
    }

    /// Current lifecycle state name
    pub async fn state_name(&self) -> &'static str {
        self.state.lock().await.name()
    }

    async fn resolve(&self, address: &str) -> Result<QueueUrl, LifecycleError> {
        self.resolver
            .resolve_queue_url(address)
            .await
            .map_err(|source| LifecycleError::QueueResolution {
                address: address.to_string(),
                source,
            })
    }
}

#[async_trait]
impl MessagePump for QueueMessagePump {
    async fn init(
        &self,
        handlers: PumpHandlers,
        settings: PushSettings,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        match *state {
            PumpState::Created => {}
            PumpState::Stopped => return Err(LifecycleError::Stopped),
            _ => return Err(LifecycleError::AlreadyInitialized),
        }

        let input_queue = self.resolve(&settings.input_queue).await?;
        let error_queue = match settings.error_queue.as_deref() {
            Some(address) => Some(self.resolve(address).await?),
            None => None,
        };

        info!(
            input_queue = %input_queue,
            error_queue = ?error_queue.as_ref().map(QueueUrl::as_str),
            "Message pump initialized"
        );

        *state = PumpState::Initialized(Arc::new(WorkerContext {
            transport: Arc::clone(&self.transport),
            handlers,
            settings,
            input_queue,
            error_queue,
        }));
        Ok(())
    }

    async fn start(&self, runtime: PushRuntimeSettings) -> Result<(), LifecycleError> {
        if runtime.concurrency_limit == 0 {
            return Err(LifecycleError::InvalidConcurrency);
        }

        let mut state = self.state.lock().await;
        let context = match &*state {
            PumpState::Initialized(context) => Arc::clone(context),
            PumpState::Created => return Err(LifecycleError::NotInitialized),
            PumpState::Running { .. } => return Err(LifecycleError::AlreadyRunning),
            PumpState::Stopped => return Err(LifecycleError::Stopped),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers: Vec<JoinHandle<()>> = (0..runtime.concurrency_limit)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    Arc::clone(&context),
                    worker_id,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(
            queue = %context.input_queue,
            concurrency_limit = runtime.concurrency_limit,
            "Message pump started"
        );

        *state = PumpState::Running { shutdown, workers };
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, PumpState::Stopped);

        match previous {
            PumpState::Running { shutdown, workers } => {
                let _ = shutdown.send(true);
                let count = workers.len();
                for worker in workers {
                    if let Err(e) = worker.await {
                        error!(error = %e, "Receive worker terminated abnormally");
                    }
                }
                info!(workers = count, "Message pump stopped");
            }
            PumpState::Stopped => debug!("Message pump already stopped"),
            PumpState::Created | PumpState::Initialized(_) => {
                info!("Message pump stopped before it was started");
            }
        }

        Ok(())
    }

    async fn send(
        &self,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> Result<(), TransportError> {
        let queue = self.resolver.resolve_queue_url(&options.destination).await?;
        let payload = WireEnvelope::from_outgoing(&message).encode()?;

        self.transport.send(&queue, payload).await?;
        debug!(
            message_id = %message.message_id,
            queue = %queue,
            "Message sent"
        );
        Ok(())
    }
}

// ============================================================================
// Receive Worker
// ============================================================================

async fn run_worker(
    context: Arc<WorkerContext>,
    worker_id: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, queue = %context.input_queue, "Receive worker started");
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match context
            .transport
            .receive(&context.input_queue, context.settings.max_messages_per_receive)
            .await
        {
            Ok(batch) => {
                consecutive_failures = 0;
                if batch.is_empty() {
                    Some(context.settings.idle_poll_interval())
                } else {
                    for raw in batch {
                        context.process(raw).await;
                    }
                    None
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    worker_id,
                    queue = %context.input_queue,
                    consecutive_failures,
                    error = %e,
                    "Receive failed"
                );

                if consecutive_failures >= context.settings.critical_failure_threshold {
                    let fault = CriticalPumpFault {
                        queue: context.input_queue.clone(),
                        worker_id,
                        consecutive_failures,
                        reason: e.to_string(),
                        occurred_at: Timestamp::now(),
                    };
                    (context.handlers.on_critical_error)(fault);
                    consecutive_failures = 0;
                }

                Some(context.settings.failure_backoff())
            }
        };

        if let Some(wait) = wait {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    debug!(worker_id, "Receive worker exiting");
}

impl WorkerContext {
    async fn process(&self, raw: RawMessage) {
        let outcome = match WireEnvelope::decode(&raw.payload) {
            Ok(envelope) => {
                let message = envelope.into_delivered(self.input_queue.clone());
                debug!(message_id = %message.message_id, "Message received");
                (self.handlers.on_message)(message)
            }
            Err(reason) => Err(DeliveryError::decode(self.input_queue.clone(), reason)),
        };

        if let Err(delivery_error) = outcome {
            warn!(
                queue = %self.input_queue,
                message_id = ?delivery_error.message_id.as_ref().map(|id| id.as_str()),
                error = %delivery_error,
                "Message delivery failed"
            );
            (self.handlers.on_error)(delivery_error);
            self.forward_to_error_queue(&raw).await;
        }

        if let Err(e) = self.transport.delete(&self.input_queue, &raw.receipt_handle).await {
            // The message becomes visible again once its visibility timeout lapses
            warn!(
                queue = %self.input_queue,
                receipt = %raw.receipt_handle,
                error = %e,
                "Failed to delete processed message"
            );
        }
    }

    async fn forward_to_error_queue(&self, raw: &RawMessage) {
        let Some(error_queue) = &self.error_queue else {
            return;
        };

        if let Err(e) = self.transport.send(error_queue, raw.payload.clone()).await {
            error!(
                error_queue = %error_queue,
                error = %e,
                "Failed to forward message to error queue"
            );
        }
    }
}
