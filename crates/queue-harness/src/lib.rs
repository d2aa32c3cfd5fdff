//! # Queue Harness
//!
//! Bridges an asynchronous queue delivery pipeline with synchronous test
//! assertions: send a message into a queue-backed transport and observe the
//! next delivered message or the next delivery error within a bounded wait,
//! while delivery itself runs on a continuously running receive loop.
//!
//! This library provides:
//! - Synchronous exchange over a push-based delivery stream
//! - Idempotent queue draining that tolerates rate-limited native purges
//! - Lifecycle management of the background receive loop
//! - An in-memory transport for tests and development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all harness operations
//! - [`message`] - Identifiers, wire envelope and delivery events
//! - [`config`] - Settings and configuration loading
//! - [`transport`] - Queue transport and resolution contracts
//! - [`providers`] - Transport implementations
//! - [`broadcaster`] - In-process event fan-out
//! - [`pump`] - Message pump contract and queue-backed receive loop
//! - [`delivery_loop`] - Adapter from pump callbacks to the broadcaster
//! - [`exchange`] - Send-then-wait coordinator
//! - [`drain`] - Queue drain protocol
//! - [`fixture`] - Per-test owner of all of the above
//! - [`telemetry`] - Tracing subscriber setup

// Module declarations
pub mod broadcaster;
pub mod config;
pub mod delivery_loop;
pub mod drain;
pub mod error;
pub mod exchange;
pub mod fixture;
pub mod message;
pub mod providers;
pub mod pump;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use broadcaster::{EventBroadcaster, EventKind, SubscriptionId, SubscriptionToken, Topic};
pub use config::{
    DrainSettings, HarnessSettings, InMemorySettings, PushRuntimeSettings, PushSettings,
    RetryBudget,
};
pub use delivery_loop::DeliveryLoop;
pub use drain::{DrainReport, PurgeOutcome, QueueDrain};
pub use error::{
    ConfigurationError, DrainError, HarnessError, LifecycleError, TransportError, ValidationError,
};
pub use exchange::{ExchangeCoordinator, ExchangeOutcome};
pub use fixture::HarnessFixture;
pub use message::{
    CriticalPumpFault, DeliveredMessage, DeliveryError, DeliveryErrorKind, MessageId,
    OutgoingMessage, QueueUrl, RawMessage, ReceiptHandle, SendOptions, Timestamp, WireEnvelope,
};
pub use providers::InMemoryTransport;
pub use pump::{MessagePump, PumpHandlers, QueueMessagePump};
pub use transport::{QueueResolver, QueueTransport};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
