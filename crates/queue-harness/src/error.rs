//! Error types for harness operations.

use crate::message::{CriticalPumpFault, DeliveryError, QueueUrl};
use std::time::Duration;
use thiserror::Error;

/// Top-level error returned by exchange, drain and lifecycle operations
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("No delivery or delivery error observed after {attempts} attempts of {delay:?}")]
    TimedOut { attempts: u32, delay: Duration },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(DeliveryError),

    #[error("Drain of queue '{queue}' failed: {source}")]
    DrainFailed {
        queue: QueueUrl,
        #[source]
        source: DrainError,
    },

    #[error("Critical pump fault: {0}")]
    CriticalPumpFault(CriticalPumpFault),

    #[error("An exchange is already active on this coordinator")]
    ExchangeInProgress,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl HarnessError {
    /// Check if this is the distinct timeout condition
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Get the delivery error carried by this error, if any
    pub fn delivery_error(&self) -> Option<&DeliveryError> {
        match self {
            Self::DeliveryFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors reported by the queue transport client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    /// Native purge rejected because a purge ran within the cooldown window
    #[error("Purge already in progress for queue: {queue}")]
    PurgeInProgress { queue: String },

    #[error("Receipt handle not found or expired: {receipt}")]
    ReceiptNotFound { receipt: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Provider error: {code} - {message}")]
    ProviderError { code: String, message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check if error is transient and the operation could succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::PurgeInProgress { .. } => true,
            Self::ReceiptNotFound { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::ProviderError { .. } => true,
            Self::Serialization { .. } => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if this is the rate-limited purge rejection
    pub fn is_purge_in_progress(&self) -> bool {
        matches!(self, Self::PurgeInProgress { .. })
    }
}

/// Failures of the drain protocol
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Purge failed: {0}")]
    Purge(#[source] TransportError),

    #[error("Reading approximate message count failed: {0}")]
    Count(#[source] TransportError),

    #[error("Receive failed: {0}")]
    Receive(#[source] TransportError),

    #[error("Delete failed: {0}")]
    Delete(#[source] TransportError),

    #[error("Queue still reports {remaining} messages after {rounds} drain rounds")]
    RoundsExhausted { rounds: u32, remaining: u64 },
}

/// Misuse of the delivery loop state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Delivery loop is already initialized")]
    AlreadyInitialized,

    #[error("Delivery loop must be initialized before it is started")]
    NotInitialized,

    #[error("Delivery loop is already running")]
    AlreadyRunning,

    #[error("Delivery loop has been stopped and cannot be restarted")]
    Stopped,

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("Failed to resolve queue '{address}': {source}")]
    QueueResolution {
        address: String,
        #[source]
        source: TransportError,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
