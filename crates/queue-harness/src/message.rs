//! Message types for harness operations including core domain identifiers.

use crate::error::{TransportError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Opaque address of a provisioned queue, as returned by queue resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create new queue URL with validation
    pub fn new(url: String) -> Result<Self, ValidationError> {
        if url.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        if url.len() > 2048 {
            return Err(ValidationError::OutOfRange {
                field: "queue_url".to_string(),
                message: "maximum 2048 characters".to_string(),
            });
        }

        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: "whitespace and control characters are not allowed".to_string(),
            });
        }

        Ok(Self(url))
    }

    /// Get queue URL as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages sent through the harness
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token for deleting a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String) -> Self {
        Self(handle)
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Transport-level Messages
// ============================================================================

/// A message as handed out by the transport client, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: String,
    pub receipt_handle: ReceiptHandle,
}

/// JSON envelope used by the queue message pump on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub id: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl WireEnvelope {
    /// Build the envelope for an outgoing message
    pub fn from_outgoing(message: &OutgoingMessage) -> Self {
        Self {
            id: message.message_id.as_str().to_string(),
            headers: message.headers.clone(),
            body: message.body.clone(),
        }
    }

    /// Serialize to the raw payload handed to the transport
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Serialization {
            message: e.to_string(),
        })
    }

    /// Parse a raw transport payload
    pub fn decode(payload: &str) -> Result<Self, String> {
        let envelope: Self = serde_json::from_str(payload).map_err(|e| e.to_string())?;
        if envelope.id.is_empty() {
            return Err("envelope is missing a message id".to_string());
        }
        Ok(envelope)
    }

    /// Turn a decoded envelope into the message observed by subscribers
    pub fn into_delivered(self, source_queue: QueueUrl) -> DeliveredMessage {
        DeliveredMessage {
            message_id: MessageId(self.id),
            headers: self.headers,
            body: self.body,
            source_queue,
            received_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the message pump
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub message_id: MessageId,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl OutgoingMessage {
    /// Create new message with body and a fresh message ID
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            message_id: MessageId::new(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Create a message whose body is the JSON encoding of `value`
    pub fn json<T: Serialize>(value: &T) -> Result<Self, TransportError> {
        let body = serde_json::to_vec(value).map_err(|e| TransportError::Serialization {
            message: e.to_string(),
        })?;
        Ok(Self::new(body))
    }

    /// Override the message ID
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }

    /// Add message header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// Options for sending a message through the message pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Logical address of the destination queue
    pub destination: String,
}

impl SendOptions {
    /// Create send options targeting a logical destination
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

/// A message received and decoded by the delivery loop
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    pub message_id: MessageId,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub source_queue: QueueUrl,
    pub received_at: Timestamp,
}

impl DeliveredMessage {
    /// Get the body as UTF-8 text
    pub fn body_as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Decode the body as JSON
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Stage of processing at which a delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Payload could not be decoded into a message
    Decode,
    /// Message decoded but the message handler rejected it
    Handler,
}

impl std::fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode => write!(f, "decode"),
            Self::Handler => write!(f, "handler"),
        }
    }
}

/// Error produced when the delivery loop fails to process a received message
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} failure on queue '{source_queue}': {reason}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message_id: Option<MessageId>,
    pub source_queue: QueueUrl,
    pub reason: String,
    pub occurred_at: Timestamp,
}

impl DeliveryError {
    /// Payload on `source_queue` could not be decoded
    pub fn decode(source_queue: QueueUrl, reason: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Decode,
            message_id: None,
            source_queue,
            reason: reason.into(),
            occurred_at: Timestamp::now(),
        }
    }

    /// Message handler failed for a decoded message
    pub fn handler(message: &DeliveredMessage, reason: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Handler,
            message_id: Some(message.message_id.clone()),
            source_queue: message.source_queue.clone(),
            reason: reason.into(),
            occurred_at: Timestamp::now(),
        }
    }
}

/// Unrecoverable receive-loop fault, reported on the diagnostic channel only
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "worker {worker_id} on queue '{queue}' failed {consecutive_failures} consecutive receives: {reason}"
)]
pub struct CriticalPumpFault {
    pub queue: QueueUrl,
    pub worker_id: usize,
    pub consecutive_failures: u32,
    pub reason: String,
    pub occurred_at: Timestamp,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
