//! Error types for routing and registration.

use leafbridge_core::{ChannelError, Retryable};
use leafbridge_crypto::SignError;
use leafbridge_identity::LifecycleError;
use thiserror::Error;

/// Errors returned by [`MessageRouter::route`](crate::MessageRouter::route).
#[derive(Debug, Error)]
pub enum RouteError {
    /// Leaf tag present but the device id is empty
    #[error("Leaf device id is empty")]
    EmptyDeviceId,

    /// Leaf tag present without the source module property
    #[error("Message for leaf device {device_id} has no source module id")]
    MissingSourceRoute {
        /// Leaf device id
        device_id: String,
    },

    /// Pending buffer full and the overflow policy refuses new messages
    #[error("Pending buffer of device {device_id} is full ({capacity} messages)")]
    BufferFull {
        /// Leaf device id
        device_id: String,
        /// Configured capacity
        capacity: usize,
    },

    /// Pass-through traffic could not be sent on the module output
    #[error("Failed to pass message through: {0}")]
    PassThrough(#[source] ChannelError),

    /// The registered device's channel did not accept the message
    #[error("Delivery failed for device {device_id}: {source}")]
    Delivery {
        /// Leaf device id
        device_id: String,
        /// Channel failure
        #[source]
        source: ChannelError,
    },

    /// Record refused the operation
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Errors raised while registering a device.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Device is not in the repository
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Registration request could not be encoded
    #[error("Failed to encode registration request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Registration request could not be sent after retries
    #[error("Failed to dispatch registration request for {device_id}: {source}")]
    Dispatch {
        /// Leaf device id
        device_id: String,
        /// Output failure
        #[source]
        source: ChannelError,
    },

    /// Credential or channel could not be established after retries
    #[error("Failed to set up channel for {device_id}: {source}")]
    Setup {
        /// Leaf device id
        device_id: String,
        /// Setup failure
        #[source]
        source: SetupError,
    },

    /// Channel was established but the buffered messages were not accepted
    #[error("Failed to flush {flushed} buffered messages for {device_id}: {source}")]
    FlushFailed {
        /// Leaf device id
        device_id: String,
        /// Messages in the flushed batch
        flushed: usize,
        /// Channel failure
        #[source]
        source: ChannelError,
    },

    /// Record refused the operation
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Gateway is shutting down
    #[error("Registration cancelled by shutdown")]
    Cancelled,
}

/// One failed attempt at turning a confirmation into a working channel.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Credential signing failed
    #[error("credential signing failed: {0}")]
    Sign(#[from] SignError),

    /// Channel could not be opened
    #[error("channel open failed: {0}")]
    Channel(#[from] ChannelError),
}

impl SetupError {
    /// Whether the attempt ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            SetupError::Sign(err) => err.is_timeout(),
            SetupError::Channel(err) => matches!(err, ChannelError::Timeout(_)),
        }
    }
}

impl Retryable for SetupError {
    fn is_retryable(&self) -> bool {
        match self {
            SetupError::Sign(err) => err.is_retryable(),
            SetupError::Channel(err) => err.is_retryable(),
        }
    }
}

/// Callback payload rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    /// Payload is not valid JSON or lacks required fields
    #[error("Invalid callback payload: {0}")]
    InvalidPayload(String),

    /// Device id is empty
    #[error("Callback device id is empty")]
    EmptyDeviceId,
}
