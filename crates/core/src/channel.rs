//! Transport seams of the gateway.
//!
//! The cloud transport is an external collaborator. The core only sees three
//! traits: [`ModuleOutput`] (the module's own outputs on the edge hub),
//! [`ChannelFactory`] (opens a per-device channel from a credential) and
//! [`DeviceChannel`] (the opened channel itself).

use crate::message::Message;
use crate::retry::Retryable;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Authentication material for one leaf device.
///
/// The key is wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceCredential {
    device_id: String,
    key: String,
}

impl DeviceCredential {
    /// Bind a base64 symmetric key to a device id.
    pub fn new(device_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            key: key.into(),
        }
    }

    /// Device the credential belongs to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base64 symmetric key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("device_id", &self.device_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Errors raised by outputs and device channels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The upstream refused the credential (revoked, disabled or unknown device)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection or I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned status {status}: {message}")]
    Status {
        /// HTTP-like status code
        status: u16,
        /// Upstream description
        message: String,
    },

    /// Operation exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Channel has been shut down
    #[error("Channel closed")]
    Closed,

    /// Operation was abandoned because the gateway is shutting down
    #[error("Cancelled by shutdown")]
    Cancelled,
}

impl Retryable for ChannelError {
    fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Transport(_) | ChannelError::Timeout(_) => true,
            ChannelError::Status { status, .. } => *status == 429 || *status >= 500,
            ChannelError::Unauthorized(_) | ChannelError::Closed | ChannelError::Cancelled => false,
        }
    }
}

/// Outbound channel of one registered leaf device.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Send one message.
    async fn send(&self, message: Message) -> Result<(), ChannelError>;

    /// Send messages as one ordered batch.
    async fn send_batch(&self, messages: Vec<Message>) -> Result<(), ChannelError>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Opens per-device channels.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open a channel authenticated with `credential`.
    async fn open(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Arc<dyn DeviceChannel>, ChannelError>;
}

/// Named outputs of this module (pass-through traffic, registration requests).
#[async_trait]
pub trait ModuleOutput: Send + Sync {
    /// Send a message on the named output.
    async fn send_to_output(&self, output: &str, message: Message) -> Result<(), ChannelError>;
}
