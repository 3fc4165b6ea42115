//! Core functionality for the LeafBridge identity-translation gateway.
//!
//! This crate provides the fundamental types, traits, and utilities used
//! across the LeafBridge workspace: configuration, logging, the message
//! model, the transport seams and per-device delivery lanes.

pub mod channel;
pub mod config;
pub mod error;
pub mod lane;
pub mod logging;
pub mod message;
pub mod retry;

pub use channel::{ChannelError, ChannelFactory, DeviceChannel, DeviceCredential, ModuleOutput};
pub use config::{
    BufferConfig, GatewayConfig, IdentityConfig, LogFormat, OverflowPolicy, RegistrationConfig,
    RoutingConfig, ServiceConfig, WorkloadConfig,
};
pub use error::{CoreError, Result};
pub use lane::{DeliveryLane, DeliveryReceipt};
pub use message::{LeafTag, LeafTagNames, Message};
pub use retry::{retry, RetryConfig, Retryable};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is before the epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
