//! Error types for leaf device lifecycle operations.

use crate::device::DeviceStatus;
use thiserror::Error;

/// Errors raised when a lifecycle operation does not fit the record's state.
///
/// These never mutate the record; the caller decides whether the condition
/// is a protocol violation to log or a bug to surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Requested transition is not part of the lifecycle
    #[error("Invalid state transition for device {device_id}: {from} -> {to}")]
    InvalidTransition {
        /// Device identifier
        device_id: String,
        /// Current status
        from: DeviceStatus,
        /// Requested status
        to: DeviceStatus,
    },

    /// Message buffering is only possible before registration completes
    #[error("Device {device_id} does not buffer messages in status {status}")]
    NotBuffering {
        /// Device identifier
        device_id: String,
        /// Current status
        status: DeviceStatus,
    },

    /// Direct forwarding needs a registered device with a channel
    #[error("Device {device_id} cannot forward messages in status {status}")]
    NotRegistered {
        /// Device identifier
        device_id: String,
        /// Current status
        status: DeviceStatus,
    },
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
