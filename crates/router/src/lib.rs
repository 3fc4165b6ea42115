//! Message routing and device registration for LeafBridge.
//!
//! Leaf devices behind the gateway do not hold cloud identities of their
//! own. The first message a device sends triggers a registration request
//! toward the identity controller; its traffic is buffered until the
//! controller confirms, after which the buffer is replayed in order over a
//! device-specific channel and new traffic is forwarded directly.
//!
//! # Architecture
//!
//! 1. [`MessageRouter::route`] classifies inbound messages by leaf tag
//! 2. [`RegistrationCoordinator`] sends [`RegistrationRequest`]s and handles
//!    [`ConfirmationCallback`]s
//! 3. Confirmed devices get a credential and a channel, wrapped in a
//!    per-device delivery lane

#![warn(missing_docs)]

pub mod coordinator;
pub mod error;
pub mod registration;
pub mod router;


pub use coordinator::{ConfirmationOutcome, RegistrationCoordinator, RegistrationStart};
pub use error::{CoordinatorError, MalformedEventError, RouteError, SetupError};
pub use registration::{
    ConfirmationCallback, RegistrationOperation, RegistrationRequest, ResultClass,
    ITM_TYPE_PROPERTY, LEAF_EVENT,
};
pub use router::{DropReason, MessageRouter, RouteAck};
