//! Inbound message router.
//!
//! Untagged traffic is piped to the module output untouched. Leaf-tagged
//! traffic is stripped of its routing properties and then buffered or
//! forwarded according to the device's registration status; the first
//! message of an unseen device also starts its registration.

use crate::coordinator::{RegistrationCoordinator, RegistrationStart};
use crate::error::{CoordinatorError, RouteError};
use leafbridge_core::{BufferConfig, DeliveryReceipt, GatewayConfig, LeafTagNames, Message, ModuleOutput};
use leafbridge_identity::{lock_device, BufferOutcome, DeviceRepository, DeviceStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Pre-registration caching is disabled
    CachingDisabled,
    /// Pending buffer full under the drop-newest policy
    BufferFull,
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RouteAck {
    /// Untagged message sent on the module output
    PassedThrough,
    /// Message queued until the device is registered
    Buffered {
        /// Buffer length after queuing
        pending: usize,
    },
    /// Message accepted by the device channel
    Forwarded,
    /// Message discarded by the buffer policy
    Dropped {
        /// Discard cause
        reason: DropReason,
    },
    /// Device cannot receive traffic
    Undeliverable {
        /// Why the device is unusable
        reason: String,
    },
}

enum Routed {
    Register(Message),
    Buffer(BufferOutcome),
    Forward(DeliveryReceipt),
    Undeliverable(String),
}

/// Dispatches inbound messages by leaf tag and device status.
pub struct MessageRouter {
    repository: Arc<dyn DeviceRepository>,
    coordinator: Arc<RegistrationCoordinator>,
    output: Arc<dyn ModuleOutput>,
    output_name: String,
    tags: LeafTagNames,
    buffer: BufferConfig,
}

impl MessageRouter {
    /// Create a router sharing the coordinator's repository.
    pub fn new(
        config: &GatewayConfig,
        coordinator: Arc<RegistrationCoordinator>,
        output: Arc<dyn ModuleOutput>,
    ) -> Self {
        Self {
            repository: Arc::clone(coordinator.repository()),
            coordinator,
            output,
            output_name: config.routing.output_name.clone(),
            tags: LeafTagNames::from(&config.routing),
            buffer: config.buffer.clone(),
        }
    }

    /// Route one inbound message.
    pub async fn route(&self, message: Message) -> Result<RouteAck, RouteError> {
        let Some(tag) = self.tags.extract(&message) else {
            debug!(output = %self.output_name, "Piping non-leaf message");
            self.output
                .send_to_output(&self.output_name, message)
                .await
                .map_err(RouteError::PassThrough)?;
            return Ok(RouteAck::PassedThrough);
        };

        let device_id = tag.device_id;
        if device_id.trim().is_empty() {
            return Err(RouteError::EmptyDeviceId);
        }
        let source_route_id = tag
            .source_route_id
            .ok_or_else(|| RouteError::MissingSourceRoute {
                device_id: device_id.clone(),
            })?;

        let mut message = self.tags.strip(&message);
        let device = self.repository.get_or_create(&device_id);

        loop {
            let routed = {
                let mut record = lock_device(&device);
                match record.status() {
                    DeviceStatus::New => Routed::Register(message),
                    DeviceStatus::Registered => Routed::Forward(record.forward(message)?),
                    DeviceStatus::Rejected => {
                        record.record_drop();
                        Routed::Undeliverable(
                            record
                                .rejection_reason()
                                .unwrap_or("device rejected")
                                .to_string(),
                        )
                    }
                    _ => Routed::Buffer(record.buffer(message, &self.buffer)?),
                }
            };

            return match routed {
                Routed::Register(trigger) => {
                    let started = self
                        .coordinator
                        .begin_registration(&device_id, Some(source_route_id.clone()), trigger)
                        .await;
                    match started {
                        Ok(RegistrationStart::Started(outcome)) => self.acknowledge(&device_id, outcome),
                        Ok(RegistrationStart::AlreadyStarted(trigger)) => {
                            message = trigger;
                            continue;
                        }
                        Err(CoordinatorError::Lifecycle(err)) => Err(RouteError::Lifecycle(err)),
                        Err(err) => {
                            warn!(device_id = %device_id, error = %err, "Registration could not be started");
                            Ok(RouteAck::Undeliverable {
                                reason: err.to_string(),
                            })
                        }
                    }
                }
                Routed::Buffer(outcome) => self.acknowledge(&device_id, outcome),
                Routed::Forward(receipt) => {
                    receipt.wait().await.map_err(|source| {
                        warn!(device_id = %device_id, error = %source, "Leaf message delivery failed");
                        RouteError::Delivery {
                            device_id: device_id.clone(),
                            source,
                        }
                    })?;
                    debug!(device_id = %device_id, "Leaf message forwarded");
                    Ok(RouteAck::Forwarded)
                }
                Routed::Undeliverable(reason) => {
                    warn!(device_id = %device_id, reason = %reason, "Message for rejected device dropped");
                    Ok(RouteAck::Undeliverable { reason })
                }
            };
        }
    }

    fn acknowledge(&self, device_id: &str, outcome: BufferOutcome) -> Result<RouteAck, RouteError> {
        match outcome {
            BufferOutcome::Buffered { pending } => {
                debug!(device_id = %device_id, pending, "Message buffered while registration is pending");
                Ok(RouteAck::Buffered { pending })
            }
            BufferOutcome::EvictedOldest { pending } => {
                warn!(device_id = %device_id, pending, "Pending buffer full, evicted oldest message");
                Ok(RouteAck::Buffered { pending })
            }
            BufferOutcome::DroppedNewest { capacity } => {
                warn!(device_id = %device_id, capacity, "Pending buffer full, message dropped");
                Ok(RouteAck::Dropped {
                    reason: DropReason::BufferFull,
                })
            }
            BufferOutcome::CachingDisabled => Ok(RouteAck::Dropped {
                reason: DropReason::CachingDisabled,
            }),
            BufferOutcome::Refused { capacity } => Err(RouteError::BufferFull {
                device_id: device_id.to_string(),
                capacity,
            }),
        }
    }
}
