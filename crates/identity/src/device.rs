//! Leaf device record and registration lifecycle.
//!
//! Every leaf device the gateway has seen is tracked by one [`DeviceRecord`].
//! The record owns the device's status, the messages buffered while its
//! identity is being set up, and the delivery lane once it is registered.
//!
//! # State Transitions
//!
//! ```text
//! New
//!     ↓ (begin)
//! Initializing
//!     ↓ (mark_awaiting_confirmation)
//! AwaitingConfirmation
//!     ↓ (confirm)
//! Confirmed
//!     ↓ (register)
//! Registered
//! ```
//!
//! Any status before `Registered` can move to `Rejected`, which is terminal.
//! No transition moves a record backwards.

use crate::error::{LifecycleError, LifecycleResult};
use leafbridge_core::{
    current_timestamp_ms, BufferConfig, DeliveryLane, DeliveryReceipt, Message, OverflowPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum number of state transitions to track in history.
const MAX_HISTORY_SIZE: usize = 100;

/// Registration status of a leaf device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// First seen, nothing started yet
    New,
    /// Registration request is being prepared
    Initializing,
    /// Registration request sent, waiting for the controller callback
    AwaitingConfirmation,
    /// Controller accepted the device, channel being established
    Confirmed,
    /// Channel open, traffic flows directly
    Registered,
    /// Controller or setup refused the device
    Rejected,
}

impl DeviceStatus {
    /// Whether messages for the device are buffered rather than forwarded.
    pub fn is_buffering(self) -> bool {
        matches!(
            self,
            DeviceStatus::New
                | DeviceStatus::Initializing
                | DeviceStatus::AwaitingConfirmation
                | DeviceStatus::Confirmed
        )
    }

    fn can_transition_to(self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (self, next),
            (New, Initializing)
                | (Initializing, AwaitingConfirmation)
                | (AwaitingConfirmation, Confirmed)
                | (Confirmed, Registered)
                | (New, Rejected)
                | (Initializing, Rejected)
                | (AwaitingConfirmation, Rejected)
                | (Confirmed, Rejected)
        )
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStatus::New => "New",
            DeviceStatus::Initializing => "Initializing",
            DeviceStatus::AwaitingConfirmation => "AwaitingConfirmation",
            DeviceStatus::Confirmed => "Confirmed",
            DeviceStatus::Registered => "Registered",
            DeviceStatus::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// Record of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous status
    pub from: DeviceStatus,
    /// New status
    pub to: DeviceStatus,
    /// Wall-clock time of the transition (ms since epoch)
    pub timestamp_ms: u64,
    /// Optional reason
    pub reason: Option<String>,
}

/// What happened to a message handed to [`DeviceRecord::buffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Message appended to the pending queue
    Buffered {
        /// Queue length after the append
        pending: usize,
    },
    /// Queue was full; the oldest message was evicted to make room
    EvictedOldest {
        /// Queue length after the append
        pending: usize,
    },
    /// Queue was full; the new message was discarded
    DroppedNewest {
        /// Configured capacity
        capacity: usize,
    },
    /// Queue was full and the overflow policy refuses new messages
    Refused {
        /// Configured capacity
        capacity: usize,
    },
    /// Caching is disabled; the message was discarded
    CachingDisabled,
}

/// Serializable view of a record, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Leaf device identifier
    pub device_id: String,
    /// Current status
    pub status: DeviceStatus,
    /// Module that first reported the device
    pub source_route_id: Option<String>,
    /// Messages waiting for registration
    pub pending_messages: usize,
    /// Messages discarded by the buffer or after rejection
    pub dropped_messages: u64,
    /// Why the device was rejected, if it was
    pub rejection_reason: Option<String>,
    /// Number of recorded transitions
    pub transitions: usize,
}

/// Per-device registration state.
#[derive(Debug)]
pub struct DeviceRecord {
    id: String,
    status: DeviceStatus,
    source_route_id: Option<String>,
    pending: VecDeque<Message>,
    channel: Option<DeliveryLane>,
    rejection_reason: Option<String>,
    requested_at: Option<Instant>,
    dropped_messages: u64,
    history: VecDeque<StateTransition>,
}

impl DeviceRecord {
    /// Create a record in status `New`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: DeviceStatus::New,
            source_route_id: None,
            pending: VecDeque::new(),
            channel: None,
            rejection_reason: None,
            requested_at: None,
            dropped_messages: 0,
            history: VecDeque::new(),
        }
    }

    /// Leaf device identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// Module that first reported the device.
    pub fn source_route_id(&self) -> Option<&str> {
        self.source_route_id.as_deref()
    }

    /// Number of buffered messages.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Buffered messages in arrival order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.pending.iter()
    }

    /// Delivery lane, present only once registered.
    pub fn channel(&self) -> Option<&DeliveryLane> {
        self.channel.as_ref()
    }

    /// Why the device was rejected.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// Messages discarded for this device so far.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages
    }

    /// Transition history, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Whether the record has been waiting for a callback longer than `max_age`.
    pub fn awaiting_longer_than(&self, max_age: Duration) -> bool {
        self.status == DeviceStatus::AwaitingConfirmation
            && self
                .requested_at
                .map(|at| at.elapsed() >= max_age)
                .unwrap_or(false)
    }

    /// `New -> Initializing`, recording the module that reported the device.
    pub fn begin(&mut self, source_route_id: Option<String>) -> LifecycleResult<()> {
        self.transition(DeviceStatus::Initializing, None)?;
        self.source_route_id = source_route_id;
        Ok(())
    }

    /// `Initializing -> AwaitingConfirmation`.
    pub fn mark_awaiting_confirmation(&mut self) -> LifecycleResult<()> {
        self.transition(DeviceStatus::AwaitingConfirmation, None)?;
        self.requested_at = Some(Instant::now());
        Ok(())
    }

    /// `AwaitingConfirmation -> Confirmed`.
    pub fn confirm(&mut self) -> LifecycleResult<()> {
        self.transition(DeviceStatus::Confirmed, None)
    }

    /// Move to the terminal `Rejected` status.
    ///
    /// Unless `retain_buffer` is set the pending messages are discarded and
    /// counted as dropped. Returns the number of discarded messages.
    pub fn reject(&mut self, reason: impl Into<String>, retain_buffer: bool) -> LifecycleResult<usize> {
        let reason = reason.into();
        self.transition(DeviceStatus::Rejected, Some(reason.clone()))?;
        self.rejection_reason = Some(reason);
        self.requested_at = None;

        if retain_buffer {
            return Ok(0);
        }
        let discarded = self.pending.len();
        self.pending.clear();
        self.dropped_messages += discarded as u64;
        if discarded > 0 {
            warn!(device_id = %self.id, discarded, "Discarded buffered messages of rejected device");
        }
        Ok(discarded)
    }

    /// `Confirmed -> Registered`.
    ///
    /// Installs `lane` and hands the whole buffer to it as one ordered batch.
    /// Both happen under the caller's lock, so any message forwarded after
    /// this call is queued behind the flushed batch. Returns the number of
    /// flushed messages and the batch receipt.
    pub fn register(&mut self, lane: DeliveryLane) -> LifecycleResult<(usize, DeliveryReceipt)> {
        self.transition(DeviceStatus::Registered, None)?;
        self.requested_at = None;

        let batch: Vec<Message> = self.pending.drain(..).collect();
        let flushed = batch.len();
        let receipt = lane.submit_batch(batch);
        self.channel = Some(lane);
        Ok((flushed, receipt))
    }

    /// Queue a message while registration is in progress.
    pub fn buffer(&mut self, message: Message, config: &BufferConfig) -> LifecycleResult<BufferOutcome> {
        if !self.status.is_buffering() {
            return Err(LifecycleError::NotBuffering {
                device_id: self.id.clone(),
                status: self.status,
            });
        }

        if !config.cache_messages_during_registration {
            self.dropped_messages += 1;
            return Ok(BufferOutcome::CachingDisabled);
        }

        let capacity = config.max_pending_messages;
        if self.pending.len() < capacity {
            self.pending.push_back(message);
            return Ok(BufferOutcome::Buffered {
                pending: self.pending.len(),
            });
        }

        self.dropped_messages += 1;
        let outcome = match config.overflow {
            OverflowPolicy::DropOldest if capacity > 0 => {
                self.pending.pop_front();
                self.pending.push_back(message);
                BufferOutcome::EvictedOldest {
                    pending: self.pending.len(),
                }
            }
            OverflowPolicy::DropOldest | OverflowPolicy::DropNewest => {
                BufferOutcome::DroppedNewest { capacity }
            }
            OverflowPolicy::Reject => BufferOutcome::Refused { capacity },
        };
        debug!(device_id = %self.id, capacity, ?outcome, "Pending buffer full");
        Ok(outcome)
    }

    /// Queue a message on the registered device's lane.
    pub fn forward(&self, message: Message) -> LifecycleResult<DeliveryReceipt> {
        match (&self.status, &self.channel) {
            (DeviceStatus::Registered, Some(lane)) => Ok(lane.submit(message)),
            _ => Err(LifecycleError::NotRegistered {
                device_id: self.id.clone(),
                status: self.status,
            }),
        }
    }

    /// Count a message that could not be delivered.
    pub fn record_drop(&mut self) {
        self.dropped_messages += 1;
    }

    /// Diagnostic view of the record.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: self.id.clone(),
            status: self.status,
            source_route_id: self.source_route_id.clone(),
            pending_messages: self.pending.len(),
            dropped_messages: self.dropped_messages,
            rejection_reason: self.rejection_reason.clone(),
            transitions: self.history.len(),
        }
    }

    fn transition(&mut self, next: DeviceStatus, reason: Option<String>) -> LifecycleResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                device_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        info!(device_id = %self.id, from = %self.status, to = %next, "Device status changed");

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: self.status,
            to: next,
            timestamp_ms: current_timestamp_ms(),
            reason,
        });
        self.status = next;
        Ok(())
    }
}
