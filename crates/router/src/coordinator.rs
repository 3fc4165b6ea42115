//! Registration coordinator.
//!
//! Issues registration requests toward the identity controller and consumes
//! its confirmation callbacks. A confirmed device gets a credential from the
//! workload signer and a channel from the channel factory; the record then
//! moves to `Registered` and its buffered messages are flushed in order
//! through the device's delivery lane.
//!
//! Record locks are only held for synchronous state changes. Dispatching,
//! signing, opening channels and waiting for deliveries all happen with no
//! lock held.

use crate::error::{CoordinatorError, SetupError};
use crate::registration::{
    ConfirmationCallback, RegistrationOperation, RegistrationRequest, ResultClass,
};
use leafbridge_core::{
    retry, BufferConfig, ChannelError, ChannelFactory, DeliveryLane, DeviceChannel,
    GatewayConfig, IdentityConfig, Message, ModuleOutput, RegistrationConfig,
};
use leafbridge_crypto::CredentialProvider;
use leafbridge_identity::{lock_device, BufferOutcome, DeviceRepository, DeviceStatus, SharedDevice};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Result of handling one confirmation callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Device registered and its buffer flushed
    Registered {
        /// Messages delivered from the buffer
        flushed: usize,
    },
    /// Device rejected by the controller or by channel setup
    Rejected {
        /// Recorded cause
        reason: String,
    },
    /// Callback named a device the gateway never saw
    UnknownDevice,
    /// Device was not waiting for a confirmation
    InvalidState {
        /// Status at the time of the callback
        status: DeviceStatus,
    },
    /// Result code outside the success and rejection classes
    UnexpectedResult {
        /// Reported code
        code: i32,
    },
}

impl ConfirmationOutcome {
    /// HTTP-like status to answer the method invocation with.
    pub fn status_code(&self) -> u16 {
        match self {
            ConfirmationOutcome::Registered { .. }
            | ConfirmationOutcome::Rejected { .. }
            | ConfirmationOutcome::UnexpectedResult { .. } => 200,
            ConfirmationOutcome::UnknownDevice => 404,
            ConfirmationOutcome::InvalidState { .. } => 409,
        }
    }
}

/// Result of [`RegistrationCoordinator::begin_registration`].
#[derive(Debug)]
pub enum RegistrationStart {
    /// Registration was started and the trigger buffered
    Started(BufferOutcome),
    /// Another caller started it first; the trigger is handed back
    AlreadyStarted(Message),
}

/// Drives device registration against the identity controller.
pub struct RegistrationCoordinator {
    repository: Arc<dyn DeviceRepository>,
    output: Arc<dyn ModuleOutput>,
    credentials: Arc<dyn CredentialProvider>,
    channels: Arc<dyn ChannelFactory>,
    identity: IdentityConfig,
    output_name: String,
    buffer: BufferConfig,
    registration: RegistrationConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RegistrationCoordinator {
    /// Create a coordinator over the given collaborators.
    pub fn new(
        config: &GatewayConfig,
        repository: Arc<dyn DeviceRepository>,
        output: Arc<dyn ModuleOutput>,
        credentials: Arc<dyn CredentialProvider>,
        channels: Arc<dyn ChannelFactory>,
    ) -> Self {
        Self {
            repository,
            output,
            credentials,
            channels,
            identity: config.identity.clone(),
            output_name: config.routing.output_name.clone(),
            buffer: config.buffer.clone(),
            registration: config.registration.clone(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Repository shared with the router.
    pub fn repository(&self) -> &Arc<dyn DeviceRepository> {
        &self.repository
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start registration of `device_id` with `trigger` as its first
    /// buffered message.
    ///
    /// Only the caller that moves the record out of `New` dispatches the
    /// request. Every other caller gets its message back untouched.
    pub async fn begin_registration(
        &self,
        device_id: &str,
        source_route_id: Option<String>,
        trigger: Message,
    ) -> Result<RegistrationStart, CoordinatorError> {
        let device = self.repository.get_or_create(device_id);
        let outcome = {
            let mut record = lock_device(&device);
            if record.status() != DeviceStatus::New {
                return Ok(RegistrationStart::AlreadyStarted(trigger));
            }
            record.begin(source_route_id)?;
            record.buffer(trigger, &self.buffer)?
        };

        info!(device_id = %device_id, "Registering new leaf device");
        self.dispatch_registration(&device).await?;
        Ok(RegistrationStart::Started(outcome))
    }

    /// Send the registration request of a device in `Initializing`.
    ///
    /// The record moves to `AwaitingConfirmation` before the request leaves,
    /// so a fast controller answer always finds it waiting. Retries stop as
    /// soon as the record has moved on. If the request cannot be sent the
    /// device is rejected.
    async fn dispatch_registration(&self, device: &SharedDevice) -> Result<(), CoordinatorError> {
        let device_id = lock_device(device).id().to_string();
        let request =
            RegistrationRequest::new(&self.identity, &device_id, RegistrationOperation::Create);
        let message = match request.to_message() {
            Ok(message) => message,
            Err(err) => {
                self.reject(&device_id, format!("registration request encoding failed: {}", err));
                return Err(err.into());
            }
        };

        lock_device(device).mark_awaiting_confirmation()?;

        let output = self.output_name.as_str();
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChannelError::Cancelled),
            result = retry(&self.registration.retry, "registration_dispatch", || {
                let message = message.clone();
                async move {
                    let status = lock_device(device).status();
                    if status != DeviceStatus::AwaitingConfirmation {
                        return Ok(Some(status));
                    }
                    self.output.send_to_output(output, message).await.map(|()| None)
                }
            }) => result,
        };

        match sent {
            Ok(None) => {
                info!(device_id = %device_id, output = %output, "Registration request sent");
                Ok(())
            }
            Ok(Some(status)) => {
                debug!(device_id = %device_id, status = %status, "Registration settled before resend");
                Ok(())
            }
            Err(source) => {
                error!(device_id = %device_id, error = %source, "Registration request dispatch failed");
                if !self.reject(&device_id, format!("registration dispatch failed: {}", source)) {
                    return Ok(());
                }
                Err(CoordinatorError::Dispatch {
                    device_id,
                    source,
                })
            }
        }
    }

    /// Handle the identity controller's answer for one device.
    pub async fn on_confirmation(
        &self,
        callback: ConfirmationCallback,
    ) -> Result<ConfirmationOutcome, CoordinatorError> {
        let device_id = callback.device_id.as_str();
        let Some(device) = self.repository.get(device_id) else {
            warn!(
                device_id = %device_id,
                code = callback.result_code,
                "Confirmation for unknown device discarded"
            );
            return Ok(ConfirmationOutcome::UnknownDevice);
        };

        {
            let mut record = lock_device(&device);
            if record.status() != DeviceStatus::AwaitingConfirmation {
                warn!(
                    device_id = %device_id,
                    status = %record.status(),
                    code = callback.result_code,
                    description = %callback.description(),
                    "Confirmation for device in invalid status discarded"
                );
                return Ok(ConfirmationOutcome::InvalidState {
                    status: record.status(),
                });
            }

            match callback.class() {
                ResultClass::Success => {
                    record.confirm()?;
                    info!(
                        device_id = %device_id,
                        code = callback.result_code,
                        description = %callback.description(),
                        "Device registration confirmed"
                    );
                }
                ResultClass::Rejected => {
                    let reason = format!("{}: {}", callback.result_code, callback.description());
                    let discarded = record.reject(reason.clone(), self.buffer.retain_on_rejection)?;
                    warn!(
                        device_id = %device_id,
                        reason = %reason,
                        discarded,
                        "Device registration not allowed"
                    );
                    return Ok(ConfirmationOutcome::Rejected { reason });
                }
                ResultClass::Unexpected => {
                    error!(
                        device_id = %device_id,
                        code = callback.result_code,
                        description = %callback.description(),
                        "Unsuccessful registration response"
                    );
                    return Ok(ConfirmationOutcome::UnexpectedResult {
                        code: callback.result_code,
                    });
                }
            }
        }

        let lane = match self.establish_channel(device_id).await {
            Ok(lane) => lane,
            Err(CoordinatorError::Cancelled) => return Err(CoordinatorError::Cancelled),
            Err(err) => {
                let reason = err.to_string();
                self.reject(device_id, reason.clone());
                return Ok(ConfirmationOutcome::Rejected { reason });
            }
        };

        let (flushed, receipt) = lock_device(&device).register(lane)?;
        info!(device_id = %device_id, flushed, "Device registered, flushing buffered messages");

        receipt
            .wait()
            .await
            .map_err(|source| CoordinatorError::FlushFailed {
                device_id: device_id.to_string(),
                flushed,
                source,
            })?;

        Ok(ConfirmationOutcome::Registered { flushed })
    }

    /// Reject every device that has waited longer than `max_age` for its
    /// confirmation. Returns the rejected ids.
    pub fn expire_pending(&self, max_age: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        for device in self.repository.devices() {
            let mut record = lock_device(&device);
            if !record.awaiting_longer_than(max_age) {
                continue;
            }
            let reason = format!("confirmation not received within {:?}", max_age);
            match record.reject(reason, self.buffer.retain_on_rejection) {
                Ok(discarded) => {
                    warn!(device_id = %record.id(), discarded, "Registration confirmation timed out");
                    expired.push(record.id().to_string());
                }
                Err(err) => debug!(error = %err, "Skipping expiry"),
            }
        }
        expired
    }

    /// Cancel in-flight dispatch, signing, channel setup and deliveries,
    /// and stop every delivery lane. Does not wait for the lanes.
    pub fn begin_shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(devices = self.repository.len(), "Shutting down registration coordinator");
        self.cancel.cancel();

        for device in self.repository.devices() {
            if let Some(lane) = lock_device(&device).channel() {
                lane.shutdown();
            }
        }
    }

    /// [`begin_shutdown`](Self::begin_shutdown), then wait until every lane
    /// has closed its device channel.
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All device channels closed");
    }

    async fn establish_channel(&self, device_id: &str) -> Result<DeliveryLane, CoordinatorError> {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CoordinatorError::Cancelled),
            result = retry(&self.registration.retry, "channel_setup", || self.open_channel(device_id)) => result,
        };

        match opened {
            Ok(channel) => Ok(DeliveryLane::spawn(
                device_id,
                channel,
                self.registration.retry.clone(),
                self.cancel.child_token(),
                &self.tracker,
            )),
            Err(source) => {
                error!(
                    device_id = %device_id,
                    error = %source,
                    timeout = source.is_timeout(),
                    "Channel setup failed"
                );
                Err(CoordinatorError::Setup {
                    device_id: device_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn open_channel(&self, device_id: &str) -> Result<Arc<dyn DeviceChannel>, SetupError> {
        let credential = self.credentials.credential_for(device_id).await?;
        let timeout = self.registration.channel_timeout();
        let channel = tokio::time::timeout(timeout, self.channels.open(&credential))
            .await
            .map_err(|_| ChannelError::Timeout(timeout))??;
        debug!(device_id = %device_id, "Device channel opened");
        Ok(channel)
    }

    /// Returns whether this call moved the device to `Rejected`.
    fn reject(&self, device_id: &str, reason: String) -> bool {
        let Some(device) = self.repository.get(device_id) else {
            return false;
        };
        let mut record = lock_device(&device);
        match record.reject(reason.clone(), self.buffer.retain_on_rejection) {
            Ok(discarded) => {
                warn!(device_id = %device_id, reason = %reason, discarded, "Device rejected");
                true
            }
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "Could not reject device");
                false
            }
        }
    }
}
