//! Per-device delivery lanes.
//!
//! A [`DeliveryLane`] is a single-owner task that owns one device channel and
//! drains an ordered job queue. Submitting is a non-blocking enqueue, so it
//! can happen inside a device record's critical section: the order in which
//! jobs are submitted under that lock is the order in which they reach the
//! channel, while the channel I/O itself runs without any lock held.
//!
//! Each submission returns a [`DeliveryReceipt`] that resolves once the
//! channel has accepted (or definitively failed) the job. A receipt never
//! reports success for a job the channel did not acknowledge: jobs abandoned
//! by shutdown resolve to [`ChannelError::Cancelled`].

use crate::channel::{ChannelError, DeviceChannel};
use crate::message::Message;
use crate::retry::{retry, RetryConfig};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

enum Payload {
    Single(Message),
    Batch(Vec<Message>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Batch(messages) => messages.len(),
        }
    }
}

struct DeliveryJob {
    payload: Payload,
    ack: oneshot::Sender<Result<(), ChannelError>>,
}

/// Pending outcome of a submitted delivery.
#[derive(Debug)]
#[must_use = "a receipt must be awaited to learn whether the delivery succeeded"]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<Result<(), ChannelError>>,
}

impl DeliveryReceipt {
    fn ready(outcome: Result<(), ChannelError>) -> Self {
        let (tx, rx) = oneshot::channel();
        // The receiver is held right here, so this send cannot fail.
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Wait for the channel to acknowledge the delivery.
    pub async fn wait(self) -> Result<(), ChannelError> {
        self.rx.await.unwrap_or(Err(ChannelError::Cancelled))
    }
}

/// Ordered, single-owner delivery path for one device.
pub struct DeliveryLane {
    device_id: String,
    jobs: mpsc::UnboundedSender<DeliveryJob>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DeliveryLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryLane")
            .field("device_id", &self.device_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DeliveryLane {
    /// Spawn the lane task on `tracker`. The lane stops when `cancel` fires or
    /// when the lane handle is dropped; either way the channel is closed.
    pub fn spawn(
        device_id: impl Into<String>,
        channel: Arc<dyn DeviceChannel>,
        retry: RetryConfig,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let device_id = device_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        tracker.spawn(run_lane(
            device_id.clone(),
            channel,
            retry,
            cancel.clone(),
            rx,
        ));

        Self {
            device_id,
            jobs: tx,
            cancel,
        }
    }

    /// Device served by this lane.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queue a single message. Messages without an id get one here, so
    /// every retry of the delivery carries the same id.
    pub fn submit(&self, mut message: Message) -> DeliveryReceipt {
        message.ensure_message_id();
        self.enqueue(Payload::Single(message))
    }

    /// Queue an ordered batch. An empty batch resolves immediately.
    pub fn submit_batch(&self, mut messages: Vec<Message>) -> DeliveryReceipt {
        if messages.is_empty() {
            return DeliveryReceipt::ready(Ok(()));
        }
        for message in &mut messages {
            message.ensure_message_id();
        }
        self.enqueue(Payload::Batch(messages))
    }

    /// Stop the lane. Queued and in-flight jobs resolve to `Cancelled`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether the lane task has stopped accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed() || self.cancel.is_cancelled()
    }

    fn enqueue(&self, payload: Payload) -> DeliveryReceipt {
        if self.cancel.is_cancelled() {
            return DeliveryReceipt::ready(Err(ChannelError::Closed));
        }

        let (ack, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(DeliveryJob { payload, ack }) {
            let _ = job.ack.send(Err(ChannelError::Closed));
        }
        DeliveryReceipt { rx }
    }
}

async fn run_lane(
    device_id: String,
    channel: Arc<dyn DeviceChannel>,
    retry_config: RetryConfig,
    cancel: CancellationToken,
    mut jobs: mpsc::UnboundedReceiver<DeliveryJob>,
) {
    debug!(device_id = %device_id, "Delivery lane started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let count = job.payload.len();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Cancelled),
            outcome = deliver(channel.as_ref(), &retry_config, &job.payload) => outcome,
        };

        match &outcome {
            Ok(()) => debug!(device_id = %device_id, count, "Delivered to device channel"),
            Err(err) => warn!(device_id = %device_id, count, error = %err, "Device channel delivery failed"),
        }

        if job.ack.send(outcome).is_err() {
            debug!(device_id = %device_id, "Delivery receipt dropped before completion");
        }
    }

    jobs.close();
    let mut abandoned = 0usize;
    while let Ok(job) = jobs.try_recv() {
        abandoned += job.payload.len();
        let _ = job.ack.send(Err(ChannelError::Cancelled));
    }

    if let Err(err) = channel.close().await {
        warn!(device_id = %device_id, error = %err, "Failed to close device channel");
    }

    info!(device_id = %device_id, abandoned, "Delivery lane closed");
}

async fn deliver(
    channel: &dyn DeviceChannel,
    retry_config: &RetryConfig,
    payload: &Payload,
) -> Result<(), ChannelError> {
    match payload {
        Payload::Single(message) => {
            retry(retry_config, "device_send", || channel.send(message.clone())).await
        }
        Payload::Batch(messages) => {
            retry(retry_config, "device_send_batch", || {
                channel.send_batch(messages.clone())
            })
            .await
        }
    }
}
