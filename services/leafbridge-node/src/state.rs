use anyhow::{Context, Result};
use leafbridge_core::{ChannelFactory, GatewayConfig, ModuleOutput};
use leafbridge_crypto::{CredentialProvider, WorkloadSigner};
use leafbridge_identity::{DeviceRepository, MemoryDeviceRepository};
use leafbridge_router::{MessageRouter, RegistrationCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::upstream::{EdgeHubOutput, HubChannelFactory};

pub struct AppState {
    pub config: GatewayConfig,
    pub coordinator: Arc<RegistrationCoordinator>,
    pub router: MessageRouter,
}

impl AppState {
    /// Wire the production collaborators: edge hub output, workload signer
    /// and hub device channels.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let timeout = config.registration.channel_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        let output = Arc::new(EdgeHubOutput::new(
            client.clone(),
            config.service.upstream_url.clone(),
            timeout,
        ));
        let signer = WorkloadSigner::new(&config.workload, config.identity.edge_module_id.clone())
            .context("failed to set up workload signer")?;
        let channels = Arc::new(HubChannelFactory::new(
            client,
            timeout,
            &config.identity,
            &config.service,
        ));

        Ok(Self::from_parts(
            config,
            Arc::new(MemoryDeviceRepository::new()),
            output,
            Arc::new(signer),
            channels,
        ))
    }

    pub fn from_parts(
        config: GatewayConfig,
        repository: Arc<dyn DeviceRepository>,
        output: Arc<dyn ModuleOutput>,
        credentials: Arc<dyn CredentialProvider>,
        channels: Arc<dyn ChannelFactory>,
    ) -> Self {
        let coordinator = Arc::new(RegistrationCoordinator::new(
            &config,
            repository,
            Arc::clone(&output),
            credentials,
            channels,
        ));
        let router = MessageRouter::new(&config, Arc::clone(&coordinator), output);
        Self {
            config,
            coordinator,
            router,
        }
    }

    pub fn repository(&self) -> &Arc<dyn DeviceRepository> {
        self.coordinator.repository()
    }
}

/// Periodically reject devices that waited too long for a confirmation.
/// Stops once the coordinator shuts down.
pub fn spawn_expiry_sweeper(
    coordinator: Arc<RegistrationCoordinator>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(?interval, ?max_age, "Confirmation expiry sweeper started");
        loop {
            ticker.tick().await;
            if coordinator.is_shutting_down() {
                break;
            }
            let expired = coordinator.expire_pending(max_age);
            if !expired.is_empty() {
                warn!(count = expired.len(), devices = ?expired, "Rejected unconfirmed devices");
            }
        }
    })
}
