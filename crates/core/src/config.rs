//! Configuration management for LeafBridge.
//!
//! A [`GatewayConfig`] is built once at startup (TOML file, then the edge
//! runtime environment on top) and handed to every component. Nothing in the
//! workspace reads the environment after that point.

use crate::error::{CoreError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Edge device id assigned by the edge runtime.
pub const DEVICE_ID_ENV: &str = "IOTEDGE_DEVICEID";
/// Module id of this gateway module.
pub const MODULE_ID_ENV: &str = "IOTEDGE_MODULEID";
/// Hostname of the cloud hub.
pub const HUB_HOSTNAME_ENV: &str = "IOTEDGE_IOTHUBHOSTNAME";
/// Hostname of the edge gateway leaf devices connect through.
pub const GATEWAY_HOSTNAME_ENV: &str = "IOTEDGE_GATEWAYHOSTNAME";
/// URI of the local workload (signing) API.
pub const WORKLOAD_URI_ENV: &str = "IOTEDGE_WORKLOADURI";
/// Generation id of this module instance.
pub const GENERATION_ID_ENV: &str = "IOTEDGE_MODULEGENERATIONID";
/// Workload API version override.
pub const API_VERSION_ENV: &str = "IOTEDGE_APIVERSION";

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Identity of this gateway module and the hub it talks to.
    pub identity: IdentityConfig,
    /// Names of inputs, outputs, methods and leaf tag properties.
    pub routing: RoutingConfig,
    /// Pre-registration buffering policy.
    pub buffer: BufferConfig,
    /// Local workload signing API.
    pub workload: WorkloadConfig,
    /// Registration round-trip and channel setup policy.
    pub registration: RegistrationConfig,
    /// HTTP service surface.
    pub service: ServiceConfig,
}

/// Identity of the gateway module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Edge device hosting this module.
    pub edge_device_id: String,
    /// This module's id.
    pub edge_module_id: String,
    /// Cloud hub hostname.
    pub hub_hostname: String,
    /// Edge gateway hostname, used when connecting leaf devices transparently.
    pub gateway_hostname: Option<String>,
    /// Connect leaf devices through the gateway rather than to the hub directly.
    pub use_transparent_gateway: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            edge_device_id: String::new(),
            edge_module_id: String::new(),
            hub_hostname: String::new(),
            gateway_hostname: None,
            use_transparent_gateway: true,
        }
    }
}

impl IdentityConfig {
    /// Host that per-device channels connect to.
    pub fn channel_host(&self) -> &str {
        match (&self.gateway_hostname, self.use_transparent_gateway) {
            (Some(gateway), true) if !gateway.is_empty() => gateway,
            _ => &self.hub_hostname,
        }
    }
}

/// Message routing names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Input on which leaf and pass-through traffic arrives.
    pub input_name: String,
    /// Output for pass-through traffic and registration requests.
    pub output_name: String,
    /// Remote method invoked by the identity controller.
    pub callback_method: String,
    /// Property carrying the leaf device id.
    pub leaf_device_property: String,
    /// Property carrying the id of the module that produced the traffic.
    pub source_route_property: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            input_name: "itminput".to_string(),
            output_name: "itmoutput".to_string(),
            callback_method: "ItmCallback".to_string(),
            leaf_device_property: "leafDeviceId".to_string(),
            source_route_property: "moduleId".to_string(),
        }
    }
}

/// What to do when a device's pending buffer is full.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room.
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
    /// Refuse the incoming message and report it to the caller.
    Reject,
}

/// Pre-registration buffering policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Buffer messages while a device is being registered.
    pub cache_messages_during_registration: bool,
    /// Cap on buffered messages per device.
    pub max_pending_messages: usize,
    /// Behaviour when the cap is reached.
    pub overflow: OverflowPolicy,
    /// Keep the buffer of a rejected device for inspection instead of discarding it.
    pub retain_on_rejection: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cache_messages_during_registration: true,
            max_pending_messages: 1000,
            overflow: OverflowPolicy::Reject,
            retain_on_rejection: false,
        }
    }
}

/// Local workload signing API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Endpoint URI (`unix://`, `http://` or `https://`).
    pub uri: String,
    /// Workload API version.
    pub api_version: String,
    /// Key selector used for signing.
    pub key_id: String,
    /// Module generation id.
    pub generation_id: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            uri: "unix:///var/run/iotedge/workload.sock".to_string(),
            api_version: "2019-01-30".to_string(),
            key_id: "primary".to_string(),
            generation_id: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl WorkloadConfig {
    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Registration round-trip policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Timeout for opening a per-device channel, in milliseconds.
    pub channel_timeout_ms: u64,
    /// Reject devices that wait longer than this for a confirmation.
    pub confirmation_timeout_secs: Option<u64>,
    /// How often the confirmation timeout is checked.
    pub expiry_sweep_interval_secs: u64,
    /// Bounded retry for dispatch, signing, channel setup and delivery.
    pub retry: RetryConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: 30_000,
            confirmation_timeout_secs: None,
            expiry_sweep_interval_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl RegistrationConfig {
    /// Channel construction timeout.
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    /// Confirmation timeout, if enabled.
    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// HTTP service surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the service listens on.
    pub listen_addr: String,
    /// Base URL of the edge hub adapter receiving module outputs.
    pub upstream_url: String,
    /// Device API version used on per-device channels.
    pub device_api_version: String,
    /// Lifetime of generated SAS tokens in seconds.
    pub sas_ttl_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8090".to_string(),
            upstream_url: "http://127.0.0.1:8091".to_string(),
            device_api_version: "2020-03-13".to_string(),
            sas_ttl_secs: 3600,
            log_format: LogFormat::Text,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text. Missing sections take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay the edge runtime environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup (the process environment in production).
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(DEVICE_ID_ENV) {
            self.identity.edge_device_id = value;
        }
        if let Some(value) = lookup(MODULE_ID_ENV) {
            self.identity.edge_module_id = value;
        }
        if let Some(value) = lookup(HUB_HOSTNAME_ENV) {
            self.identity.hub_hostname = value;
        }
        if let Some(value) = lookup(GATEWAY_HOSTNAME_ENV) {
            self.identity.gateway_hostname = Some(value);
        }
        if let Some(value) = lookup(WORKLOAD_URI_ENV) {
            self.workload.uri = value;
        }
        if let Some(value) = lookup(GENERATION_ID_ENV) {
            self.workload.generation_id = value;
        }
        if let Some(value) = lookup(API_VERSION_ENV) {
            self.workload.api_version = value;
        }
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("identity.edge_device_id", &self.identity.edge_device_id),
            ("identity.edge_module_id", &self.identity.edge_module_id),
            ("identity.hub_hostname", &self.identity.hub_hostname),
            ("workload.uri", &self.workload.uri),
            ("routing.output_name", &self.routing.output_name),
            ("routing.leaf_device_property", &self.routing.leaf_device_property),
            ("routing.source_route_property", &self.routing.source_route_property),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CoreError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.buffer.max_pending_messages == 0 {
            return Err(CoreError::Config(
                "buffer.max_pending_messages must be at least 1".to_string(),
            ));
        }
        if self.registration.retry.max_attempts == 0 {
            return Err(CoreError::Config(
                "registration.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.workload.request_timeout_ms == 0 || self.registration.channel_timeout_ms == 0 {
            return Err(CoreError::Config("timeouts must be non-zero".to_string()));
        }

        Ok(())
    }
}
