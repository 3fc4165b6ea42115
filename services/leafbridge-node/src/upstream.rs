//! HTTP adapters for the edge hub and the cloud hub.
//!
//! [`EdgeHubOutput`] posts module output messages to the local edge hub.
//! [`HubChannelFactory`] opens per-device channels that post device-to-cloud
//! events authenticated with a SAS token derived from the device credential.

use crate::wire::WireMessage;
use async_trait::async_trait;
use leafbridge_core::{
    ChannelError, ChannelFactory, DeviceChannel, DeviceCredential, IdentityConfig, Message,
    ModuleOutput, ServiceConfig,
};
use leafbridge_crypto::device_sas_token;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prefix of application property headers on the device events endpoint.
const APP_PROPERTY_PREFIX: &str = "iothub-app-";

/// Content type of a batched device-to-cloud send.
const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.iothub.json";

fn map_send_error(err: reqwest::Error, timeout: Duration) -> ChannelError {
    if err.is_timeout() {
        ChannelError::Timeout(timeout)
    } else {
        ChannelError::Transport(err.to_string())
    }
}

/// Hub system and application properties of `message`, named as the device
/// events endpoint expects them.
fn hub_properties(message: &Message) -> Vec<(String, &str)> {
    let system = [
        ("iothub-messageid", message.message_id.as_deref()),
        ("iothub-contenttype", message.content_type.as_deref()),
        ("iothub-contentencoding", message.content_encoding.as_deref()),
    ];
    system
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name.to_string(), value)))
        .chain(
            message
                .properties
                .iter()
                .map(|(key, value)| (format!("{}{}", APP_PROPERTY_PREFIX, key), value.as_str())),
        )
        .collect()
}

/// JSON body of a batched send: one entry per message, in order.
fn batch_body(messages: &[Message]) -> Result<Vec<u8>, ChannelError> {
    let batch: Vec<serde_json::Value> = messages
        .iter()
        .map(|message| {
            let properties: serde_json::Map<String, serde_json::Value> = hub_properties(message)
                .into_iter()
                .map(|(name, value)| (name, serde_json::Value::from(value)))
                .collect();
            serde_json::json!({
                "body": WireMessage::from(message).body,
                "base64Encoded": true,
                "properties": properties,
            })
        })
        .collect();
    serde_json::to_vec(&batch).map_err(|e| ChannelError::Transport(e.to_string()))
}

async fn check_status(response: reqwest::Response) -> Result<(), ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Err(ChannelError::Unauthorized(format!("{}: {}", status, message)))
        }
        _ => Err(ChannelError::Status {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Module outputs routed through the local edge hub.
#[derive(Debug, Clone)]
pub struct EdgeHubOutput {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl EdgeHubOutput {
    /// Output client posting to `{base_url}/outputs/{name}`. `timeout` is
    /// the one configured on `client`.
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ModuleOutput for EdgeHubOutput {
    async fn send_to_output(&self, output: &str, message: Message) -> Result<(), ChannelError> {
        let url = format!("{}/outputs/{}", self.base_url, urlencoding::encode(output));
        debug!(output = %output, bytes = message.body.len(), "Sending to module output");
        let response = self
            .client
            .post(&url)
            .json(&WireMessage::from(&message))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        check_status(response).await
    }
}

/// Opens device channels against the cloud hub.
#[derive(Debug, Clone)]
pub struct HubChannelFactory {
    client: Client,
    timeout: Duration,
    endpoint_host: String,
    audience_host: String,
    api_version: String,
    sas_ttl: Duration,
}

impl HubChannelFactory {
    /// Factory for the hub described by `identity`. Traffic goes through the
    /// gateway hostname when transparent gateway mode is on.
    pub fn new(
        client: Client,
        timeout: Duration,
        identity: &IdentityConfig,
        service: &ServiceConfig,
    ) -> Self {
        Self {
            client,
            timeout,
            endpoint_host: identity.channel_host().to_string(),
            audience_host: identity.hub_hostname.clone(),
            api_version: service.device_api_version.clone(),
            sas_ttl: Duration::from_secs(service.sas_ttl_secs),
        }
    }
}

#[async_trait]
impl ChannelFactory for HubChannelFactory {
    async fn open(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Arc<dyn DeviceChannel>, ChannelError> {
        device_sas_token(&self.audience_host, credential, self.sas_ttl)
            .map_err(|e| ChannelError::Unauthorized(e.to_string()))?;

        let events_url = format!(
            "https://{}/devices/{}/messages/events?api-version={}",
            self.endpoint_host,
            urlencoding::encode(credential.device_id()),
            self.api_version
        );
        debug!(device_id = %credential.device_id(), url = %events_url, "Opened device channel");

        Ok(Arc::new(HubDeviceChannel {
            client: self.client.clone(),
            timeout: self.timeout,
            events_url,
            audience_host: self.audience_host.clone(),
            credential: credential.clone(),
            sas_ttl: self.sas_ttl,
        }))
    }
}

/// Device-to-cloud event channel of one leaf device.
pub struct HubDeviceChannel {
    client: Client,
    timeout: Duration,
    events_url: String,
    audience_host: String,
    credential: DeviceCredential,
    sas_ttl: Duration,
}

impl HubDeviceChannel {
    fn authorized_post(&self) -> Result<RequestBuilder, ChannelError> {
        let token = device_sas_token(&self.audience_host, &self.credential, self.sas_ttl)
            .map_err(|e| ChannelError::Unauthorized(e.to_string()))?;
        Ok(self
            .client
            .post(&self.events_url)
            .header(reqwest::header::AUTHORIZATION, token))
    }
}

#[async_trait]
impl DeviceChannel for HubDeviceChannel {
    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        let mut request = self.authorized_post()?;
        for (name, value) in hub_properties(&message) {
            request = request.header(name, value);
        }

        let response = request
            .body(message.body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        check_status(response).await
    }

    async fn send_batch(&self, messages: Vec<Message>) -> Result<(), ChannelError> {
        let body = batch_body(&messages)?;
        let response = self
            .authorized_post()?
            .header(reqwest::header::CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;
        check_status(response).await
    }
}
