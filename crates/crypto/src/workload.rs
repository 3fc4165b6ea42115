//! Device credentials signed by the edge workload API.
//!
//! The edge security daemon never hands out the module's key. Instead the
//! module asks it to HMAC the leaf device id with the key identified by
//! `key_id`; the resulting digest is the device's symmetric key, the same
//! value the cloud side derives when it provisions the device.

use crate::error::{SignError, TransportError};
use crate::http::HttpRequest;
use crate::transport::{Endpoint, WorkloadTransport};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine as _;
use leafbridge_core::{DeviceCredential, WorkloadConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

/// Signing algorithm requested from the workload API.
pub const SIGN_ALGORITHM: &str = "HMACSHA256";

/// Source of per-device credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produce the credential for `device_id`.
    async fn credential_for(&self, device_id: &str) -> Result<DeviceCredential, SignError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    key_id: &'a str,
    algo: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    digest: String,
}

/// Client of the workload `sign` operation.
#[derive(Debug, Clone)]
pub struct WorkloadSigner {
    transport: WorkloadTransport,
    module_id: String,
    generation_id: String,
    api_version: String,
    key_id: String,
}

impl WorkloadSigner {
    /// Build a signer for `module_id` from the workload settings.
    pub fn new(config: &WorkloadConfig, module_id: impl Into<String>) -> Result<Self, SignError> {
        let endpoint = Endpoint::parse(&config.uri)?;
        let transport = WorkloadTransport::new(endpoint, config.request_timeout())?;
        Ok(Self::with_transport(transport, config, module_id))
    }

    /// Build a signer over an existing transport.
    pub fn with_transport(
        transport: WorkloadTransport,
        config: &WorkloadConfig,
        module_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            module_id: module_id.into(),
            generation_id: config.generation_id.clone(),
            api_version: config.api_version.clone(),
            key_id: config.key_id.clone(),
        }
    }

    /// Origin-form target of the sign operation.
    pub fn sign_path(&self) -> String {
        format!(
            "/modules/{}/genid/{}/sign?api-version={}",
            urlencoding::encode(&self.module_id),
            urlencoding::encode(&self.generation_id),
            urlencoding::encode(&self.api_version)
        )
    }

    /// HMAC `data` with the module key. Returns the raw digest.
    pub async fn sign(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, SignError> {
        let body = serde_json::to_vec(&SignRequest {
            key_id: &self.key_id,
            algo: SIGN_ALGORITHM,
            data: general_purpose::STANDARD.encode(data),
        })
        .map_err(|e| SignError::InvalidResponse(format!("failed to encode sign request: {}", e)))?;

        let response = self
            .transport
            .send(HttpRequest::post_json(self.sign_path(), body))
            .await?;

        if !response.is_success() {
            return Err(SignError::Status {
                status: response.status,
                body: response.body_text(),
            });
        }

        let parsed: SignResponse = serde_json::from_slice(&response.body)
            .map_err(|e| SignError::InvalidResponse(e.to_string()))?;
        let digest = general_purpose::STANDARD
            .decode(parsed.digest.as_bytes())
            .map_err(|e| SignError::InvalidResponse(format!("digest is not base64: {}", e)))?;
        if digest.is_empty() {
            return Err(SignError::InvalidResponse("empty digest".to_string()));
        }
        Ok(Zeroizing::new(digest))
    }
}

#[async_trait]
impl CredentialProvider for WorkloadSigner {
    async fn credential_for(&self, device_id: &str) -> Result<DeviceCredential, SignError> {
        debug!(device_id = %device_id, module_id = %self.module_id, "Requesting device credential");
        let digest = self.sign(device_id.as_bytes()).await?;
        Ok(DeviceCredential::new(
            device_id,
            general_purpose::STANDARD.encode(digest.as_slice()),
        ))
    }
}
