//! Wire types exchanged with the identity controller.
//!
//! Outbound, the gateway announces a leaf device with a
//! [`RegistrationRequest`] on its registration output. Inbound, the
//! controller answers by invoking the callback method with a
//! [`ConfirmationCallback`]. The controller serializes its answer with
//! PascalCase field names and a misspelt description field, so the callback
//! accepts both spellings of every field.

use crate::error::MalformedEventError;
use leafbridge_core::{IdentityConfig, Message};
use serde::{Deserialize, Serialize};

/// Property marking registration traffic on the module output.
pub const ITM_TYPE_PROPERTY: &str = "itmtype";

/// Value of [`ITM_TYPE_PROPERTY`] on registration requests.
pub const LEAF_EVENT: &str = "LeafEvent";

/// Operation requested from the identity controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOperation {
    /// Create (or re-enable) the device identity
    Create,
    /// Delete the device identity
    Delete,
    /// Disable the device identity
    Disable,
}

/// Registration request sent toward the identity controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Cloud hub the device should be registered in
    pub hub_hostname: String,
    /// Leaf device to register
    pub leaf_device_id: String,
    /// Edge device hosting this gateway
    pub edge_device_id: String,
    /// This gateway module
    pub edge_module_id: String,
    /// Requested operation
    pub operation: RegistrationOperation,
}

impl RegistrationRequest {
    /// Request for `leaf_device_id` issued by the gateway described by `identity`.
    pub fn new(
        identity: &IdentityConfig,
        leaf_device_id: impl Into<String>,
        operation: RegistrationOperation,
    ) -> Self {
        Self {
            hub_hostname: identity.hub_hostname.clone(),
            leaf_device_id: leaf_device_id.into(),
            edge_device_id: identity.edge_device_id.clone(),
            edge_module_id: identity.edge_module_id.clone(),
            operation,
        }
    }

    /// Encode as a module output message.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let body = serde_json::to_vec(self)?;
        Ok(Message::new(body)
            .with_content_type("application/json")
            .with_content_encoding("utf-8")
            .with_property(ITM_TYPE_PROPERTY, LEAF_EVENT))
    }
}

/// Result classes of a confirmation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    /// 200 or 201: the device identity exists and is enabled
    Success,
    /// 401, 403 or 404: the controller refuses the device
    Rejected,
    /// Any other code
    Unexpected,
}

impl ResultClass {
    /// Classify a controller result code.
    pub fn from_code(code: i32) -> Self {
        match code {
            200 | 201 => ResultClass::Success,
            401 | 403 | 404 => ResultClass::Rejected,
            _ => ResultClass::Unexpected,
        }
    }
}

/// Payload of the confirmation callback method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationCallback {
    /// Device the answer refers to
    #[serde(rename = "deviceId", alias = "DeviceId")]
    pub device_id: String,

    /// HTTP-like result code
    #[serde(rename = "resultCode", alias = "ResultCode")]
    pub result_code: i32,

    /// Human-readable outcome
    #[serde(
        rename = "resultDescription",
        alias = "ResultDescription",
        alias = "ResultDescriptionn",
        alias = "resultDescriptionn",
        default
    )]
    pub result_description: Option<String>,
}

impl ConfirmationCallback {
    /// Decode and validate a callback payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, MalformedEventError> {
        let callback: ConfirmationCallback = serde_json::from_slice(payload)
            .map_err(|e| MalformedEventError::InvalidPayload(e.to_string()))?;
        if callback.device_id.trim().is_empty() {
            return Err(MalformedEventError::EmptyDeviceId);
        }
        Ok(callback)
    }

    /// Classification of the result code.
    pub fn class(&self) -> ResultClass {
        ResultClass::from_code(self.result_code)
    }

    /// Description, or an empty string.
    pub fn description(&self) -> &str {
        self.result_description.as_deref().unwrap_or_default()
    }
}
