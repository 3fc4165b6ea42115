//! JSON representation of gateway messages on the HTTP surfaces.

use base64::engine::general_purpose;
use base64::Engine as _;
use leafbridge_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message as carried over HTTP: base64 body plus string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Base64-encoded body
    pub body: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            body: general_purpose::STANDARD.encode(&message.body),
            properties: message.properties.clone(),
            message_id: message.message_id.clone(),
            content_type: message.content_type.clone(),
            content_encoding: message.content_encoding.clone(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = base64::DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        Ok(Message {
            message_id: wire.message_id,
            content_type: wire.content_type,
            content_encoding: wire.content_encoding,
            body: general_purpose::STANDARD.decode(wire.body.as_bytes())?,
            properties: wire.properties,
        })
    }
}
