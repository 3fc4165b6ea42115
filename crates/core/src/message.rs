//! Gateway message model.
//!
//! A [`Message`] is an opaque body plus string application properties, the
//! shape shared by the edge hub input, the module outputs and the per-device
//! cloud channels. Leaf devices are identified by two routing properties,
//! described by [`LeafTagNames`], which belong to the gateway protocol and are
//! stripped before a message reaches any transport.

use crate::config::RoutingConfig;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A message flowing through the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Optional message id assigned by the producer.
    pub message_id: Option<String>,
    /// Body content type (e.g. `application/json`).
    pub content_type: Option<String>,
    /// Body content encoding (e.g. `utf-8`).
    pub content_encoding: Option<String>,
    /// Opaque payload.
    pub body: Vec<u8>,
    /// Application properties.
    pub properties: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with the given body and no properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Add an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the content encoding.
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    /// Assign a random message id unless the producer already set one.
    pub fn ensure_message_id(&mut self) -> &str {
        self.message_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }

    /// Look up a property by name, ignoring ASCII case.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Copy of this message without the named properties (ASCII case ignored).
    pub fn without_properties(&self, names: &[&str]) -> Message {
        let properties = self
            .properties
            .iter()
            .filter(|(key, _)| !names.iter().any(|name| key.eq_ignore_ascii_case(name)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Message {
            message_id: self.message_id.clone(),
            content_type: self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
            body: self.body.clone(),
            properties,
        }
    }
}

/// Leaf routing properties carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafTag {
    /// Leaf device id.
    pub device_id: String,
    /// Module that produced the traffic, if present.
    pub source_route_id: Option<String>,
}

/// Names of the leaf routing properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafTagNames {
    /// Property carrying the leaf device id.
    pub device_property: String,
    /// Property carrying the source module id.
    pub source_route_property: String,
}

impl Default for LeafTagNames {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for LeafTagNames {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            device_property: config.leaf_device_property.clone(),
            source_route_property: config.source_route_property.clone(),
        }
    }
}

impl LeafTagNames {
    /// Extract the leaf tag. `None` means the message is pass-through traffic.
    pub fn extract(&self, message: &Message) -> Option<LeafTag> {
        let device_id = message.property(&self.device_property)?;
        Some(LeafTag {
            device_id: device_id.to_string(),
            source_route_id: message
                .property(&self.source_route_property)
                .map(str::to_string),
        })
    }

    /// Copy of the message with both leaf routing properties removed.
    pub fn strip(&self, message: &Message) -> Message {
        message.without_properties(&[&self.device_property, &self.source_route_property])
    }
}
