//! Bayeux message model.
//!
//! A [`Message`] is one JSON object on the wire; a [`Payload`] is the ordered
//! batch of messages exchanged in a single network round trip.
//!
//! # Format
//!
//! ```json
//! {
//!   "channel": "/meta/connect",
//!   "id": "3",
//!   "clientId": "Un1q31d3nt1f13r",
//!   "connectionType": "long-polling",
//!   "successful": true,
//!   "advice": { "reconnect": "retry", "interval": 0, "timeout": 30000 }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::channel::{ConnectionType, MetaChannel, is_meta_channel, is_service_channel};
use super::error_field::ErrorField;

// ============================================================================
// Types
// ============================================================================

/// Ordered batch of messages sent or received in one exchange.
pub type Payload = Vec<Message>;

/// Protocol version announced during the handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Minimum protocol version accepted.
pub const MINIMUM_PROTOCOL_VERSION: &str = "1.0";

// ============================================================================
// Reconnect / Advice
// ============================================================================

/// How the client should proceed after a connect or handshake exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Issue a new connect request.
    Retry,
    /// Perform a new handshake.
    Handshake,
    /// Stop reconnecting.
    None,
    /// Any value not defined by the protocol; treated like `none`.
    #[serde(other)]
    Unknown,
}

/// Server-supplied reconnection guidance.
///
/// `interval` and `timeout` are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    /// Reconnect policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,

    /// Delay before the next connect, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Time the server holds a connect request open, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Message
// ============================================================================

/// A single Bayeux message.
///
/// Only `channel` is mandatory. Unknown fields (for example `ext`) are kept
/// in [`Message::extra`] so extensions can read and write them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Target or source channel.
    pub channel: String,

    /// Client-assigned correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Server-assigned client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Application payload of publish and event messages.
    ///
    /// A `null` on the wire is kept as `Some(Value::Null)`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Outcome of a request; present on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    /// Reconnection advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    /// Channel of a subscribe/unsubscribe request or response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    /// Error description of a failed response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transport used by a connect request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    /// Protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Minimum protocol version (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    /// Connection types offered by either side (handshake only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    /// Fields not modelled above, such as `ext`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Message - Templates
// ============================================================================

impl Message {
    /// Creates a message on `channel` with no other field set.
    #[inline]
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Creates a handshake request offering `connection_types`.
    #[must_use]
    pub fn handshake(connection_types: &[ConnectionType]) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            minimum_version: Some(MINIMUM_PROTOCOL_VERSION.to_string()),
            supported_connection_types: Some(
                connection_types
                    .iter()
                    .map(|ct| ct.as_str().to_string())
                    .collect(),
            ),
            ..Self::new(MetaChannel::Handshake.as_str())
        }
    }

    /// Creates a connect request.
    #[inline]
    #[must_use]
    pub fn connect() -> Self {
        Self::new(MetaChannel::Connect.as_str())
    }

    /// Creates a disconnect request.
    #[inline]
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(MetaChannel::Disconnect.as_str())
    }

    /// Creates a subscribe request for `channel`.
    #[inline]
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self {
            subscription: Some(channel.into()),
            ..Self::new(MetaChannel::Subscribe.as_str())
        }
    }

    /// Creates an unsubscribe request for `channel`.
    #[inline]
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self {
            subscription: Some(channel.into()),
            ..Self::new(MetaChannel::Unsubscribe.as_str())
        }
    }

    /// Creates a publish request carrying `data`.
    #[inline]
    #[must_use]
    pub fn publish(channel: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(channel)
        }
    }
}

// ============================================================================
// Message - Classification
// ============================================================================

impl Message {
    /// Returns `true` if this message answers `request`.
    ///
    /// The channels must be equal, the ids must be equal (or both absent),
    /// and the message must carry a `successful` field.
    #[must_use]
    pub fn is_response_to(&self, request: &Message) -> bool {
        self.channel == request.channel && self.id == request.id && self.successful.is_some()
    }

    /// Returns `true` if this message should be delivered to the caller.
    ///
    /// Events are never on meta channels, carry `data`, and on service
    /// channels they must not carry an `id` (which would mark a response).
    #[must_use]
    pub fn is_event(&self) -> bool {
        !is_meta_channel(&self.channel)
            && (!is_service_channel(&self.channel) || self.id.is_none())
            && self.data.is_some()
    }

    /// Returns `true` if the message reports `successful: false`.
    ///
    /// Messages without a `successful` field count as successful.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.successful == Some(false)
    }

    /// Returns `true` if the message's error code is 401 or 403.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.error_field().is_some_and(|field| field.is_auth_error())
    }

    /// Returns the parsed `error` field.
    #[must_use]
    pub fn error_field(&self) -> Option<ErrorField> {
        self.error.as_deref().map(ErrorField::parse)
    }

    /// Returns the meta channel this message is on, if any.
    #[inline]
    #[must_use]
    pub fn meta_channel(&self) -> Option<MetaChannel> {
        MetaChannel::from_name(&self.channel)
    }
}

/// Deserializes a field that is present on the wire, `null` included.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ============================================================================
// Payload Codec
// ============================================================================

/// Parses a response body into a payload.
///
/// Servers normally answer with an array; a single object is accepted too.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the body is neither.
pub fn parse_payload(body: &str) -> Result<Payload> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect(),
        object @ Value::Object(_) => Ok(vec![serde_json::from_value(object)?]),
        _ => Err(Error::transport("Received invalid response from the server.")),
    }
}

/// Serializes a payload into a JSON array.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
#[inline]
pub fn encode_payload(payload: &[Message]) -> Result<String> {
    Ok(serde_json::to_string(payload)?)
}

// ============================================================================
// Tests
// ============================================================================
