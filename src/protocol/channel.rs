//! Channel namespace and connection types.
//!
//! | Prefix | Purpose |
//! |--------|---------|
//! | `/meta/` | Protocol control (handshake, connect, disconnect, subscribe, unsubscribe) |
//! | `/service/` | Point-to-point request/response, not broadcast |
//! | anything else | Broadcast channels |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Meta channel prefix.
pub const META_CHANNEL_PREFIX: &str = "/meta/";

/// Service channel prefix.
pub const SERVICE_CHANNEL_PREFIX: &str = "/service/";

// ============================================================================
// Channel Predicates
// ============================================================================

/// Returns `true` if `channel` is a protocol control channel.
#[inline]
#[must_use]
pub fn is_meta_channel(channel: &str) -> bool {
    channel.starts_with(META_CHANNEL_PREFIX)
}

/// Returns `true` if `channel` is a service channel.
#[inline]
#[must_use]
pub fn is_service_channel(channel: &str) -> bool {
    channel.starts_with(SERVICE_CHANNEL_PREFIX)
}

// ============================================================================
// MetaChannel
// ============================================================================

/// Protocol control channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaChannel {
    /// `/meta/handshake`
    Handshake,
    /// `/meta/connect`
    Connect,
    /// `/meta/disconnect`
    Disconnect,
    /// `/meta/subscribe`
    Subscribe,
    /// `/meta/unsubscribe`
    Unsubscribe,
}

impl MetaChannel {
    /// All meta channels.
    pub const ALL: [Self; 5] = [
        Self::Handshake,
        Self::Connect,
        Self::Disconnect,
        Self::Subscribe,
        Self::Unsubscribe,
    ];

    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "/meta/handshake",
            Self::Connect => "/meta/connect",
            Self::Disconnect => "/meta/disconnect",
            Self::Subscribe => "/meta/subscribe",
            Self::Unsubscribe => "/meta/unsubscribe",
        }
    }

    /// Looks up the meta channel with the given name.
    #[must_use]
    pub fn from_name(channel: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|meta| meta.as_str() == channel)
    }
}

impl fmt::Display for MetaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ConnectionType
// ============================================================================

/// Transport types defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// HTTP long-polling. Every server is required to support it.
    #[serde(rename = "long-polling")]
    LongPolling,
    /// WebSocket.
    #[serde(rename = "websocket")]
    WebSocket,
}

impl ConnectionType {
    /// The connection type used for the initial handshake.
    pub const DEFAULT: Self = Self::LongPolling;

    /// Every connection type, in default preference order.
    pub const ALL: [Self; 2] = [Self::WebSocket, Self::LongPolling];

    /// Returns the wire name of the connection type.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LongPolling => "long-polling",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "long-polling" => Ok(Self::LongPolling),
            "websocket" => Ok(Self::WebSocket),
            other => Err(Error::config(format!("Unknown connection type: {other}"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
