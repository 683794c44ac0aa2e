//! Bayeux wire protocol types.
//!
//! This module defines the message format exchanged with a CometD server.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `/meta/handshake` | Client → Server | Negotiate client id and transports |
//! | `/meta/connect` | Client → Server | Long-lived connection, carries advice |
//! | `/meta/subscribe`, `/meta/unsubscribe` | Client → Server | Manage subscriptions |
//! | `/meta/disconnect` | Client → Server | End the session |
//! | any other channel | Both | Publish requests and event messages |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel namespace and connection types |
//! | `error_field` | `error` field parsing |
//! | `message` | Message, advice and payload codec |

// ============================================================================
// Submodules
// ============================================================================

/// Channel namespace and connection types.
pub mod channel;

/// `error` field parsing.
pub mod error_field;

/// Message, advice and payload codec.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{
    ConnectionType, META_CHANNEL_PREFIX, MetaChannel, SERVICE_CHANNEL_PREFIX, is_meta_channel,
    is_service_channel,
};
pub use error_field::ErrorField;
pub use message::{Advice, Message, Payload, Reconnect, encode_payload, parse_payload};
