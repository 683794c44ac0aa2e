//! Transport layer.
//!
//! A transport carries payloads to the CometD server and returns the message
//! answering the first message of each payload. Everything else received on
//! the way (events, advice, subscription confirmations) is handed to the
//! shared [`TransportContext`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   payload    ┌─────────────────┐   POST / frame   ┌────────┐
//! │  Connection  │─────────────►│    Transport    │─────────────────►│ Server │
//! │ (state mach.)│◄─────────────│ (long-polling / │◄─────────────────│        │
//! └──────────────┘   response   │   websocket)    │                  └────────┘
//!                               └────────┬────────┘
//!                                        │ events
//!                                        ▼
//!                               ┌─────────────────┐
//!                               │ incoming queue  │──► Client::receive
//!                               └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | Advice, subscriptions and payload consumption |
//! | `http` | HTTP session abstraction and reqwest implementation |
//! | `long_polling` | HTTP long-polling transport |
//! | `websocket` | WebSocket transport |
//! | `tls` | Certificate validation modes |
//! | `registry` | Connection-type table and negotiation |

// ============================================================================
// Submodules
// ============================================================================

/// Shared transport bookkeeping.
pub mod context;

/// HTTP session abstraction.
pub mod http;

/// HTTP long-polling transport.
pub mod long_polling;

/// Connection-type table and negotiation.
pub mod registry;

/// TLS validation modes.
pub mod tls;

/// WebSocket transport.
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ConnectionType, Message, Payload};

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{DEFAULT_REQUEST_TIMEOUT, REQUEST_TIMEOUT_INCREASE_FACTOR, TransportContext};
pub use http::{Headers, HttpClient, HttpResponse, ReqwestHttpClient};
pub use long_polling::LongPollingTransport;
pub use registry::{TransportOptions, create_transport, pick_connection_type};
pub use tls::TlsMode;
pub use websocket::WebSocketTransport;

// ============================================================================
// Transport
// ============================================================================

/// A concrete carrier for Bayeux payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the connection type this transport implements.
    fn connection_type(&self) -> ConnectionType;

    /// Returns the shared bookkeeping.
    fn context(&self) -> &Arc<TransportContext>;

    /// Sends a fully prepared payload and returns the response to its first
    /// message.
    ///
    /// Extensions have already run on `payload` and `headers`.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the exchange fails, times out or
    /// yields no matching response.
    async fn send_final_payload(&self, payload: Payload, headers: Headers) -> Result<Message>;

    /// Returns the HTTP session held by this transport.
    fn http_client(&self) -> Option<Arc<dyn HttpClient>>;

    /// Removes and returns the HTTP session so [`close`](Self::close) leaves
    /// it untouched.
    fn detach_http_client(&self) -> Option<Arc<dyn HttpClient>>;

    /// Releases network resources.
    async fn close(&self);
}
