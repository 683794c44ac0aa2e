//! Connection-type table and negotiation.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::debug;

use crate::protocol::ConnectionType;

use super::Transport;
use super::context::TransportContext;
use super::http::HttpClient;
use super::long_polling::LongPollingTransport;
use super::websocket::WebSocketTransport;

// ============================================================================
// TransportOptions
// ============================================================================

/// Everything a transport constructor needs.
#[derive(Clone)]
pub struct TransportOptions {
    /// Shared bookkeeping for the new transport.
    pub context: Arc<TransportContext>,
    /// HTTP session to reuse, if any.
    pub http_client: Option<Arc<dyn HttpClient>>,
}

/// Transport constructor.
type Constructor = fn(TransportOptions) -> Arc<dyn Transport>;

/// Every supported connection type and its constructor.
static TRANSPORTS: [(ConnectionType, Constructor); 2] = [
    (ConnectionType::LongPolling, long_polling),
    (ConnectionType::WebSocket, websocket),
];

fn long_polling(options: TransportOptions) -> Arc<dyn Transport> {
    Arc::new(LongPollingTransport::new(options.context, options.http_client))
}

fn websocket(options: TransportOptions) -> Arc<dyn Transport> {
    Arc::new(WebSocketTransport::new(options.context, options.http_client))
}

// ============================================================================
// Functions
// ============================================================================

/// Returns the constructor registered for `connection_type`.
fn constructor(connection_type: ConnectionType) -> Constructor {
    TRANSPORTS
        .iter()
        .find(|(kind, _)| *kind == connection_type)
        .map_or(long_polling as Constructor, |(_, constructor)| *constructor)
}

/// Creates a transport of the given type.
#[must_use]
pub fn create_transport(connection_type: ConnectionType, options: TransportOptions) -> Arc<dyn Transport> {
    debug!(%connection_type, "Creating transport");
    constructor(connection_type)(options)
}

/// Picks the connection type to use.
///
/// Returns the type that appears in both lists with the lowest index in
/// `preferences`, or `None` if the lists share nothing. Unknown server-side
/// names are ignored.
#[must_use]
pub fn pick_connection_type(
    preferences: &[ConnectionType],
    server_supported: &[String],
) -> Option<ConnectionType> {
    preferences
        .iter()
        .copied()
        .find(|preferred| server_supported.iter().any(|name| name == preferred.as_str()))
}

// ============================================================================
// Tests
// ============================================================================
