//! Bayeux client - Asynchronous CometD publish-subscribe client.
//!
//! This library implements the client side of the Bayeux protocol over
//! WebSocket and HTTP long-polling.
//!
//! # Architecture
//!
//! The client is layered:
//!
//! - **Client**: lifecycle, negotiation, incoming-message queue
//! - **Connection**: handshake/connect state machine and reconnection loop
//! - **Transport**: one network exchange at a time, correlated by message id
//!
//! Key design principles:
//!
//! - Each [`Client`] owns one session at a time; a closed client can reopen
//! - Responses are matched to requests by `(channel, id)`, never by order
//! - Event messages flow into one bounded queue (backpressure when full)
//! - Reconnection follows the server's advice
//!
//! # Quick Start
//!
//! ```no_run
//! use bayeux_client::{Client, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Build a client, websocket preferred over long-polling
//!     let client = Client::builder("https://example.com/cometd").build()?;
//!
//!     // Handshake and start the connect loop
//!     client.open().await?;
//!
//!     // Subscribe and publish
//!     client.subscribe("/chat/room").await?;
//!     client.publish("/chat/room", json!({ "text": "hello" })).await?;
//!
//!     // Wait for the next event message
//!     let message = client.receive().await?;
//!     println!("{}: {:?}", message.channel, message.data);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] facade and [`ClientBuilder`] |
//! | [`connection`] | Connection state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`extension`] | Message extension hooks |
//! | [`protocol`] | Bayeux message types |
//! | [`transport`] | WebSocket and long-polling transports |

// ============================================================================
// Modules
// ============================================================================

/// Client facade and configuration.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Connection state machine.
///
/// Drives a transport through handshake, connect and disconnect.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Extension hooks applied to every payload.
pub mod extension;

/// Bayeux protocol message types.
pub mod protocol;

/// Transport layer.
///
/// Long-polling over HTTP and a persistent WebSocket, behind one trait.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ClientConfig};

// Connection types
pub use connection::{Connection, TransportState};

// Error types
pub use error::{Error, Result};

// Extension types
pub use extension::{AuthExtension, Extension, ExtensionPipeline};

// Protocol types
pub use protocol::{Advice, ConnectionType, ErrorField, Message, MetaChannel, Payload, Reconnect};

// Transport types
pub use transport::{Headers, HttpClient, HttpResponse, ReqwestHttpClient, TlsMode, Transport};
