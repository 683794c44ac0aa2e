//! Error types for the Bayeux client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bayeux_client::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.subscribe("/chat/room").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration / usage | [`Error::Config`], [`Error::InvalidOperation`] |
//! | Transport | [`Error::Transport`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`] |
//! | Session | [`Error::ConnectionTimeout`] |
//! | Server | [`Error::Server`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`], [`Error::Tls`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::{ErrorField, Message};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Errors are scoped to a single [`Client`](crate::Client); none of them is
/// fatal to the process.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration / Usage Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the client configuration is invalid, or when none of the
    /// connection types offered by the server are acceptable.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The requested operation can't be executed in the current state.
    ///
    /// Returned for usage errors such as publishing on a closed client or
    /// connecting without a client id. Never retried.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of the rejected operation.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Network or framing failure while exchanging messages.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The connection was closed unexpectedly.
    ///
    /// Returned for in-flight requests when the server sends a close frame or
    /// the transport is shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A single network exchange exceeded the request timeout.
    #[error("Request on {channel} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Channel of the first message in the payload.
        channel: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection could not be re-established in time.
    ///
    /// Returned by [`Client::receive`](crate::Client::receive) when the
    /// background reconnection loop fails to restore a connected state within
    /// the configured connection timeout.
    #[error("Lost connection with the server, not restored within {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// The server rejected a request (`successful: false`) or terminated the
    /// session.
    #[error("Server error: {message}")]
    Server {
        /// Description of the failed request.
        message: String,
        /// The server's response message, if any.
        response: Option<Box<Message>>,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid service URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    #[inline]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    ///
    /// Timeouts beyond `u64::MAX` milliseconds are reported as `u64::MAX`.
    #[inline]
    pub fn request_timeout(channel: impl Into<String>, timeout: Duration) -> Self {
        Self::RequestTimeout {
            channel: channel.into(),
            timeout_ms: saturating_millis(timeout),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout: Duration) -> Self {
        Self::ConnectionTimeout {
            timeout_ms: saturating_millis(timeout),
        }
    }

    /// Creates a server error carrying the server's response.
    #[inline]
    pub fn server(message: impl Into<String>, response: Option<Message>) -> Self {
        Self::Server {
            message: message.into(),
            response: response.map(Box::new),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this error happened while transporting messages.
    ///
    /// These errors drive the fixed-delay retry policy of the background
    /// reconnection loop.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ConnectionClosed
                | Self::RequestTimeout { .. }
                | Self::Io(_)
                | Self::Json(_)
                | Self::WebSocket(_)
                | Self::Http(_)
        )
    }

    /// Returns `true` if the server rejected the request.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Returns the server's response message for [`Error::Server`].
    #[must_use]
    pub fn response(&self) -> Option<&Message> {
        match self {
            Self::Server { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Returns the parsed `error` field of the server's response.
    #[must_use]
    pub fn error_field(&self) -> Option<ErrorField> {
        self.response()
            .and_then(|response| response.error.as_deref())
            .map(ErrorField::parse)
    }

    /// Returns the 3-digit error code of the server's response.
    #[must_use]
    pub fn error_code(&self) -> Option<u16> {
        self.error_field().and_then(|field| field.code)
    }

    /// Returns the arguments part of the server's error field.
    #[must_use]
    pub fn error_args(&self) -> Option<Vec<String>> {
        self.error_field().and_then(|field| field.args)
    }

    /// Returns the description part of the server's error field.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_field().and_then(|field| field.message)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
