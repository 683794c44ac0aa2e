//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bayeux_client::{Client, ConnectionType};
//!
//! # fn example() -> bayeux_client::Result<()> {
//! let client = Client::builder("https://example.com/cometd")
//!     .connection_types([ConnectionType::WebSocket, ConnectionType::LongPolling])
//!     .connection_timeout(Some(Duration::from_secs(30)))
//!     .max_pending_count(500)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::connection::DEFAULT_RECONNECT_TIMEOUT;
use crate::error::{Error, Result};
use crate::extension::{AuthExtension, Extension, ExtensionPipeline};
use crate::protocol::ConnectionType;
use crate::transport::{HttpClient, TlsMode};

use super::Client;

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for restoring a lost connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the incoming-message queue.
pub const DEFAULT_MAX_PENDING_COUNT: i64 = 100;

/// Default connection-type preference.
pub const DEFAULT_CONNECTION_TYPES: [ConnectionType; 2] =
    [ConnectionType::WebSocket, ConnectionType::LongPolling];

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// CometD service URL.
    pub url: Url,
    /// Connection types in order of preference.
    pub connection_types: Vec<ConnectionType>,
    /// Time allowed for the background loop to restore a lost connection.
    /// `None` waits forever.
    pub connection_timeout: Option<Duration>,
    /// Certificate validation mode.
    pub tls_mode: TlsMode,
    /// Capacity of the incoming-message queue. Unbounded if `<= 0`.
    pub max_pending_count: i64,
    /// Delay before reconnecting after a network failure.
    pub reconnect_timeout: Duration,
    /// Extension hooks.
    pub extensions: ExtensionPipeline,
    /// HTTP session to use instead of a new reqwest client.
    pub http_client: Option<Arc<dyn HttpClient>>,
}

impl ClientConfig {
    /// Returns the queue capacity, or `None` for an unbounded queue.
    #[inline]
    #[must_use]
    pub fn queue_capacity(&self) -> Option<usize> {
        usize::try_from(self.max_pending_count).ok().filter(|n| *n > 0)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url.as_str())
            .field("connection_types", &self.connection_types)
            .field("connection_timeout", &self.connection_timeout)
            .field("tls_mode", &self.tls_mode)
            .field("max_pending_count", &self.max_pending_count)
            .field("reconnect_timeout", &self.reconnect_timeout)
            .field("extensions", &self.extensions)
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ClientBuilder {
    url: String,
    connection_types: Vec<ConnectionType>,
    connection_timeout: Option<Duration>,
    tls_mode: TlsMode,
    max_pending_count: i64,
    reconnect_timeout: Duration,
    extensions: Vec<Arc<dyn Extension>>,
    auth: Option<Arc<dyn AuthExtension>>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl ClientBuilder {
    /// Creates a builder for the service at `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_types: DEFAULT_CONNECTION_TYPES.to_vec(),
            connection_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            tls_mode: TlsMode::default(),
            max_pending_count: DEFAULT_MAX_PENDING_COUNT,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            extensions: Vec::new(),
            auth: None,
            http_client: None,
        }
    }

    /// Sets the connection types to use, in order of preference.
    #[must_use]
    pub fn connection_types(mut self, types: impl IntoIterator<Item = ConnectionType>) -> Self {
        self.connection_types = types.into_iter().collect();
        self
    }

    /// Restricts the client to a single connection type.
    #[inline]
    #[must_use]
    pub fn connection_type(self, connection_type: ConnectionType) -> Self {
        self.connection_types([connection_type])
    }

    /// Sets the time allowed for restoring a lost connection before
    /// [`Client::receive`] fails. `None` waits forever.
    #[inline]
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the certificate validation mode.
    #[inline]
    #[must_use]
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Sets the number of messages buffered before the connection stops
    /// reading from the server. Values `<= 0` mean unbounded.
    #[inline]
    #[must_use]
    pub fn max_pending_count(mut self, count: i64) -> Self {
        self.max_pending_count = count;
        self
    }

    /// Sets the delay before reconnecting after a network failure.
    #[inline]
    #[must_use]
    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Adds an extension. Extensions run in the order they are added.
    #[must_use]
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Sets the authentication extension.
    #[inline]
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn AuthExtension>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the HTTP session used by the transports.
    #[inline]
    #[must_use]
    pub fn http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if the URL scheme is not HTTP(S) or no connection
    ///   type is set
    pub fn build(self) -> Result<Client> {
        let config = self.into_config()?;
        Ok(Client::new(config))
    }

    /// Validates the settings.
    fn into_config(self) -> Result<ClientConfig> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "Unsupported URL scheme {:?}. Use an http:// or https:// CometD endpoint.",
                url.scheme()
            )));
        }

        let mut connection_types = Vec::with_capacity(self.connection_types.len());
        for connection_type in self.connection_types {
            if !connection_types.contains(&connection_type) {
                connection_types.push(connection_type);
            }
        }
        if connection_types.is_empty() {
            return Err(Error::config(
                "At least one connection type is required. Use .connection_types() to set them.",
            ));
        }

        Ok(ClientConfig {
            url,
            connection_types,
            connection_timeout: self.connection_timeout,
            tls_mode: self.tls_mode,
            max_pending_count: self.max_pending_count,
            reconnect_timeout: self.reconnect_timeout,
            extensions: ExtensionPipeline::new(self.extensions, self.auth),
            http_client: self.http_client,
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("connection_types", &self.connection_types)
            .field("connection_timeout", &self.connection_timeout)
            .field("tls_mode", &self.tls_mode)
            .field("max_pending_count", &self.max_pending_count)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
