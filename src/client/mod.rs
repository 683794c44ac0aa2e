//! Client facade.
//!
//! A [`Client`] owns one Bayeux session at a time. Opening it negotiates a
//! connection type with the server and starts the background connect loop;
//! event messages delivered by the server are buffered in a bounded queue
//! and read with [`Client::receive`] or [`Client::messages`].
//!
//! # Example
//!
//! ```no_run
//! use bayeux_client::{Client, Result};
//! use futures_util::StreamExt;
//! use serde_json::json;
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder("https://example.com/cometd").build()?;
//! client.open().await?;
//!
//! client.subscribe("/chat/room").await?;
//! client.publish("/chat/room", json!({ "text": "hello" })).await?;
//!
//! let mut messages = Box::pin(client.messages());
//! while let Some(message) = messages.next().await {
//!     println!("{:?}", message?.data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! | Operation | Closed client | Open client |
//! |-----------|---------------|-------------|
//! | `open` | negotiates and connects | `InvalidOperation` |
//! | `close` | no-op | disconnects, releases the transport |
//! | `subscribe`, `unsubscribe`, `publish` | `InvalidOperation` | forwarded to the connection |
//! | `receive` | drains buffered messages, then `InvalidOperation` | waits for the next message |

// ============================================================================
// Submodules
// ============================================================================

/// Client configuration and builder.
pub mod builder;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_channel::Receiver;
use futures_util::Stream;
use futures_util::stream;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::{Connection, TransportState};
use crate::error::{Error, Result};
use crate::protocol::{ConnectionType, Message, MetaChannel, is_service_channel};
use crate::transport::{TransportContext, TransportOptions, create_transport, pick_connection_type};

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{
    ClientBuilder, ClientConfig, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_CONNECTION_TYPES,
    DEFAULT_MAX_PENDING_COUNT,
};

// ============================================================================
// Types
// ============================================================================

/// One open-close cycle of a client.
struct Session {
    connection: Connection,
    incoming: Receiver<Message>,
}

// ============================================================================
// Client
// ============================================================================

/// Asynchronous Bayeux client.
///
/// Created with [`Client::builder()`]. A client starts closed; call
/// [`open()`](Self::open) before using it. A closed client can be opened
/// again.
pub struct Client {
    config: ClientConfig,
    session: Mutex<Option<Arc<Session>>>,
    closed: AtomicBool,
    /// Serializes `open` and `close`.
    lifecycle: tokio::sync::Mutex<()>,
}

// ============================================================================
// Client - Constructor
// ============================================================================

impl Client {
    /// Creates a builder for a client of the service at `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            closed: AtomicBool::new(true),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the CometD service URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.config.url
    }

    /// Returns `true` unless the client is open.
    #[inline]
    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the subscribed channels.
    #[must_use]
    pub fn subscriptions(&self) -> FxHashSet<String> {
        self.session()
            .map(|session| session.connection.subscriptions())
            .unwrap_or_default()
    }

    /// Returns the negotiated connection type, or `None` before the first
    /// successful open.
    #[must_use]
    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.session().map(|session| session.connection.connection_type())
    }

    /// Returns the state of the current connection.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.session()
            .map_or(TransportState::Disconnected, |session| session.connection.state())
    }

    /// Returns the number of received messages waiting to be consumed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.session().map_or(0, |session| session.incoming.len())
    }

    /// Returns `true` if received messages are waiting to be consumed.
    #[inline]
    #[must_use]
    pub fn has_pending_messages(&self) -> bool {
        self.pending_count() > 0
    }

    /// Returns the last connect or handshake response seen by the
    /// background loop.
    #[must_use]
    pub fn last_connect_result(&self) -> Option<Message> {
        self.session()
            .and_then(|session| session.connection.last_connect_result())
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Opens the client.
    ///
    /// Performs a handshake over a long-polling transport, switches to the
    /// negotiated connection type if it differs, and starts the background
    /// connect loop. Returns once the first connect response is verified.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the client is already open
    /// - [`Error::Config`] if the server supports none of the configured
    ///   connection types
    /// - [`Error::Server`] if the handshake or the first connect is rejected
    /// - A transport-class error if an exchange fails
    pub async fn open(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.closed() {
            return Err(Error::invalid_operation("Client is already open."));
        }

        info!(url = %self.config.url, "Opening client");

        let (incoming_tx, incoming_rx) = match self.config.queue_capacity() {
            Some(capacity) => async_channel::bounded(capacity),
            None => async_channel::unbounded(),
        };
        let context = Arc::new(TransportContext::new(
            self.config.url.clone(),
            self.config.tls_mode,
            self.config.extensions.clone(),
            incoming_tx,
        ));

        let connection = self.negotiate(context).await?;

        if let Err(e) = connection.connect().await.and_then(verify_response) {
            warn!(error = %e, "Initial connect failed");
            connection.disconnect().await;
            connection.close().await;
            return Err(e);
        }

        let connection_type = connection.connection_type();
        *self.session.lock() = Some(Arc::new(Session {
            connection,
            incoming: incoming_rx,
        }));
        self.closed.store(false, Ordering::SeqCst);

        info!(%connection_type, "Client opened");
        Ok(())
    }

    /// Closes the client.
    ///
    /// Disconnects from the server and releases the transport. Messages
    /// already received stay available to [`receive()`](Self::receive).
    /// Closing a closed client does nothing.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;

        let Some(session) = self.session() else {
            return;
        };

        let was_open = !self.closed();
        if was_open {
            let pending = session.incoming.len();
            if pending == 0 {
                info!("Closing client");
            } else {
                warn!(pending, "Closing client while messages are still pending");
            }
        }

        session.connection.disconnect().await;
        session.connection.close().await;
        self.closed.store(true, Ordering::SeqCst);

        if was_open {
            info!("Client closed");
        }
    }

    /// Creates the transport for this session.
    ///
    /// The provisional transport is closed if negotiation fails.
    async fn negotiate(&self, context: Arc<TransportContext>) -> Result<Connection> {
        let provisional = create_transport(
            ConnectionType::DEFAULT,
            TransportOptions {
                context,
                http_client: self.config.http_client.clone(),
            },
        );
        let connection = Connection::new(Arc::clone(&provisional), self.config.reconnect_timeout);

        match self.negotiate_over(connection).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                provisional.close().await;
                Err(e)
            }
        }
    }

    async fn negotiate_over(&self, connection: Connection) -> Result<Connection> {
        let response = connection
            .handshake(&self.config.connection_types)
            .await
            .and_then(verify_response)?;

        let supported = response.supported_connection_types.unwrap_or_default();
        info!(?supported, "Server supports connection types");

        let Some(connection_type) = pick_connection_type(&self.config.connection_types, &supported)
        else {
            return Err(Error::config(
                "None of the connection types offered by the server are supported.",
            ));
        };

        if connection_type == connection.connection_type() {
            return Ok(connection);
        }

        debug!(from = %connection.connection_type(), to = %connection_type, "Switching transport");

        let client_id = connection.client_id();
        let http_client = connection.transport().detach_http_client();
        connection.close().await;

        let transport = create_transport(
            connection_type,
            TransportOptions {
                context: Arc::new(connection.context().fork()),
                http_client,
            },
        );
        Ok(Connection::with_client_id(
            transport,
            self.config.reconnect_timeout,
            client_id,
        ))
    }
}

// ============================================================================
// Client - Operations
// ============================================================================

impl Client {
    /// Subscribes to `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the client is closed
    /// - [`Error::Server`] if the server rejects the request or ended the
    ///   session
    /// - A transport-class error if the exchange fails
    pub async fn subscribe(&self, channel: &str) -> Result<Message> {
        let session = self.open_session("Can't subscribe while the client is closed.")?;
        self.check_server_disconnected(&session).await?;

        let response = verify_response(session.connection.subscribe(channel).await?)?;
        info!(channel, "Subscribed to channel");
        Ok(response)
    }

    /// Unsubscribes from `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the client is closed
    /// - [`Error::Server`] if the server rejects the request or ended the
    ///   session
    /// - A transport-class error if the exchange fails
    pub async fn unsubscribe(&self, channel: &str) -> Result<Message> {
        let session = self.open_session("Can't unsubscribe while the client is closed.")?;
        self.check_server_disconnected(&session).await?;

        let response = verify_response(session.connection.unsubscribe(channel).await?)?;
        info!(channel, "Unsubscribed from channel");
        Ok(response)
    }

    /// Publishes `data` to `channel` and returns the server's response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the client is closed
    /// - [`Error::Server`] if the server rejects the request or ended the
    ///   session
    /// - A transport-class error if the exchange fails
    pub async fn publish(&self, channel: &str, data: Value) -> Result<Message> {
        let session = self.open_session("Can't publish while the client is closed.")?;
        self.check_server_disconnected(&session).await?;

        verify_response(session.connection.publish(channel, data).await?)
    }

    /// Waits for the next incoming message.
    ///
    /// Messages buffered before the client was closed are still returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] if the client is closed and no message
    ///   is buffered
    /// - [`Error::Server`] if the server ended the session; the client is
    ///   closed first
    /// - [`Error::ConnectionTimeout`] if the connection is lost and not
    ///   restored within the connection timeout
    pub async fn receive(&self) -> Result<Message> {
        let Some(session) = self.session() else {
            return Err(closed_and_drained());
        };

        if let Ok(message) = session.incoming.try_recv() {
            return verify_response(message);
        }
        if self.closed() {
            return Err(closed_and_drained());
        }
        self.check_server_disconnected(&session).await?;

        let connection = &session.connection;
        let message = tokio::select! {
            biased;

            message = session.incoming.recv() => message.map_err(|_| closed_and_drained())?,
            () = connection.wait_for_state(TransportState::ServerDisconnected) => {
                return Err(self.server_disconnected(&session).await);
            }
            e = connection_lost(connection, self.config.connection_timeout) => return Err(e),
            () = connection.wait_for_state(TransportState::Disconnected) => {
                session.incoming.try_recv().map_err(|_| closed_and_drained())?
            }
        };

        verify_response(message)
    }

    /// Returns the incoming messages as a stream.
    ///
    /// The stream ends once the client is closed and every buffered message
    /// was yielded. Any other error is yielded once, then the stream ends.
    /// Call again after reopening the client.
    pub fn messages(&self) -> impl Stream<Item = Result<Message>> + '_ {
        stream::unfold(false, move |finished| async move {
            if finished {
                return None;
            }
            match self.receive().await {
                Ok(message) => Some((Ok(message), false)),
                Err(Error::InvalidOperation { .. }) => None,
                Err(e) => Some((Err(e), true)),
            }
        })
    }

    fn open_session(&self, message: &str) -> Result<Arc<Session>> {
        if self.closed() {
            return Err(Error::invalid_operation(message));
        }
        self.session().ok_or_else(|| Error::invalid_operation(message))
    }

    /// Closes the client if the server ended the session.
    async fn check_server_disconnected(&self, session: &Session) -> Result<()> {
        if session.connection.state() == TransportState::ServerDisconnected {
            return Err(self.server_disconnected(session).await);
        }
        Ok(())
    }

    async fn server_disconnected(&self, session: &Session) -> Error {
        self.close().await;
        Error::server(
            "Connection closed by the server",
            session.connection.last_connect_result(),
        )
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Fails with [`Error::Server`] if `response` reports `successful: false`.
fn verify_response(response: Message) -> Result<Message> {
    if response.successful != Some(false) {
        return Ok(response);
    }

    let message = match response.meta_channel() {
        Some(MetaChannel::Handshake) => "Handshake request failed.",
        Some(MetaChannel::Connect) => "Connect request failed.",
        Some(MetaChannel::Disconnect) => "Disconnect request failed.",
        Some(MetaChannel::Subscribe) => "Subscribe request failed.",
        Some(MetaChannel::Unsubscribe) => "Unsubscribe request failed.",
        None if is_service_channel(&response.channel) => "Service request failed.",
        None => "Publish request failed.",
    };
    Err(Error::server(message, Some(response)))
}

fn closed_and_drained() -> Error {
    Error::invalid_operation("The client is closed and there are no pending messages.")
}

/// Resolves once the connection stays out of the connected state for longer
/// than `timeout`. Never resolves if `timeout` is `None`.
async fn connection_lost(connection: &Connection, timeout: Option<Duration>) -> Error {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };

    loop {
        connection.wait_for_state(TransportState::Connecting).await;
        if tokio::time::timeout(timeout, connection.wait_for_state(TransportState::Connected))
            .await
            .is_err()
        {
            warn!(timeout_ms = timeout.as_millis(), "Lost connection with the server");
            return Error::connection_timeout(timeout);
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.config.url.as_str())
            .field("connection_types", &self.config.connection_types)
            .field("connection_timeout", &self.config.connection_timeout)
            .field("tls_mode", &self.config.tls_mode)
            .field("max_pending_count", &self.config.max_pending_count)
            .field("closed", &self.closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::time::timeout;

    use crate::transport::testing::{ScriptedHttpClient, WebSocketServer};
    use crate::transport::{HttpClient, Transport};

    const CONNECT: &str = "/meta/connect";
    const HANDSHAKE: &str = "/meta/handshake";
    const WAIT: Duration = Duration::from_secs(2);

    fn client_with(http: &Arc<ScriptedHttpClient>, builder: ClientBuilder) -> Client {
        let http: Arc<dyn HttpClient> = Arc::clone(http) as Arc<dyn HttpClient>;
        builder
            .http_client(http)
            .reconnect_timeout(Duration::from_millis(10))
            .build()
            .expect("valid config")
    }

    fn client(http: &Arc<ScriptedHttpClient>) -> Client {
        client_with(http, Client::builder("http://localhost/cometd"))
    }

    async fn wait_for_pending(client: &Client, count: usize) {
        timeout(WAIT, async {
            while client.pending_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages buffered in time");
    }

    async fn wait_for_state(client: &Client, state: TransportState) {
        timeout(WAIT, async {
            while client.state() != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("state reached in time");
    }

    #[tokio::test]
    async fn test_end_to_end_subscribe_publish_receive() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);

        client.open().await.expect("open");
        assert!(!client.closed());
        assert_eq!(client.connection_type(), Some(ConnectionType::LongPolling));
        assert!(client.subscriptions().is_empty());

        let response = client.subscribe("/foo").await.expect("subscribe");
        assert_eq!(response.successful, Some(true));
        assert_eq!(response.subscription.as_deref(), Some("/foo"));
        assert_eq!(client.subscriptions(), FxHashSet::from_iter(["/foo".to_string()]));

        client.publish("/foo", json!({ "x": 1 })).await.expect("publish");
        http.push_event(json!({ "channel": "/foo", "data": { "x": 1 } }));

        let message = timeout(WAIT, client.receive())
            .await
            .expect("message in time")
            .expect("message");
        assert_eq!(message.channel, "/foo");
        assert_eq!(message.data, Some(json!({ "x": 1 })));

        client.close().await;
        assert!(client.closed());
    }

    #[tokio::test]
    async fn test_open_switches_to_negotiated_websocket() {
        let server = WebSocketServer::spawn(0, None).await;
        let http = Arc::new(ScriptedHttpClient::new());
        http.set_supported(vec!["websocket", "long-polling"]);
        http.script(HANDSHAKE, json!({}));
        let client = client_with(&http, Client::builder(server.url.as_str()));

        client.open().await.expect("open");
        assert_eq!(client.connection_type(), Some(ConnectionType::WebSocket));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        let handshake = &requests[0].payload[0];
        assert_eq!(handshake.channel, HANDSHAKE);
        assert_eq!(
            handshake.supported_connection_types,
            Some(vec!["websocket".to_string(), "long-polling".to_string()])
        );

        let connect = &server.frames()[0][0];
        assert_eq!(connect.channel, CONNECT);
        assert_eq!(connect.id.as_deref(), Some("0"));
        assert_eq!(connect.client_id.as_deref(), Some("c1"));
        assert_eq!(connect.connection_type.as_deref(), Some("websocket"));

        let session = client.session().expect("open session");
        let carried = session
            .connection
            .transport()
            .http_client()
            .expect("http session carried over");
        assert!(std::ptr::addr_eq(Arc::as_ptr(&carried), Arc::as_ptr(&http)));
        assert_eq!(session.connection.reconnect_advice().timeout, Some(1000));

        client.subscribe("/foo").await.expect("subscribe over websocket");
        client.close().await;
        assert!(
            server
                .frames()
                .iter()
                .any(|payload| payload[0].channel == "/meta/disconnect")
        );
        assert_eq!(server.accepted(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_connection_types_fail_after_handshake() {
        let http = Arc::new(ScriptedHttpClient::auto());
        http.set_supported(vec!["callback-polling"]);
        let client = client_with(
            &http,
            Client::builder("http://localhost/cometd").connection_type(ConnectionType::WebSocket),
        );

        let err = client.open().await.expect_err("no common connection type");
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("None of the connection types"));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload[0].channel, HANDSHAKE);
        assert!(client.closed());
    }

    #[tokio::test]
    async fn test_rejected_handshake_surfaces_server_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.script(HANDSHAKE, json!({ "successful": false, "error": "403::Handshake denied" }));
        let client = client(&http);

        let err = client.open().await.expect_err("handshake rejected");
        assert!(err.is_server_error());
        assert!(err.to_string().contains("Handshake request failed."));
        assert_eq!(err.error_code(), Some(403));
        assert_eq!(err.error_message().as_deref(), Some("Handshake denied"));
        assert!(client.closed());
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);

        client.open().await.expect("open");
        let err = client.open().await.expect_err("already open");
        assert!(matches!(err, Error::InvalidOperation { .. }));

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);

        client.close().await;
        assert_eq!(client.state(), TransportState::Disconnected);

        client.open().await.expect("open");
        client.close().await;
        assert!(client.closed());
        assert_eq!(client.state(), TransportState::Disconnected);

        client.close().await;
        assert!(client.closed());
        assert_eq!(client.state(), TransportState::Disconnected);
        assert_eq!(http.payloads_for("/meta/disconnect").len(), 1);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_operations() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);

        for err in [
            client.subscribe("/foo").await.expect_err("closed"),
            client.unsubscribe("/foo").await.expect_err("closed"),
            client.publish("/foo", json!(1)).await.expect_err("closed"),
            client.receive().await.expect_err("closed"),
        ] {
            assert!(matches!(err, Error::InvalidOperation { .. }));
        }
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_messages_survive_close() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);
        client.open().await.expect("open");

        http.push_event(json!({ "channel": "/foo", "data": 1 }));
        http.push_event(json!({ "channel": "/foo", "data": 2 }));
        wait_for_pending(&client, 2).await;
        assert!(client.has_pending_messages());

        client.close().await;

        let data: Vec<Value> = client
            .messages()
            .map(|message| message.expect("message").data.unwrap_or_default())
            .collect()
            .await;
        assert_eq!(data, vec![json!(1), json!(2)]);

        let err = client.receive().await.expect_err("drained");
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_server_disconnect_closes_client_on_receive() {
        let http = Arc::new(ScriptedHttpClient::auto());
        http.script(CONNECT, json!({}));
        http.script(CONNECT, json!({ "successful": false, "advice": { "reconnect": "none" } }));
        let client = client(&http);

        client.open().await.expect("open");

        let err = timeout(WAIT, client.receive())
            .await
            .expect("error in time")
            .expect_err("server disconnected");
        assert!(err.is_server_error());
        assert!(err.to_string().contains("Connection closed by the server"));
        assert_eq!(err.response().map(|m| m.channel.as_str()), Some(CONNECT));
        assert!(client.closed());
    }

    #[tokio::test]
    async fn test_server_disconnect_fails_publish() {
        let http = Arc::new(ScriptedHttpClient::auto());
        http.script(CONNECT, json!({}));
        http.script(CONNECT, json!({ "successful": false, "advice": { "reconnect": "none" } }));
        let client = client(&http);

        client.open().await.expect("open");
        wait_for_state(&client, TransportState::ServerDisconnected).await;

        let err = client.publish("/foo", json!(1)).await.expect_err("server disconnected");
        assert!(err.is_server_error());
        assert!(client.closed());
        assert!(http.payloads_for("/foo").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_publish_carries_response() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);
        client.open().await.expect("open");

        http.script("/foo", json!({ "successful": false, "error": "402:/foo:Forbidden" }));
        let err = client.publish("/foo", json!(1)).await.expect_err("rejected");
        assert!(err.to_string().contains("Publish request failed."));
        assert_eq!(err.error_code(), Some(402));
        assert_eq!(err.error_args(), Some(vec!["/foo".to_string()]));

        http.script("/service/echo", json!({ "successful": false }));
        let err = client
            .publish("/service/echo", json!(1))
            .await
            .expect_err("rejected");
        assert!(err.to_string().contains("Service request failed."));

        client.close().await;
    }

    #[tokio::test]
    async fn test_lost_connection_times_out_receive() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client_with(
            &http,
            Client::builder("http://localhost/cometd")
                .connection_timeout(Some(Duration::from_millis(50))),
        );
        client.open().await.expect("open");

        for _ in 0..50 {
            http.script_failure(CONNECT, "connection reset");
        }

        let err = timeout(WAIT, client.receive())
            .await
            .expect("error in time")
            .expect_err("connection lost");
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 50 }));
        assert!(err.is_timeout());

        client.close().await;
    }

    #[tokio::test]
    async fn test_client_can_be_reopened() {
        let http = Arc::new(ScriptedHttpClient::auto());
        let client = client(&http);

        client.open().await.expect("open");
        client.close().await;
        client.open().await.expect("reopen");
        assert!(!client.closed());
        assert_eq!(http.payloads_for(HANDSHAKE).len(), 2);

        client.close().await;
    }

    #[test]
    fn test_debug_shows_configuration() {
        let client = Client::builder("http://localhost/cometd")
            .max_pending_count(5)
            .build()
            .expect("valid config");
        let debug = format!("{client:?}");
        assert!(debug.contains("http://localhost/cometd"));
        assert!(debug.contains("max_pending_count: 5"));
        assert!(debug.contains("closed: true"));
    }
}
