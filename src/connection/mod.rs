//! Connection state machine.
//!
//! A [`Connection`] drives one transport through the Bayeux session:
//! handshake, connect, subscribe/unsubscribe/publish and disconnect.
//!
//! # Reconnection
//!
//! [`Connection::connect`] starts a background task that keeps issuing
//! connect requests. After each one completes the next operation is chosen
//! from the reconnect advice:
//!
//! | Outcome | Next operation | Delay |
//! |---------|----------------|-------|
//! | Successful response | connect | advised `interval`, else reconnect timeout |
//! | Failed response, advice `retry` or none | connect | advised `interval`, else reconnect timeout |
//! | Failed response, advice `handshake` | handshake | advised `interval`, else reconnect timeout |
//! | Failed response, any other advice | stop, state `SERVER_DISCONNECTED` | |
//! | Network error | connect | reconnect timeout |
//!
//! A successful response never stops the loop, whatever advice it carries.
//!
//! Nothing is scheduled while a disconnect is in progress.
//!
//! # Message Finalization
//!
//! Every outgoing message gets the next message id. All but the handshake
//! carry the client id, and connect requests carry the connection type.

// ============================================================================
// Submodules
// ============================================================================

/// Connection states and the state signal.
pub mod state;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Advice, ConnectionType, Message, MetaChannel, Payload, Reconnect};
use crate::transport::{Headers, Transport, TransportContext};

use self::state::StateSignal;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::state::TransportState;

// ============================================================================
// Constants
// ============================================================================

/// Default delay before reconnecting after a network failure.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Operation run by the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Connect,
    Handshake,
}

/// Shared state of a connection.
struct ConnectionInner {
    /// Transport carrying the payloads.
    transport: Arc<dyn Transport>,
    /// Client id granted by the last successful handshake.
    client_id: Mutex<Option<String>>,
    /// Next message id.
    message_id: AtomicU64,
    /// Resend subscriptions with the next connect request.
    subscribe_on_connect: AtomicBool,
    /// Current state.
    state: StateSignal,
    /// Background connect task.
    connect_task: Mutex<Option<JoinHandle<()>>>,
    /// Last response of the background task.
    last_connect_result: Mutex<Option<Message>>,
    /// Delay before reconnecting after a network failure.
    reconnect_timeout: Duration,
}

// ============================================================================
// Connection
// ============================================================================

/// A Bayeux session over one transport.
///
/// Dropping a connection aborts its background task.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Creates a disconnected connection over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, reconnect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                client_id: Mutex::new(None),
                message_id: AtomicU64::new(0),
                subscribe_on_connect: AtomicBool::new(false),
                state: StateSignal::new(),
                connect_task: Mutex::new(None),
                last_connect_result: Mutex::new(None),
                reconnect_timeout,
            }),
        }
    }

    /// Creates a connection that continues a session granted elsewhere.
    ///
    /// Used when the negotiated transport replaces the one that performed
    /// the handshake.
    #[must_use]
    pub fn with_client_id(
        transport: Arc<dyn Transport>,
        reconnect_timeout: Duration,
        client_id: Option<String>,
    ) -> Self {
        let connection = Self::new(transport, reconnect_timeout);
        *connection.inner.client_id.lock() = client_id;
        connection
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Returns the transport's connection type.
    #[inline]
    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.inner.transport.connection_type()
    }

    /// Returns the shared transport bookkeeping.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Arc<TransportContext> {
        self.inner.transport.context()
    }

    /// Returns the CometD service URL.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        self.context().endpoint()
    }

    /// Returns the client id granted by the server.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.lock().clone()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.state.get()
    }

    /// Waits until the connection enters `state`.
    ///
    /// Returns at once if it is already there.
    pub async fn wait_for_state(&self, state: TransportState) {
        self.inner.state.wait_for(state).await;
    }

    /// Returns the subscribed channels.
    #[must_use]
    pub fn subscriptions(&self) -> FxHashSet<String> {
        self.context().subscriptions()
    }

    /// Returns the last advice received from the server.
    #[must_use]
    pub fn reconnect_advice(&self) -> Advice {
        self.context().reconnect_advice()
    }

    /// Returns the timeout applied to each network exchange.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.context().request_timeout()
    }

    /// Returns the last response seen by the background task.
    #[must_use]
    pub fn last_connect_result(&self) -> Option<Message> {
        self.inner.last_connect_result.lock().clone()
    }
}

// ============================================================================
// Connection - Operations
// ============================================================================

impl Connection {
    /// Performs a handshake.
    ///
    /// `connection_types` is offered to the server; this connection's own
    /// type is appended if missing.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the exchange fails.
    pub async fn handshake(&self, connection_types: &[ConnectionType]) -> Result<Message> {
        self.inner.handshake(connection_types).await
    }

    /// Starts the background connect task and returns its first response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] without a client id, or unless
    ///   disconnected
    /// - A transport-class error if the first connect fails
    pub async fn connect(&self) -> Result<Message> {
        if self.client_id().is_none() {
            return Err(Error::invalid_operation(
                "Can't connect to the server without a client id. Do a handshake first.",
            ));
        }
        if !matches!(
            self.state(),
            TransportState::Disconnected | TransportState::ServerDisconnected
        ) {
            return Err(Error::invalid_operation(
                "Can't connect to a server without disconnecting first.",
            ));
        }

        self.inner.state.set(TransportState::Connecting);

        let (first_tx, first_rx) = oneshot::channel();
        let task = tokio::spawn(ConnectionInner::run_connect_loop(
            Arc::clone(&self.inner),
            first_tx,
        ));
        if let Some(previous) = self.inner.connect_task.lock().replace(task) {
            previous.abort();
        }

        first_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Disconnects from the server.
    ///
    /// Stops the background task, then sends a disconnect request if the
    /// connection was connected. Failures of that request are ignored. Always
    /// ends in [`TransportState::Disconnected`].
    pub async fn disconnect(&self) {
        let should_send = self.state() == TransportState::Connected;
        self.inner.state.set(TransportState::Disconnecting);
        self.stop_connect_task().await;

        if should_send
            && let Err(e) = self.inner.send_message(Message::disconnect()).await
        {
            debug!(error = %e, "Disconnect request failed");
        }

        self.inner.state.set(TransportState::Disconnected);
    }

    /// Releases the transport's network resources.
    pub async fn close(&self) {
        self.inner.transport.close().await;
    }

    /// Subscribes to `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] unless connecting or connected
    /// - A transport-class error if the exchange fails
    pub async fn subscribe(&self, channel: &str) -> Result<Message> {
        self.ensure_connected("Can't subscribe without being connected to a server.")?;
        self.inner.send_message(Message::subscribe(channel)).await
    }

    /// Unsubscribes from `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] unless connecting or connected
    /// - A transport-class error if the exchange fails
    pub async fn unsubscribe(&self, channel: &str) -> Result<Message> {
        self.ensure_connected("Can't unsubscribe without being connected to a server.")?;
        self.inner.send_message(Message::unsubscribe(channel)).await
    }

    /// Publishes `data` to `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidOperation`] unless connecting or connected
    /// - A transport-class error if the exchange fails
    pub async fn publish(&self, channel: &str, data: Value) -> Result<Message> {
        self.ensure_connected("Can't publish without being connected to a server.")?;
        self.inner.send_message(Message::publish(channel, data)).await
    }

    fn ensure_connected(&self, message: &str) -> Result<()> {
        match self.state() {
            TransportState::Connecting | TransportState::Connected => Ok(()),
            _ => Err(Error::invalid_operation(message)),
        }
    }

    /// Aborts the background task and waits for it to finish.
    async fn stop_connect_task(&self) {
        let task = self.inner.connect_task.lock().take();
        if let Some(task) = task
            && !task.is_finished()
        {
            task.abort();
            let _ = task.await;
        }
    }
}

// ============================================================================
// ConnectionInner
// ============================================================================

impl ConnectionInner {
    async fn handshake(&self, connection_types: &[ConnectionType]) -> Result<Message> {
        self.message_id.store(0, Ordering::SeqCst);

        let own = self.transport.connection_type();
        let mut offered = connection_types.to_vec();
        if !offered.contains(&own) {
            offered.push(own);
        }

        let response = self.send_message(Message::handshake(&offered)).await?;
        if response.successful == Some(true) {
            *self.client_id.lock() = response.client_id.clone();
            self.subscribe_on_connect.store(true, Ordering::SeqCst);
            debug!(client_id = ?response.client_id, "Handshake succeeded");
        }
        Ok(response)
    }

    /// Sends one connect request, bundling resubscriptions when due.
    async fn connect_once(&self) -> Result<Message> {
        let mut payload = vec![Message::connect()];
        if self.subscribe_on_connect.load(Ordering::SeqCst) {
            let mut channels: Vec<String> = self.transport.context().subscriptions().into_iter().collect();
            channels.sort();
            if !channels.is_empty() {
                debug!(count = channels.len(), "Resubscribing with connect request");
            }
            payload.extend(channels.into_iter().map(Message::subscribe));
        }

        let response = self.send_payload_with_auth(payload).await?;
        self.subscribe_on_connect
            .store(response.successful != Some(true), Ordering::SeqCst);
        Ok(response)
    }

    /// Background task: runs connect/handshake operations as advised.
    async fn run_connect_loop(inner: Arc<Self>, first_tx: oneshot::Sender<Result<Message>>) {
        let mut first_tx = Some(first_tx);
        let mut operation = Operation::Connect;
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = match operation {
                Operation::Connect => inner.connect_once().await,
                Operation::Handshake => inner.handshake(&[inner.transport.connection_type()]).await,
            };

            let next = inner.follow_advice(&result);

            if let Ok(response) = &result {
                *inner.last_connect_result.lock() = Some(response.clone());
            }
            if let Some(tx) = first_tx.take() {
                let _ = tx.send(result);
            }

            match next {
                Some((next_operation, next_delay)) => {
                    operation = next_operation;
                    delay = next_delay;
                }
                None => break,
            }
        }
    }

    /// Updates the state after an operation and picks the next one.
    fn follow_advice(&self, result: &Result<Message>) -> Option<(Operation, Duration)> {
        let mut reconnect = Reconnect::Retry;
        let mut delay = self
            .transport
            .context()
            .reconnect_advice()
            .interval
            .map_or(self.reconnect_timeout, Duration::from_millis);

        match result {
            Ok(response) => {
                if response.is_server_error()
                    && let Some(advised) = response.advice.as_ref().and_then(|a| a.reconnect)
                {
                    reconnect = advised;
                }
                self.state.set(TransportState::Connected);
                debug!(channel = %response.channel, successful = ?response.successful, "Connect task finished");
            }
            Err(e) => {
                warn!(error = %e, "Connect task failed");
                delay = self.reconnect_timeout;
                if self.state.get() != TransportState::Disconnecting {
                    self.state.set(TransportState::Connecting);
                }
            }
        }

        if self.state.get() == TransportState::Disconnecting {
            return None;
        }

        match reconnect {
            Reconnect::Retry => Some((Operation::Connect, delay)),
            Reconnect::Handshake => Some((Operation::Handshake, delay)),
            _ => {
                warn!("No reconnect advice provided, no more operations will be scheduled");
                self.state.set(TransportState::ServerDisconnected);
                info!("Server disconnected the session");
                None
            }
        }
    }

    async fn send_message(&self, message: Message) -> Result<Message> {
        self.send_payload_with_auth(vec![message]).await
    }

    /// Sends `payload`, resending once after re-authenticating if the
    /// server rejects it with a 401/403 error.
    async fn send_payload_with_auth(&self, payload: Payload) -> Result<Message> {
        let response = self.send_payload(payload.clone()).await?;

        if let Some(auth) = self.transport.context().extensions().auth()
            && response.is_auth_error()
        {
            debug!(channel = %response.channel, "Authentication error, re-authenticating");
            auth.authenticate().await?;
            return self.send_payload(payload).await;
        }
        Ok(response)
    }

    /// Finalizes `payload`, runs the outgoing extensions and sends it.
    async fn send_payload(&self, mut payload: Payload) -> Result<Message> {
        for message in &mut payload {
            self.finalize_message(message);
        }

        let mut headers = Headers::default();
        self.transport
            .context()
            .extensions()
            .process_outgoing(&mut payload, &mut headers)
            .await?;

        self.transport.send_final_payload(payload, headers).await
    }

    fn finalize_message(&self, message: &mut Message) {
        message.id = Some(self.message_id.fetch_add(1, Ordering::SeqCst).to_string());

        match message.meta_channel() {
            Some(MetaChannel::Handshake) => {}
            Some(MetaChannel::Connect) => {
                message.client_id = self.client_id.lock().clone();
                message.connection_type = Some(self.transport.connection_type().as_str().to_string());
            }
            _ => message.client_id = self.client_id.lock().clone(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint().as_str())
            .field("connection_type", &self.connection_type())
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.inner.connect_task.lock().take() {
            task.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
