//! WebSocket transport.
//!
//! A single socket is kept open and reused for every exchange. A background
//! task owns the socket and multiplexes it:
//!
//! - Outgoing payloads arrive over a command channel and register a pending
//!   entry keyed by the id of their first message
//! - Incoming frames are parsed, run through the context (extensions, advice,
//!   subscriptions, event queue) and resolve any pending entry they answer
//!
//! When the socket closes, every pending entry fails with
//! [`Error::ConnectionClosed`]. The next exchange opens a new socket and
//! retries once before the error surfaces.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ConnectionType, Message, Payload, encode_payload, parse_payload};

use super::Transport;
use super::context::TransportContext;
use super::http::{Headers, HttpClient};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the socket task to finish after a shutdown request.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Socket stream type.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending exchanges keyed by message id.
type PendingMap = FxHashMap<String, PendingExchange>;

/// An exchange waiting for its response.
struct PendingExchange {
    /// The first message of the sent payload.
    request: Message,
    /// Resolves the waiting caller.
    response_tx: oneshot::Sender<Result<Message>>,
}

/// Commands for the socket task.
enum SocketCommand {
    /// Send a frame and register the pending exchange.
    Send {
        request: Message,
        text: String,
        response_tx: oneshot::Sender<Result<Message>>,
    },
    /// Drop a timed-out pending exchange.
    Remove(String),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Socket
// ============================================================================

/// An open socket plus the task driving it.
struct Socket {
    /// Channel to the socket task.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    /// Pending exchanges (shared with the socket task).
    pending: Arc<Mutex<PendingMap>>,
    /// The socket task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Socket {
    /// Opens a socket to `url` and spawns its task.
    async fn open(
        url: &Url,
        headers: &Headers,
        cookie: Option<String>,
        context: Arc<TransportContext>,
    ) -> Result<Self> {
        let mut request = url.as_str().into_client_request()?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("Invalid header value for {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        if let Some(cookie) = cookie
            && let Ok(value) = HeaderValue::from_str(&cookie)
        {
            request.headers_mut().insert(COOKIE, value);
        }

        let connector = context.tls_mode().websocket_connector()?;
        let (stream, _) = connect_async_tls_with_config(request, None, false, connector).await?;
        debug!(%url, "WebSocket opened");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingMap::default()));
        let task = tokio::spawn(Self::run_event_loop(
            stream,
            command_rx,
            Arc::clone(&pending),
            context,
        ));

        Ok(Self {
            command_tx,
            pending,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns `true` once the socket task has stopped.
    fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Sends `text` and waits for the response to `request`.
    async fn exchange(&self, request: &Message, text: String, request_timeout: Duration) -> Result<Message> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| Error::invalid_operation("The first message of a payload must carry an id"))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SocketCommand::Send {
                request: request.clone(),
                text,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self.command_tx.send(SocketCommand::Remove(id));
                Err(Error::request_timeout(request.channel.clone(), request_timeout))
            }
        }
    }

    /// Closes the socket and waits for its task to finish.
    async fn shutdown(&self) {
        let _ = self.command_tx.send(SocketCommand::Shutdown);
        let task = self.task.lock().take();
        if let Some(mut task) = task
            && timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err()
        {
            warn!("Socket task did not stop in time, aborting");
            task.abort();
        }
        Self::fail_pending(&self.pending, || Error::ConnectionClosed);
    }

    /// Socket task: multiplexes frames and commands until the socket closes.
    async fn run_event_loop(
        stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
        pending: Arc<Mutex<PendingMap>>,
        context: Arc<TransportContext>,
    ) {
        let (mut ws_write, mut ws_read) = stream.split();

        loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            if let Err(e) = Self::handle_incoming_frame(text.as_str(), &pending, &context).await {
                                warn!(error = %e, "Failed to process incoming payload");
                                Self::fail_pending(&pending, || Error::transport(e.to_string()));
                                break;
                            }
                        }

                        Some(Ok(Frame::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SocketCommand::Send { request, text, response_tx }) => {
                            Self::handle_send_command(request, text, response_tx, &mut ws_write, &pending).await;
                        }

                        Some(SocketCommand::Remove(id)) => {
                            pending.lock().remove(&id);
                            debug!(%id, "Removed timed-out exchange");
                        }

                        Some(SocketCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        command_rx.close();
        Self::fail_pending(&pending, || Error::ConnectionClosed);
        debug!("Socket task terminated");
    }

    /// Handles one received text frame.
    async fn handle_incoming_frame(
        text: &str,
        pending: &Arc<Mutex<PendingMap>>,
        context: &TransportContext,
    ) -> Result<()> {
        let mut payload = match parse_payload(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming frame");
                return Ok(());
            }
        };

        context.consume_payload(&mut payload, None, None).await?;

        for message in payload {
            let Some(id) = message.id.as_deref() else {
                continue;
            };
            let exchange = {
                let mut pending = pending.lock();
                let answers = pending
                    .get(id)
                    .is_some_and(|entry| message.is_response_to(&entry.request));
                if answers { pending.remove(id) } else { None }
            };
            if let Some(exchange) = exchange {
                trace!(%id, channel = %message.channel, "Response received");
                let _ = exchange.response_tx.send(Ok(message));
            }
        }
        Ok(())
    }

    /// Registers the exchange, then writes the frame.
    async fn handle_send_command(
        request: Message,
        text: String,
        response_tx: oneshot::Sender<Result<Message>>,
        ws_write: &mut SplitSink<WsStream, Frame>,
        pending: &Arc<Mutex<PendingMap>>,
    ) {
        let Some(id) = request.id.clone() else {
            let _ = response_tx.send(Err(Error::invalid_operation(
                "The first message of a payload must carry an id",
            )));
            return;
        };

        pending.lock().insert(id.clone(), PendingExchange { request, response_tx });

        if let Err(e) = ws_write.send(Frame::Text(text.into())).await {
            if let Some(exchange) = pending.lock().remove(&id) {
                let error = match e {
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                        Error::ConnectionClosed
                    }
                    other => Error::WebSocket(other),
                };
                let _ = exchange.response_tx.send(Err(error));
            }
            return;
        }

        trace!(%id, "Payload sent");
    }

    /// Fails every pending exchange.
    fn fail_pending(pending: &Arc<Mutex<PendingMap>>, make_error: impl Fn() -> Error) {
        let drained: Vec<_> = pending.lock().drain().collect();
        let count = drained.len();

        for (_, exchange) in drained {
            let _ = exchange.response_tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending exchanges");
        }
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket transport.
pub struct WebSocketTransport {
    /// Shared bookkeeping.
    context: Arc<TransportContext>,
    /// HTTP session whose cookies accompany the upgrade request.
    http: Mutex<Option<Arc<dyn HttpClient>>>,
    /// Current socket, opened lazily.
    socket: AsyncMutex<Option<Arc<Socket>>>,
}

impl WebSocketTransport {
    /// Creates a WebSocket transport.
    #[must_use]
    pub fn new(context: Arc<TransportContext>, http: Option<Arc<dyn HttpClient>>) -> Self {
        Self {
            context,
            http: Mutex::new(http),
            socket: AsyncMutex::new(None),
        }
    }

    /// Returns the open socket, opening one if needed.
    async fn socket(&self, headers: &Headers) -> Result<Arc<Socket>> {
        let mut guard = self.socket.lock().await;
        if let Some(socket) = guard.as_ref()
            && !socket.is_closed()
        {
            return Ok(Arc::clone(socket));
        }

        let url = websocket_url(self.context.endpoint())?;
        let cookie = self
            .http
            .lock()
            .as_ref()
            .and_then(|http| http.cookie_header(self.context.endpoint()));
        let socket = Arc::new(Socket::open(&url, headers, cookie, Arc::clone(&self.context)).await?);
        *guard = Some(Arc::clone(&socket));
        Ok(socket)
    }

    /// Closes and forgets the current socket.
    async fn reset_socket(&self) {
        let socket = self.socket.lock().await.take();
        if let Some(socket) = socket {
            socket.shutdown().await;
        }
    }

    /// Performs one exchange over the current socket.
    async fn exchange(
        &self,
        request: &Message,
        text: &str,
        headers: &Headers,
        request_timeout: Duration,
    ) -> Result<Message> {
        let socket = self.socket(headers).await?;
        socket.exchange(request, text.to_string(), request_timeout).await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::WebSocket
    }

    fn context(&self) -> &Arc<TransportContext> {
        &self.context
    }

    async fn send_final_payload(&self, payload: Payload, headers: Headers) -> Result<Message> {
        let request = payload
            .first()
            .cloned()
            .ok_or_else(|| Error::invalid_operation("Cannot send an empty payload"))?;
        let text = encode_payload(&payload)?;
        let request_timeout = self.context.request_timeout();

        match self.exchange(&request, &text, &headers, request_timeout).await {
            Err(Error::ConnectionClosed) => {
                debug!(channel = %request.channel, "Socket closed, reopening once");
                self.reset_socket().await;
                self.exchange(&request, &text, &headers, request_timeout).await
            }
            Err(e) if e.is_timeout() => {
                warn!(channel = %request.channel, "Exchange timed out, resetting socket");
                self.reset_socket().await;
                Err(e)
            }
            other => other,
        }
    }

    fn http_client(&self) -> Option<Arc<dyn HttpClient>> {
        self.http.lock().clone()
    }

    fn detach_http_client(&self) -> Option<Arc<dyn HttpClient>> {
        self.http.lock().take()
    }

    async fn close(&self) {
        self.reset_socket().await;
        self.http.lock().take();
        debug!("WebSocket transport closed");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Maps an HTTP endpoint to its WebSocket URL (`http` to `ws`, `https` to
/// `wss`).
///
/// # Errors
///
/// Returns [`Error::Config`] for any other scheme.
pub fn websocket_url(endpoint: &Url) -> Result<Url> {
    let scheme = match endpoint.scheme() {
        "ws" | "wss" => return Ok(endpoint.clone()),
        "http" => "ws",
        "https" => "wss",
        other => return Err(Error::config(format!("Unsupported URL scheme: {other}"))),
    };
    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("Cannot map {endpoint} to a WebSocket URL")))?;
    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::extension::ExtensionPipeline;
    use crate::transport::testing::WebSocketServer;
    use crate::transport::tls::TlsMode;

    fn transport(url: Url) -> (WebSocketTransport, async_channel::Receiver<Message>) {
        let (tx, rx) = async_channel::unbounded();
        let context = Arc::new(TransportContext::new(
            url,
            TlsMode::Verify,
            ExtensionPipeline::default(),
            tx,
        ));
        (WebSocketTransport::new(context, None), rx)
    }

    fn request(channel: &str, id: &str) -> Message {
        let mut message = Message::publish(channel, json!({ "n": id }));
        message.id = Some(id.to_string());
        message
    }

    #[test]
    fn test_websocket_url() {
        let http = Url::parse("http://example.com/cometd").expect("valid url");
        let https = Url::parse("https://example.com:8443/cometd").expect("valid url");
        let ftp = Url::parse("ftp://example.com/").expect("valid url");

        assert_eq!(websocket_url(&http).expect("mapped").as_str(), "ws://example.com/cometd");
        assert_eq!(
            websocket_url(&https).expect("mapped").as_str(),
            "wss://example.com:8443/cometd"
        );
        assert!(websocket_url(&ftp).is_err());
    }

    #[tokio::test]
    async fn test_exchange_routes_response_and_event() {
        let server = WebSocketServer::spawn(0, None).await;
        let (transport, rx) = transport(server.url.clone());

        let response = transport
            .send_final_payload(vec![request("/foo", "1")], Headers::default())
            .await
            .expect("response");
        assert_eq!(response.id.as_deref(), Some("1"));

        let event = rx.recv().await.expect("event");
        assert_eq!(event.data, Some(json!({ "n": "1" })));

        transport
            .send_final_payload(vec![request("/bar", "2")], Headers::default())
            .await
            .expect("response");
        assert_eq!(server.accepted(), 1);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_are_correlated() {
        let server = WebSocketServer::spawn(0, None).await;
        let (transport, _rx) = transport(server.url.clone());
        let transport = Arc::new(transport);

        let mut handles = Vec::new();
        for n in 0..5 {
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                let id = n.to_string();
                let response = transport
                    .send_final_payload(vec![request("/bar", &id)], Headers::default())
                    .await
                    .expect("response");
                assert_eq!(response.id, Some(id));
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        transport.close().await;
    }

    #[tokio::test]
    async fn test_idle_socket_closed_by_remote_is_replaced() {
        let server = WebSocketServer::spawn(0, Some(1)).await;
        let (transport, _rx) = transport(server.url.clone());

        transport
            .send_final_payload(vec![request("/bar", "1")], Headers::default())
            .await
            .expect("first response");

        // Let the socket task observe the close frame.
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport
            .send_final_payload(vec![request("/bar", "2")], Headers::default())
            .await
            .expect("second response over a new socket");
        assert_eq!(server.accepted(), 2);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_close_during_exchange_resends_over_new_socket() {
        let server = WebSocketServer::spawn(1, None).await;
        let (transport, _rx) = transport(server.url.clone());

        let response = transport
            .send_final_payload(vec![request("/bar", "1")], Headers::default())
            .await
            .expect("response over the second socket");
        assert_eq!(response.id.as_deref(), Some("1"));
        assert_eq!(server.accepted(), 2);

        let frames = server.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_close_during_resend_surfaces_error() {
        let server = WebSocketServer::spawn(2, None).await;
        let (transport, _rx) = transport(server.url.clone());

        let err = transport
            .send_final_payload(vec![request("/bar", "1")], Headers::default())
            .await
            .expect_err("both sockets closed");
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(server.accepted(), 2);
        assert_eq!(server.frames().len(), 2);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{port}/cometd")).expect("valid url");
        let (transport, _rx) = transport(url);
        let err = transport
            .send_final_payload(vec![request("/bar", "1")], Headers::default())
            .await
            .expect_err("nothing listening");
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let (transport, _rx) = transport(Url::parse("http://127.0.0.1:1/").expect("valid url"));
        let err = transport
            .send_final_payload(Vec::new(), Headers::default())
            .await
            .expect_err("empty payload");
        assert!(matches!(err, Error::InvalidOperation { .. }));
    }
}
