//! Test doubles: an in-memory HTTP session and a local WebSocket server.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as Frame;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Message, MetaChannel, Payload, parse_payload};

use super::http::{Headers, HttpClient, HttpResponse};

/// A request seen by [`ScriptedHttpClient`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub headers: Headers,
    pub payload: Payload,
}

/// A scripted answer.
enum Reply {
    /// Verbatim body.
    Body(u16, String),
    /// Fields merged into the generated response to the first message.
    Template(Value),
    /// Network failure.
    Error(String),
}

/// An [`HttpClient`] answering from a script.
///
/// Verbatim replies queued with [`respond`] are served first, in order.
/// Then replies scripted for the channel of the request's first message.
/// Once both run out the client either behaves like a well-behaved CometD
/// server (see [`auto`]) or waits until a reply is scripted.
///
/// [`respond`]: ScriptedHttpClient::respond
/// [`auto`]: ScriptedHttpClient::auto
pub(crate) struct ScriptedHttpClient {
    replies: Mutex<VecDeque<Reply>>,
    by_channel: Mutex<FxHashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    events: Mutex<Vec<Value>>,
    supported: Mutex<Vec<&'static str>>,
    auto: bool,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedHttpClient {
    /// Client that only serves scripted replies.
    pub fn new() -> Self {
        Self::with_auto(false)
    }

    /// Client that answers every message successfully once the script is
    /// exhausted.
    pub fn auto() -> Self {
        Self::with_auto(true)
    }

    fn with_auto(auto: bool) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            by_channel: Mutex::new(FxHashMap::default()),
            requests: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            supported: Mutex::new(vec!["long-polling"]),
            auto,
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queues a verbatim JSON reply.
    pub fn respond(&self, body: Value) {
        self.respond_raw(200, &body.to_string());
    }

    /// Queues a verbatim raw reply.
    pub fn respond_raw(&self, status: u16, body: &str) {
        self.replies.lock().push_back(Reply::Body(status, body.to_string()));
    }

    /// Scripts the answer to the next request whose first message is on
    /// `channel`. `fields` override the generated response.
    pub fn script(&self, channel: &str, fields: Value) {
        self.push(channel, Reply::Template(fields));
    }

    /// Scripts a network failure for the next request on `channel`.
    pub fn script_failure(&self, channel: &str, message: &str) {
        self.push(channel, Reply::Error(message.to_string()));
    }

    fn push(&self, channel: &str, reply: Reply) {
        self.by_channel
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queues an event for the next connect response.
    pub fn push_event(&self, event: Value) {
        self.events.lock().push(event);
    }

    /// Sets the connection types announced by handshake responses.
    pub fn set_supported(&self, supported: Vec<&'static str>) {
        *self.supported.lock() = supported;
    }

    /// Delays every reply.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the payloads whose first message is on `channel`.
    pub fn payloads_for(&self, channel: &str) -> Vec<Payload> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.payload.first().is_some_and(|m| m.channel == channel))
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Returns the highest number of concurrent requests observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, payload: &Payload) -> Option<Reply> {
        if let Some(reply) = self.replies.lock().pop_front() {
            return Some(reply);
        }
        let channel = payload.first()?.channel.as_str();
        self.by_channel
            .lock()
            .get_mut(channel)
            .and_then(VecDeque::pop_front)
    }

    /// Generates the response to `message`.
    fn answer(&self, message: &Message) -> Value {
        let mut reply = json!({
            "channel": message.channel,
            "id": message.id,
            "successful": true,
        });
        match message.meta_channel() {
            Some(MetaChannel::Handshake) => {
                reply["clientId"] = json!("c1");
                reply["version"] = json!("1.0");
                reply["supportedConnectionTypes"] = json!(*self.supported.lock());
                reply["advice"] = json!({ "reconnect": "retry", "interval": 0, "timeout": 1000 });
            }
            Some(MetaChannel::Connect) => {
                reply["advice"] = json!({ "reconnect": "retry", "interval": 0, "timeout": 1000 });
            }
            Some(MetaChannel::Subscribe | MetaChannel::Unsubscribe) => {
                reply["subscription"] = json!(message.subscription);
            }
            _ => {}
        }
        reply
    }

    /// Generates the response body for `payload`.
    fn body(&self, payload: &Payload, fields: Option<&Value>) -> String {
        let mut replies = Vec::new();
        if payload.first().and_then(Message::meta_channel) == Some(MetaChannel::Connect) {
            replies.append(&mut self.events.lock());
        }
        for (index, message) in payload.iter().enumerate() {
            let mut reply = self.answer(message);
            if index == 0
                && let (Some(Value::Object(fields)), Value::Object(target)) = (fields, &mut reply)
            {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            replies.push(reply);
        }
        Value::Array(replies).to_string()
    }
}

/// Decrements the in-flight counter when dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn post(
        &self,
        _url: &Url,
        headers: &Headers,
        body: String,
        _timeout: Duration,
    ) -> Result<HttpResponse> {
        let payload = parse_payload(&body)?;
        self.requests.lock().push(RecordedRequest {
            headers: headers.clone(),
            payload: payload.clone(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = loop {
            match self.next_reply(&payload) {
                Some(Reply::Body(status, body)) => break (status, body),
                Some(Reply::Template(fields)) => break (200, self.body(&payload, Some(&fields))),
                Some(Reply::Error(message)) => return Err(Error::transport(message)),
                None if self.auto => {
                    if payload.first().and_then(Message::meta_channel) == Some(MetaChannel::Connect) {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    break (200, self.body(&payload, None));
                }
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };

        Ok(HttpResponse {
            status,
            headers: Headers::default(),
            body,
        })
    }
}

// ============================================================================
// WebSocket Server
// ============================================================================

/// A local Bayeux server speaking WebSocket.
///
/// Every message is answered with a successful response. A publish to
/// `/foo` is preceded by an event on `/foo`. Connect replies are delayed
/// slightly so the connect loop does not spin.
pub(crate) struct WebSocketServer {
    /// `http` URL of the server; the transport maps it to `ws`.
    pub url: Url,
    accepted: Arc<AtomicUsize>,
    frames: Arc<Mutex<Vec<Payload>>>,
}

impl WebSocketServer {
    /// Starts a server.
    ///
    /// The first `hang_ups` sockets are closed as soon as a frame arrives,
    /// without answering it. Other sockets are closed after `close_after`
    /// answered frames, if set.
    pub async fn spawn(hang_ups: usize, close_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(Mutex::new(Vec::new()));

        let counter = Arc::clone(&accepted);
        let recorded = Arc::clone(&frames);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    let mut answered = 0;
                    while let Some(Ok(Frame::Text(text))) = ws.next().await {
                        let payload = parse_payload(text.as_str()).expect("valid payload");
                        recorded.lock().push(payload.clone());

                        if index < hang_ups {
                            let _ = ws.close(None).await;
                            return;
                        }

                        if payload.first().and_then(Message::meta_channel) == Some(MetaChannel::Connect) {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                        }
                        let body = Value::Array(payload.iter().flat_map(websocket_replies).collect());
                        if ws.send(Frame::Text(body.to_string().into())).await.is_err() {
                            return;
                        }

                        answered += 1;
                        if close_after.is_some_and(|n| answered >= n) {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                });
            }
        });

        let url = Url::parse(&format!("http://127.0.0.1:{port}/cometd")).expect("valid url");
        Self { url, accepted, frames }
    }

    /// Returns the number of sockets accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Returns every payload received so far, in order.
    pub fn frames(&self) -> Vec<Payload> {
        self.frames.lock().clone()
    }
}

/// Replies to one message: an optional event, then the response.
fn websocket_replies(message: &Message) -> Vec<Value> {
    let mut replies = Vec::new();
    if message.channel == "/foo" {
        replies.push(json!({ "channel": "/foo", "data": message.data }));
    }
    let mut response = json!({
        "channel": message.channel,
        "id": message.id,
        "successful": true,
    });
    if let Some(subscription) = &message.subscription {
        response["subscription"] = json!(subscription);
    }
    replies.push(response);
    replies
}
