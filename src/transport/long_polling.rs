//! HTTP long-polling transport.
//!
//! Every exchange is an independent POST carrying the JSON payload. At most
//! two requests are in flight at once, which is the connection limit CometD
//! servers expect from a single client (one held connect plus one request).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{ConnectionType, Message, Payload, encode_payload, parse_payload};

use super::Transport;
use super::context::TransportContext;
use super::http::{Headers, HttpClient, ReqwestHttpClient};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of concurrent HTTP requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 2;

// ============================================================================
// LongPollingTransport
// ============================================================================

/// Long-polling transport.
pub struct LongPollingTransport {
    /// Shared bookkeeping.
    context: Arc<TransportContext>,
    /// HTTP session, created on first use if none was handed over.
    http: Mutex<Option<Arc<dyn HttpClient>>>,
    /// Limits concurrent requests.
    permits: Semaphore,
}

impl LongPollingTransport {
    /// Creates a long-polling transport.
    #[must_use]
    pub fn new(context: Arc<TransportContext>, http: Option<Arc<dyn HttpClient>>) -> Self {
        Self {
            context,
            http: Mutex::new(http),
            permits: Semaphore::new(MAX_CONCURRENT_REQUESTS),
        }
    }

    /// Returns the HTTP session, creating it if needed.
    fn session(&self) -> Result<Arc<dyn HttpClient>> {
        let mut guard = self.http.lock();
        if let Some(http) = guard.as_ref() {
            return Ok(Arc::clone(http));
        }
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(self.context.tls_mode())?);
        *guard = Some(Arc::clone(&http));
        Ok(http)
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::LongPolling
    }

    fn context(&self) -> &Arc<TransportContext> {
        &self.context
    }

    async fn send_final_payload(&self, payload: Payload, headers: Headers) -> Result<Message> {
        let session = self.session()?;
        let body = encode_payload(&payload)?;
        let timeout = self.context.request_timeout();
        let channel = payload.first().map(|m| m.channel.clone()).unwrap_or_default();

        let response = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| Error::ConnectionClosed)?;
            debug!(%channel, messages = payload.len(), "Posting payload");
            session
                .post(self.context.endpoint(), &headers, body, timeout)
                .await
        };

        let response = match response {
            Ok(response) => response,
            Err(Error::Http(e)) if e.is_timeout() => {
                warn!(%channel, error = %e, "Request timed out");
                return Err(Error::request_timeout(channel, timeout));
            }
            Err(e) => {
                warn!(%channel, error = %e, "Failed to send payload");
                return Err(e);
            }
        };

        let mut response_payload = parse_payload(&response.body).map_err(|e| {
            warn!(status = response.status, error = %e, "Invalid response payload");
            Error::transport(format!(
                "Invalid response payload (HTTP {}): {e}",
                response.status
            ))
        })?;

        let response_message = self
            .context
            .consume_payload(&mut response_payload, Some(&response.headers), payload.first())
            .await?;

        response_message.ok_or_else(|| {
            let message = "No response message received for the first message in the payload";
            warn!(%channel, "{message}");
            Error::transport(message)
        })
    }

    fn http_client(&self) -> Option<Arc<dyn HttpClient>> {
        self.http.lock().clone()
    }

    fn detach_http_client(&self) -> Option<Arc<dyn HttpClient>> {
        self.http.lock().take()
    }

    async fn close(&self) {
        self.http.lock().take();
        debug!("Long-polling transport closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
