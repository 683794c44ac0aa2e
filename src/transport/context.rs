//! Bookkeeping shared by a transport and its state machine.
//!
//! The context owns everything that survives individual exchanges: the
//! last reconnect advice, the subscription set, the extension pipeline and
//! the producer side of the client's incoming queue.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_channel::Sender;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};
use url::Url;

use crate::error::Result;
use crate::extension::ExtensionPipeline;
use crate::protocol::{Advice, Message, MetaChannel, Payload};

use super::http::Headers;
use super::tls::TlsMode;

// ============================================================================
// Constants
// ============================================================================

/// Request timeout used before the server advised one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Factor applied to the advised timeout so requests don't race the server's
/// own timeout.
pub const REQUEST_TIMEOUT_INCREASE_FACTOR: f64 = 1.2;

// ============================================================================
// TransportContext
// ============================================================================

/// State shared between a transport and the connection driving it.
#[derive(Debug)]
pub struct TransportContext {
    /// CometD service URL.
    endpoint: Url,
    /// TLS validation mode.
    tls: TlsMode,
    /// Extension hooks.
    extensions: ExtensionPipeline,
    /// Producer side of the client's incoming queue.
    incoming: Sender<Message>,
    /// Last advice received from the server.
    advice: Mutex<Advice>,
    /// Channels with a confirmed subscription.
    subscriptions: Mutex<FxHashSet<String>>,
}

impl TransportContext {
    /// Creates a context with no advice and no subscriptions.
    #[must_use]
    pub fn new(
        endpoint: Url,
        tls: TlsMode,
        extensions: ExtensionPipeline,
        incoming: Sender<Message>,
    ) -> Self {
        Self {
            endpoint,
            tls,
            extensions,
            incoming,
            advice: Mutex::new(Advice::default()),
            subscriptions: Mutex::new(FxHashSet::default()),
        }
    }

    /// Creates a context for a replacement transport.
    ///
    /// The advice is carried over; the subscription set starts empty.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            tls: self.tls,
            extensions: self.extensions.clone(),
            incoming: self.incoming.clone(),
            advice: Mutex::new(self.reconnect_advice()),
            subscriptions: Mutex::new(FxHashSet::default()),
        }
    }

    /// Returns the CometD service URL.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the TLS validation mode.
    #[inline]
    #[must_use]
    pub fn tls_mode(&self) -> TlsMode {
        self.tls
    }

    /// Returns the extension pipeline.
    #[inline]
    #[must_use]
    pub fn extensions(&self) -> &ExtensionPipeline {
        &self.extensions
    }

    /// Returns a copy of the last advice received from the server.
    #[must_use]
    pub fn reconnect_advice(&self) -> Advice {
        self.advice.lock().clone()
    }

    /// Replaces the stored advice.
    pub fn set_reconnect_advice(&self, advice: Advice) {
        *self.advice.lock() = advice;
    }

    /// Returns a snapshot of the subscribed channels.
    #[must_use]
    pub fn subscriptions(&self) -> FxHashSet<String> {
        self.subscriptions.lock().clone()
    }

    /// Returns the timeout for a single network exchange.
    ///
    /// The server-advised timeout scaled by
    /// [`REQUEST_TIMEOUT_INCREASE_FACTOR`], or [`DEFAULT_REQUEST_TIMEOUT`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.advice
            .lock()
            .timeout
            .map(|ms| Duration::from_millis(ms).mul_f64(REQUEST_TIMEOUT_INCREASE_FACTOR))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Processes a received payload.
    ///
    /// Runs the incoming extensions, records advice and subscription changes,
    /// and enqueues every event message. The first message answering
    /// `find_response_for` is returned instead of being enqueued.
    ///
    /// Suspends while the incoming queue is full.
    ///
    /// # Errors
    ///
    /// Returns the error raised by an incoming extension.
    pub async fn consume_payload(
        &self,
        payload: &mut Payload,
        headers: Option<&Headers>,
        find_response_for: Option<&Message>,
    ) -> Result<Option<Message>> {
        self.extensions.process_incoming(payload, headers).await?;

        let mut result = None;
        for message in payload.iter() {
            if let Some(advice) = &message.advice {
                self.set_reconnect_advice(advice.clone());
            }

            self.update_subscriptions(message);

            if result.is_none() && find_response_for.is_some_and(|request| message.is_response_to(request)) {
                result = Some(message.clone());
                continue;
            }

            self.consume_message(message).await;
        }
        Ok(result)
    }

    /// Enqueues `message` if it is an event message.
    async fn consume_message(&self, message: &Message) {
        if !message.is_event() {
            return;
        }
        trace!(channel = %message.channel, "Enqueueing event message");
        if self.incoming.send(message.clone()).await.is_err() {
            debug!(channel = %message.channel, "Incoming queue closed, dropping message");
        }
    }

    /// Updates the subscription set from a subscribe/unsubscribe response.
    fn update_subscriptions(&self, message: &Message) {
        let Some(subscription) = message.subscription.as_ref() else {
            return;
        };

        match (message.meta_channel(), message.successful) {
            (Some(MetaChannel::Subscribe), Some(true)) => {
                self.subscriptions.lock().insert(subscription.clone());
            }
            (Some(MetaChannel::Subscribe), Some(false))
            | (Some(MetaChannel::Unsubscribe), Some(true)) => {
                self.subscriptions.lock().remove(subscription);
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
