//! HTTP session used by the transports.
//!
//! [`HttpClient`] is the "network session" of a client: it is created once,
//! owns connection pooling and cookies, and is handed over from the
//! provisional transport to the negotiated one so cookies set during the
//! handshake are not lost.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_TYPE;
use rustc_hash::FxHashMap;
use tracing::trace;
use url::Url;

use crate::error::Result;

use super::tls::TlsMode;

// ============================================================================
// Types
// ============================================================================

/// Request or response headers, keyed by header name.
pub type Headers = FxHashMap<String, String>;

/// Content type of every Bayeux POST.
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// A minimal HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: Headers,
    /// Response body.
    pub body: String,
}

// ============================================================================
// HttpClient
// ============================================================================

/// A minimal async HTTP client for JSON POST requests.
///
/// Implementations handle TLS, pooling and cookies; the transports only need
/// to post a body and read the answer.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON `body` and returns the response.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the request fails or times out.
    async fn post(
        &self,
        url: &Url,
        headers: &Headers,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse>;

    /// Returns the `Cookie` header value the session holds for `url`.
    ///
    /// Used to carry cookies over to the WebSocket upgrade request.
    fn cookie_header(&self, _url: &Url) -> Option<String> {
        None
    }
}

// ============================================================================
// ReqwestHttpClient
// ============================================================================

/// A [`reqwest`]-backed implementation of [`HttpClient`] with a cookie jar.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    /// Pooled HTTP client.
    inner: reqwest::Client,
    /// Cookies received from the server.
    jar: Arc<Jar>,
}

impl ReqwestHttpClient {
    /// Creates a client using the given TLS validation mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`](crate::Error::Http) if the TLS backend fails to
    /// initialize.
    pub fn new(tls: TlsMode) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let inner = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .danger_accept_invalid_certs(tls.accepts_invalid_certs())
            .build()?;
        Ok(Self { inner, jar })
    }

    /// Returns the cookie jar shared with the underlying client.
    #[inline]
    #[must_use]
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post(
        &self,
        url: &Url,
        headers: &Headers,
        body: String,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut request = self
            .inner
            .post(url.clone())
            .timeout(timeout)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        trace!(status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }
}

// ============================================================================
// Tests
// ============================================================================
