//! Protocol extensions.
//!
//! Extensions see every payload just before it is sent and just after it is
//! received, and may rewrite messages (for example to add an `ext` field) or
//! the request headers.
//!
//! # Ordering
//!
//! | Direction | Order |
//! |-----------|-------|
//! | Outgoing | registered extensions in registration order, then the auth extension |
//! | Incoming | the auth extension, then registered extensions in registration order |
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bayeux_client::{Extension, Headers, Payload, Result};
//!
//! struct Token(String);
//!
//! #[async_trait]
//! impl Extension for Token {
//!     async fn outgoing(&self, _payload: &mut Payload, headers: &mut Headers) -> Result<()> {
//!         headers.insert("Authorization".into(), format!("Bearer {}", self.0));
//!         Ok(())
//!     }
//!
//!     async fn incoming(&self, _payload: &mut Payload, _headers: Option<&Headers>) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Payload;
use crate::transport::Headers;

// ============================================================================
// Traits
// ============================================================================

/// Hook pair invoked around every exchange.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Processes an outgoing payload and the headers that will be sent with it.
    async fn outgoing(&self, payload: &mut Payload, headers: &mut Headers) -> Result<()>;

    /// Processes an incoming payload and the headers it was received with.
    ///
    /// `headers` is `None` for frames received on a WebSocket.
    async fn incoming(&self, payload: &mut Payload, headers: Option<&Headers>) -> Result<()>;
}

/// Extension with support for authentication.
#[async_trait]
pub trait AuthExtension: Extension {
    /// Called after the server answered with a 401/403 error.
    ///
    /// The rejected payload is resent once after this returns. Schemes with
    /// expiring credentials refresh them here.
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// ExtensionPipeline
// ============================================================================

/// Ordered set of extensions shared by every transport of a client.
#[derive(Clone, Default)]
pub struct ExtensionPipeline {
    /// Generic extensions in registration order.
    extensions: Vec<Arc<dyn Extension>>,
    /// The designated authentication extension.
    auth: Option<Arc<dyn AuthExtension>>,
}

impl ExtensionPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(extensions: Vec<Arc<dyn Extension>>, auth: Option<Arc<dyn AuthExtension>>) -> Self {
        Self { extensions, auth }
    }

    /// Returns the authentication extension, if any.
    #[inline]
    #[must_use]
    pub fn auth(&self) -> Option<&Arc<dyn AuthExtension>> {
        self.auth.as_ref()
    }

    /// Returns the number of hooks, the auth extension included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len() + usize::from(self.auth.is_some())
    }

    /// Returns `true` if no hook is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the outgoing hooks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a hook.
    pub async fn process_outgoing(&self, payload: &mut Payload, headers: &mut Headers) -> Result<()> {
        for extension in &self.extensions {
            extension.outgoing(payload, headers).await?;
        }
        if let Some(auth) = &self.auth {
            auth.outgoing(payload, headers).await?;
        }
        Ok(())
    }

    /// Runs the incoming hooks.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a hook.
    pub async fn process_incoming(
        &self,
        payload: &mut Payload,
        headers: Option<&Headers>,
    ) -> Result<()> {
        if let Some(auth) = &self.auth {
            auth.incoming(payload, headers).await?;
        }
        for extension in &self.extensions {
            extension.incoming(payload, headers).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for ExtensionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPipeline")
            .field("extensions", &self.extensions.len())
            .field("auth", &self.auth.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::protocol::Message;

    /// Records the order in which hooks run.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Extension for Recorder {
        async fn outgoing(&self, payload: &mut Payload, headers: &mut Headers) -> Result<()> {
            self.log.lock().push(format!("out:{}", self.name));
            headers.insert(self.name.to_string(), "1".to_string());
            for message in payload.iter_mut() {
                message.extra.insert(self.name.to_string(), json!(true));
            }
            Ok(())
        }

        async fn incoming(&self, _payload: &mut Payload, _headers: Option<&Headers>) -> Result<()> {
            self.log.lock().push(format!("in:{}", self.name));
            Ok(())
        }
    }

    #[async_trait]
    impl AuthExtension for Recorder {}

    fn pipeline(log: &Arc<Mutex<Vec<String>>>) -> ExtensionPipeline {
        let first: Arc<dyn Extension> = Arc::new(Recorder {
            name: "first",
            log: Arc::clone(log),
        });
        let second: Arc<dyn Extension> = Arc::new(Recorder {
            name: "second",
            log: Arc::clone(log),
        });
        let auth: Arc<dyn AuthExtension> = Arc::new(Recorder {
            name: "auth",
            log: Arc::clone(log),
        });
        ExtensionPipeline::new(vec![first, second], Some(auth))
    }

    #[tokio::test]
    async fn test_outgoing_order_and_mutation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(&log);

        let mut payload = vec![Message::connect()];
        let mut headers = Headers::default();
        pipeline
            .process_outgoing(&mut payload, &mut headers)
            .await
            .expect("hooks succeed");

        assert_eq!(*log.lock(), vec!["out:first", "out:second", "out:auth"]);
        assert_eq!(headers.len(), 3);
        assert_eq!(payload[0].extra.get("second"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_incoming_runs_auth_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(&log);

        let mut payload = vec![Message::connect()];
        pipeline
            .process_incoming(&mut payload, None)
            .await
            .expect("hooks succeed");

        assert_eq!(*log.lock(), vec!["in:auth", "in:first", "in:second"]);
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = ExtensionPipeline::default();
        assert!(pipeline.is_empty());
        assert!(pipeline.auth().is_none());
    }
}
