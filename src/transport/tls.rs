//! TLS validation modes.
//!
//! [`TlsMode::Verify`] uses the platform defaults of each transport.
//! [`TlsMode::AcceptInvalidCerts`] disables certificate validation for both
//! the HTTP session and the WebSocket upgrade.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_tungstenite::Connector;

use crate::error::Result;

// ============================================================================
// TlsMode
// ============================================================================

/// Certificate validation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Validate server certificates against the web PKI roots.
    #[default]
    Verify,
    /// Accept any server certificate.
    AcceptInvalidCerts,
}

impl TlsMode {
    /// Returns `true` if certificate validation is disabled.
    #[inline]
    #[must_use]
    pub const fn accepts_invalid_certs(self) -> bool {
        matches!(self, Self::AcceptInvalidCerts)
    }

    /// Returns the connector for a WebSocket upgrade.
    ///
    /// `None` lets the WebSocket library pick its default verifying
    /// connector.
    pub(crate) fn websocket_connector(self) -> Result<Option<Connector>> {
        match self {
            Self::Verify => Ok(None),
            Self::AcceptInvalidCerts => {
                let provider = Arc::new(rustls::crypto::ring::default_provider());
                let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
                    .with_safe_default_protocol_versions()?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
                    .with_no_client_auth();
                Ok(Some(Connector::Rustls(Arc::new(config))))
            }
        }
    }
}

// ============================================================================
// AcceptAnyCert
// ============================================================================

/// Verifier that accepts every certificate but still checks handshake
/// signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
