//! TLS handshakes for the SMTP session.
//!
//! rustls is used when the `rustls-tls` feature is on; `native-tls` is the
//! fallback when only that feature is enabled.

use tokio::net::TcpStream;

use crate::errors::{SmtpError, SmtpResult};

/// Encrypted stream produced by [`handshake`].
#[cfg(feature = "rustls-tls")]
pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Encrypted stream produced by [`handshake`].
#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
pub(crate) type TlsStream = tokio_native_tls::TlsStream<TcpStream>;

/// Performs the client handshake over an established TCP stream.
///
/// With `skip_verify` the server certificate is not checked, but the
/// session is still encrypted.
#[cfg(feature = "rustls-tls")]
pub(crate) async fn handshake(tcp: TcpStream, host: &str, skip_verify: bool) -> SmtpResult<TlsStream> {
    use rustls::pki_types::ServerName;
    use std::sync::Arc;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if skip_verify {
        tls_config
            .dangerous()
            .set_certificate_verifier(Arc::new(danger::NoCertVerifier));
    }

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", host)))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))
}

/// Performs the client handshake over an established TCP stream.
#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
pub(crate) async fn handshake(tcp: TcpStream, host: &str, skip_verify: bool) -> SmtpResult<TlsStream> {
    let mut builder = native_tls::TlsConnector::builder();
    if skip_verify {
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    let connector = builder
        .build()
        .map_err(|e| SmtpError::tls(format!("Failed to build TLS connector: {}", e)).with_cause(e))?;

    tokio_native_tls::TlsConnector::from(connector)
        .connect(host, tcp)
        .await
        .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))
}

#[cfg(feature = "rustls-tls")]
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate.
    #[derive(Debug)]
    pub(super) struct NoCertVerifier;

    impl ServerCertVerifier for NoCertVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ED25519,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
            ]
        }
    }
}
