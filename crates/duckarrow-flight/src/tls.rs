//! TLS channel construction for the skip-verify path
//!
//! tonic's built-in TLS always verifies the peer against trusted roots.
//! When the user opts out of verification, the channel dials through a
//! custom connector that performs the TLS handshake itself with a
//! permissive certificate verifier.

use duckarrow_common::{DuckArrowError, Result};
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Certificate verifier that accepts any peer. Only reachable behind the
/// explicit skip-verify flag.
#[derive(Debug)]
struct AcceptAnyServerCert(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for AcceptAnyServerCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

/// Connect the endpoint over TLS without verifying the peer certificate.
/// The endpoint keeps a plain-http scheme; the connector owns the TLS
/// layer, with ALPN pinned to h2 for gRPC.
pub(crate) async fn connect_skip_verify(
    endpoint: Endpoint,
    host: String,
    port: u16,
) -> Result<Channel> {
    let provider = rustls::crypto::ring::default_provider();
    let verifier = AcceptAnyServerCert(provider.signature_verification_algorithms);

    let mut tls = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| DuckArrowError::Connect(format!("tls configuration: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    tls.alpn_protocols = vec![b"h2".to_vec()];

    let connector = TlsConnector::from(Arc::new(tls));
    tracing::warn!(%host, "TLS peer-certificate verification disabled for this connection");

    endpoint
        .connect_with_connector(service_fn(move |_uri: Uri| {
            let connector = connector.clone();
            let host = host.clone();
            async move {
                let stream = TcpStream::connect((host.as_str(), port)).await?;
                let domain = ServerName::try_from(host)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let tls_stream = connector.connect(domain, stream).await?;
                Ok::<_, std::io::Error>(TokioIo::new(tls_stream))
            }
        }))
        .await
        .map_err(|e| DuckArrowError::Connect(e.to_string()))
}
