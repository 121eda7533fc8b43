//! TLS listener
//!
//! Maps the configured [`ClientAuthMode`] onto a rustls `ServerConfig` and
//! serves the router over TLS, handing each connection's client certificate
//! chain to the auth gate as a [`PeerCertificates`] request extension.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::{body::Body, Router};
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use rustls::{
    client::danger::HandshakeSignatureValid,
    crypto::{ring, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, UnixTime},
    server::{
        danger::{ClientCertVerified, ClientCertVerifier},
        WebPkiClientVerifier,
    },
    DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme,
};
use signet_auth::{ClientAuthMode, PeerCertificates};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

use crate::config::TlsSettings;

// =============================================================================
// Server configuration
// =============================================================================

/// Build the rustls server configuration for `mode`
pub fn server_config(settings: &TlsSettings, mode: ClientAuthMode) -> anyhow::Result<ServerConfig> {
    let provider = Arc::new(ring::default_provider());

    let cert_path = settings.cert.as_deref().context("tls.cert is not set")?;
    let key_path = settings.key.as_deref().context("tls.key is not set")?;
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match mode {
        ClientAuthMode::NoClientCert => builder.with_no_client_auth(),
        ClientAuthMode::RequestClientCert | ClientAuthMode::RequireAnyClientCert => builder
            .with_client_cert_verifier(Arc::new(AcceptAnyClientCert {
                mandatory: mode.is_mandatory(),
                provider: provider.clone(),
            })),
        ClientAuthMode::VerifyClientCertIfGiven | ClientAuthMode::RequireAndVerifyClientCert => {
            let ca_path = settings
                .client_ca
                .as_deref()
                .with_context(|| format!("client auth mode {} requires tls.client_ca", mode))?;
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert)?;
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone());
            let verifier = if mode.is_mandatory() {
                verifier.build()?
            } else {
                verifier.allow_unauthenticated().build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut config = builder.with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::info!(client_auth = %mode, "TLS configured");
    Ok(config)
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading certificates from {}", path.display()))?;

    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("reading private key from {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}

/// Client certificate verifier for the non-verifying modes
///
/// Accepts any certificate (handshake signatures are still checked). The
/// certificate registry decides later whether it identifies anyone.
#[derive(Debug)]
struct AcceptAnyClientCert {
    mandatory: bool,
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// =============================================================================
// Accept loop
// =============================================================================

/// Serve `router` over TLS until `shutdown` resolves
///
/// In-flight connections get `drain_timeout` to finish afterwards.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    router: Router,
    shutdown: impl std::future::Future<Output = ()>,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "Error accepting connection");
                    continue;
                }
            },
            _ = &mut shutdown => break,
            // Reap finished connection tasks
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        connections.spawn(async move {
            if let Err(e) = serve_connection(acceptor, stream, addr, router).await {
                tracing::debug!(peer = %addr, error = %e, "Connection closed with error");
            }
        });
    }

    tracing::info!(
        connections = connections.len(),
        timeout_secs = drain_timeout.as_secs(),
        "Waiting for in-flight connections to complete..."
    );
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        tracing::warn!("Drain timeout reached, aborting remaining connections");
    }

    Ok(())
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    router: Router,
) -> anyhow::Result<()> {
    let tls = acceptor
        .accept(stream)
        .await
        .with_context(|| format!("TLS handshake with {}", addr))?;

    let peer = peer_certificates(tls.get_ref().1.peer_certificates());
    tracing::debug!(peer = %addr, client_certs = peer.len(), "TLS connection established");

    let service = service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        let peer = peer.clone();
        async move {
            let mut req = req.map(Body::new);
            req.extensions_mut().insert(peer);
            router.oneshot(req).await
        }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(tls), service)
        .await?;

    Ok(())
}

/// Owned copy of the handshake's client chain, leaf first
fn peer_certificates(chain: Option<&[CertificateDer<'static>]>) -> PeerCertificates {
    PeerCertificates::new(
        chain
            .unwrap_or_default()
            .iter()
            .map(|cert| cert.as_ref().to_vec())
            .collect(),
    )
}
