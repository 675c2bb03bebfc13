//! TLS termination for the webhook listener.
//!
//! The certificate file is a single PEM bundle: one or more `CERTIFICATE`
//! blocks (leaf first) followed by exactly one private key. Supported key
//! blocks:
//!
//! | PEM tag                 | Key format                         |
//! |-------------------------|------------------------------------|
//! | `PRIVATE KEY`           | PKCS#8                             |
//! | `RSA PRIVATE KEY`       | PKCS#1                             |
//! | `EC PRIVATE KEY`        | SEC1                               |
//! | `ENCRYPTED PRIVATE KEY` | PKCS#8, unlocked with `passphrase` |
//!
//! [`TlsListener`] accepts TCP connections on a background task, completes
//! each handshake on its own task and hands finished streams to
//! `axum::serve`. A failed or stalled handshake only affects its own
//! connection.

use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{debug, error, warn};

use crate::config::TlsConfig;
use crate::errors::TlsError;

/// Time allowed for a client to complete the TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for the HTTP server.
const ACCEPT_BACKLOG: usize = 64;

/// Build the rustls server configuration from the certificate bundle.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let path = &tls.certificate_path;
    let contents = std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.clone(),
        source,
    })?;

    let bundle = parse_bundle(path, &contents, tls.passphrase.as_deref())?;
    debug!(
        path = %path.display(),
        certificates = bundle.certificates.len(),
        "Loaded TLS certificate bundle"
    );

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(bundle.certificates, bundle.key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Certificate chain and key parsed from a PEM bundle
pub(crate) struct CertificateBundle {
    pub(crate) certificates: Vec<CertificateDer<'static>>,
    pub(crate) key: PrivateKeyDer<'static>,
}

pub(crate) fn parse_bundle(
    path: &Path,
    contents: &[u8],
    passphrase: Option<&str>,
) -> Result<CertificateBundle, TlsError> {
    let blocks = pem::parse_many(contents).map_err(|e| TlsError::InvalidPem {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut certificates = Vec::new();
    let mut key = None;

    for block in blocks {
        let tag = block.tag().to_string();
        let parsed = match tag.as_str() {
            "CERTIFICATE" => {
                certificates.push(CertificateDer::from(block.into_contents()));
                continue;
            }
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(block.into_contents())),
            "RSA PRIVATE KEY" => {
                PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(block.into_contents()))
            }
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(block.into_contents())),
            "ENCRYPTED PRIVATE KEY" => decrypt_key(path, block.contents(), passphrase)?,
            other => {
                debug!(tag = other, "Ignoring PEM block");
                continue;
            }
        };

        if key.replace(parsed).is_some() {
            return Err(TlsError::MultiplePrivateKeys {
                path: path.to_path_buf(),
            });
        }
    }

    if certificates.is_empty() {
        return Err(TlsError::NoCertificate {
            path: path.to_path_buf(),
        });
    }
    let key = key.ok_or_else(|| TlsError::NoPrivateKey {
        path: path.to_path_buf(),
    })?;

    Ok(CertificateBundle { certificates, key })
}

fn decrypt_key(
    path: &Path,
    der: &[u8],
    passphrase: Option<&str>,
) -> Result<PrivateKeyDer<'static>, TlsError> {
    let passphrase = passphrase.ok_or_else(|| TlsError::PassphraseRequired {
        path: path.to_path_buf(),
    })?;

    let decrypt_error = |message: String| TlsError::Decrypt {
        path: path.to_path_buf(),
        message,
    };

    let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| decrypt_error(e.to_string()))?;
    let document = encrypted
        .decrypt(passphrase)
        .map_err(|e| decrypt_error(e.to_string()))?;

    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}

// ============================================================================
// Listener
// ============================================================================

type Accepted = (TlsStream<TcpStream>, SocketAddr);

/// `axum::serve` listener yielding TLS streams.
pub struct TlsListener {
    incoming: mpsc::Receiver<Accepted>,
    local_addr: SocketAddr,
}

impl TlsListener {
    /// Start accepting on `listener`. Must be called inside a Tokio runtime.
    ///
    /// The accept task stops once the returned listener is dropped.
    pub fn spawn(
        listener: TcpListener,
        config: Arc<rustls::ServerConfig>,
        handshake_timeout: Duration,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);

        tokio::spawn(accept_loop(
            listener,
            TlsAcceptor::from(config),
            tx,
            handshake_timeout,
        ));

        Ok(Self {
            incoming,
            local_addr,
        })
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(accepted) => accepted,
            // Accept task is gone; nothing more will arrive.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<Accepted>,
    handshake_timeout: Duration,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = tx.closed() => break,
            result = listener.accept() => match result {
                Ok(connection) => connection,
                Err(e) => {
                    if is_connection_error(&e) {
                        debug!(error = %e, "Connection dropped before accept");
                    } else {
                        // Typically fd exhaustion; back off instead of spinning.
                        error!(error = %e, "Failed to accept TCP connection");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => {
                    let _ = tx.send((tls_stream, remote_addr)).await;
                }
                Ok(Err(e)) => {
                    warn!(remote_addr = %remote_addr, error = %e, "TLS handshake failed");
                }
                Err(_) => {
                    warn!(remote_addr = %remote_addr, "TLS handshake timed out");
                }
            }
        });
    }

    debug!("TLS accept loop stopped");
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
