//! TLS termination
//!
//! Builds the rustls acceptor for a listener from PEM certificate chain
//! and private key files. ALPN advertises `h2` then `http/1.1`; the
//! accepted connection's negotiated protocol picks the engine.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;

use crate::config::TlsSettings;
use crate::error::{Result, ServerError};

/// ALPN identifiers offered, preference order.
pub const ALPN_H2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Loads key material and builds the acceptor.
pub fn build_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor> {
    let certs = load_certs(settings)?;
    let key = load_key(settings)?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("invalid certificate or key: {e}")))?;
    config.alpn_protocols = vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(
    settings: &TlsSettings,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(&settings.cert_path).map_err(|e| {
        ServerError::Tls(format!("cannot open {}: {e}", settings.cert_path.display()))
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .map_err(|e| ServerError::Tls(format!("bad certificate pem: {e}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            settings.cert_path.display()
        )));
    }
    Ok(certs)
}

fn load_key(settings: &TlsSettings) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(&settings.key_path).map_err(|e| {
        ServerError::Tls(format!("cannot open {}: {e}", settings.key_path.display()))
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ServerError::Tls(format!("bad key pem: {e}")))?
        .ok_or_else(|| {
            ServerError::Tls(format!("no private key found in {}", settings.key_path.display()))
        })
}
