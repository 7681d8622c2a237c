//! Secure listener material.
//!
//! The certificate chain and key are opaque to routing; they only become a
//! `TlsAcceptor` handed to the secure listener.

use crate::error::{ProxyError, Result};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Builds an acceptor from PEM certificate chain and private key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let chain = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| ProxyError::tls(format!("invalid certificate chain: {}", e)))?;

    tracing::debug!(cert = %cert_path.display(), "TLS acceptor ready");

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::tls(format!("{}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::tls(format!("{}: {}", path.display(), e)))?;

    if chain.is_empty() {
        return Err(ProxyError::tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }

    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::tls(format!("{}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| ProxyError::tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| ProxyError::tls(format!("{}: no private key found", path.display())))
}
