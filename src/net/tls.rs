//! TLS listener setup from the agent's machine identity material.

use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::error::{AgentResult, ProxyError};

/// Build a TLS acceptor from PEM certificate chain and private key files.
pub fn acceptor_from_pem(cert_path: &str, key_path: &str) -> AgentResult<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| ProxyError::Tls(format!("{}: {}", cert_path, e)))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| ProxyError::Tls(format!("{}: {}", cert_path, e)))?;
    if certs.is_empty() {
        return Err(ProxyError::Tls(format!("{}: no certificates found", cert_path)).into());
    }

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| ProxyError::Tls(format!("{}: {}", key_path, e)))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| ProxyError::Tls(format!("{}: {}", key_path, e)))?
        .ok_or_else(|| ProxyError::Tls(format!("{}: no private key found", key_path)))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
