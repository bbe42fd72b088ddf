//! Mutual-TLS client configuration built from the identity's credential files.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::identity::ClientIdentity;
use crate::transport::TransportError;

/// Build a client config that trusts only the identity's CA and presents the
/// identity's certificate chain and key.
pub fn client_config(identity: &ClientIdentity) -> Result<Arc<ClientConfig>, TransportError> {
    let ca_certs = parse_certificates(&identity.ca)?;
    if ca_certs.is_empty() {
        return Err(TransportError::Config(format!(
            "no CA certificates found in '{}'",
            identity.ca.display()
        )));
    }

    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| TransportError::Config(format!("failed to add CA certificate: {e}")))?;
    }

    let client_certs = parse_certificates(&identity.crt)?;
    if client_certs.is_empty() {
        return Err(TransportError::Config(format!(
            "no client certificates found in '{}'",
            identity.crt.display()
        )));
    }
    let client_key = parse_private_key(&identity.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Config(format!("TLS protocol versions: {e}")))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| TransportError::Config(format!("client auth config: {e}")))?;

    Ok(Arc::new(config))
}

fn read(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path)
        .map_err(|e| TransportError::Config(format!("cannot read '{}': {e}", path.display())))
}

fn parse_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = read(path)?;
    CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::Config(format!(
                "failed to parse certificates in '{}': {e}",
                path.display()
            ))
        })
}

fn parse_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let pem = read(path)?;
    PrivateKeyDer::from_pem_slice(&pem).map_err(|e| {
        TransportError::Config(format!(
            "failed to parse private key in '{}': {e}",
            path.display()
        ))
    })
}
