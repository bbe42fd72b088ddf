//! Client identity: credential paths and the protocol address derived from
//! the client certificate.

use std::path::{Path, PathBuf};

use cthun_protocol::CLIENT_URI_SCHEME;
use x509_parser::pem::parse_x509_pem;

use crate::error::ConnectorError;

/// Immutable client metadata.  Built once per connector; `id` is the
/// `sender` of every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client type announced at login (e.g. `"agent"`, `"controller"`).
    pub client_type: String,
    pub ca: PathBuf,
    pub crt: PathBuf,
    pub key: PathBuf,
    /// `cth://<certificate common name>/<client_type>`.
    pub id: String,
}

impl ClientIdentity {
    /// Read the client certificate and derive the client address.
    ///
    /// Fails with [`ConnectorError::Config`] if the certificate cannot be
    /// read or parsed, or its subject has no common name.
    pub fn new(
        client_type: impl Into<String>,
        ca: impl Into<PathBuf>,
        crt: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Result<Self, ConnectorError> {
        let client_type = client_type.into();
        let crt = crt.into();
        let common_name = resolve_identity(&crt)?;
        let id = format!("{CLIENT_URI_SCHEME}://{common_name}/{client_type}");

        tracing::info!(crt = %crt.display(), id = %id, "obtained client identity");

        Ok(Self {
            client_type,
            ca: ca.into(),
            crt,
            key: key.into(),
            id,
        })
    }
}

/// Subject common name of the first certificate in a PEM file.
pub fn resolve_identity(crt_path: &Path) -> Result<String, ConnectorError> {
    let pem_bytes = std::fs::read(crt_path).map_err(|e| {
        ConnectorError::Config(format!(
            "certificate file '{}' cannot be read: {e}",
            crt_path.display()
        ))
    })?;

    let (_, pem) = parse_x509_pem(&pem_bytes).map_err(|e| {
        ConnectorError::Config(format!(
            "certificate file '{}' is not PEM: {e}",
            crt_path.display()
        ))
    })?;
    let cert = pem.parse_x509().map_err(|e| {
        ConnectorError::Config(format!(
            "certificate file '{}' is not a valid X.509 certificate: {e}",
            crt_path.display()
        ))
    })?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .filter(|cn| !cn.is_empty())
        .ok_or_else(|| {
            ConnectorError::Config(format!(
                "certificate '{}' has no subject common name",
                crt_path.display()
            ))
        })?;

    Ok(common_name.to_string())
}
