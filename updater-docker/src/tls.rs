//! Client certificates for engines exposed over TCP with `--tlsverify`.
//!
//! The directory layout matches the docker CLI: `ca.pem`, `cert.pem`
//! and `key.pem` side by side.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DockerError};

const CA_FILE: &str = "ca.pem";
const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

#[derive(Debug, Clone)]
pub struct TlsConfig {
    cert_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Trusts only the configured CA and presents the client identity.
    pub(crate) fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, DockerError> {
        let ca = self.read(CA_FILE)?;
        let ca = reqwest::Certificate::from_pem(&ca).map_err(|source| self.tls_err(CA_FILE, source))?;

        let mut identity = self.read(CERT_FILE)?;
        identity.push(b'\n');
        identity.extend(self.read(KEY_FILE)?);
        let identity =
            reqwest::Identity::from_pem(&identity).map_err(|source| self.tls_err(CERT_FILE, source))?;

        tracing::debug!(cert_path = %self.cert_path.display(), "using TLS client certificate");
        Ok(builder
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .identity(identity))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, DockerError> {
        let path = self.cert_path.join(name);
        fs::read(&path).map_err(|err| io_err(path, err))
    }

    fn tls_err(&self, name: &str, source: reqwest::Error) -> DockerError {
        DockerError::Tls {
            path: self.cert_path.join(name),
            source,
        }
    }
}
