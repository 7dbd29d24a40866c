use std::path::PathBuf;

use thiserror::Error;

/// Failures while setting up a [`DockerClient`](crate::DockerClient).
///
/// Errors from individual API calls are reported as
/// [`updater_core::ClientError`] instead.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("unsupported docker host '{0}'; expected unix://, tcp://, http:// or https://")]
    UnsupportedHost(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse docker config at {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid TLS material at {path}: {source}")]
    Tls {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DockerError {
    DockerError::Io {
        path: path.into(),
        source,
    }
}
