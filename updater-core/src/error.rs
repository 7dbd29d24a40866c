//! Error types for updater-core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Message fragment the orchestrator returns when an update carries a stale
/// version token.
pub const OUT_OF_SEQUENCE: &str = "update out of sequence";

/// Classification of a failure at the orchestrator/registry boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Optimistic-concurrency rejection; the version token was stale.
    Conflict,
    /// The requested object does not exist.
    NotFound,
    /// Connection, socket or protocol failure.
    Transport,
    /// The API answered with an error status.
    Api,
    /// The response body could not be decoded.
    Decode,
    /// Registry credentials could not be produced.
    Auth,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClientErrorKind::Conflict => "version conflict",
            ClientErrorKind::NotFound => "not found",
            ClientErrorKind::Transport => "transport error",
            ClientErrorKind::Api => "api error",
            ClientErrorKind::Decode => "decode error",
            ClientErrorKind::Auth => "auth error",
        };
        f.write_str(label)
    }
}

/// Error returned by every [`crate::OrchestratorClient`] operation.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an API error, promoting it to [`ClientErrorKind::Conflict`] when
    /// the message carries the orchestrator's out-of-sequence marker.
    pub fn api(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.contains(OUT_OF_SEQUENCE) {
            ClientErrorKind::Conflict
        } else {
            ClientErrorKind::Api
        };
        Self { kind, message }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::NotFound, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Transport, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Decode, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Auth, message)
    }

    /// True when the update was rejected because the version token was stale.
    ///
    /// Unclassified failures still match on the message.
    pub fn is_version_conflict(&self) -> bool {
        self.kind == ClientErrorKind::Conflict || self.message.contains(OUT_OF_SEQUENCE)
    }
}

/// Image reference parse and composition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,

    #[error("invalid image reference '{reference}': {reason}")]
    Invalid { reference: String, reason: String },

    #[error("invalid digest '{digest}'")]
    InvalidDigest { digest: String },
}

impl ReferenceError {
    pub(crate) fn invalid(reference: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration rejected before any sweep runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("label-enable and a blacklist are mutually exclusive")]
    ConflictingEligibility,

    #[error("invalid blacklist pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("interval must be at least 1 second")]
    ZeroInterval,

    #[error("only one of schedule or interval may be set")]
    ConflictingSchedule,

    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("failed to read settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown overlap policy '{0}'; expected: wait, reject")]
    UnknownPolicy(String),
}
