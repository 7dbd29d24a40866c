//! Error types for updater-engine.

use thiserror::Error;

use updater_core::{ClientError, ReferenceError};

/// Terminal failure for a single service. Never escalates to the sweep.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ReferenceError),

    #[error("the image name already has a digest: {image}")]
    AlreadyDigestPinned { image: String },

    #[error("failed to inspect image {image}: {source}")]
    RegistryInspectFailed {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("cannot retrieve auth token for image {image}: {source}")]
    AuthTokenFailed {
        image: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to update service {service}: {source}")]
    UpdateFailed {
        service: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to update service {service} after {attempts} attempts: {source}")]
    UpdateFailedAfterRetries {
        service: String,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("cannot inspect service {service}: {source}")]
    InspectFailed {
        service: String,
        #[source]
        source: ClientError,
    },

    #[error("update of service {service} cancelled")]
    Cancelled { service: String },
}

/// Failure of a whole sweep.
#[derive(Debug, Error)]
pub enum SweepError {
    /// Listing services failed; nothing was attempted.
    #[error("failed to get service list: {0}")]
    Listing(#[source] ClientError),

    /// Another sweep is running and the overlap policy rejects waiting.
    #[error("a sweep is already running")]
    Busy,
}
