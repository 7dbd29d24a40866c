//! Digest resolution: turn a (possibly pinned) image reference into the same
//! reference pinned to the registry's current digest.

use std::sync::Arc;

use updater_core::{strip_digest, ImageReference, OrchestratorClient, RegistryAuth};

use crate::error::ServiceError;

#[derive(Clone)]
pub struct DigestResolver {
    client: Arc<dyn OrchestratorClient>,
}

impl DigestResolver {
    pub fn new(client: Arc<dyn OrchestratorClient>) -> Self {
        Self { client }
    }

    /// Resolve `image` to `name[:tag]@digest` in familiar form.
    ///
    /// A digest already present on `image` is dropped first, so a service
    /// pinned by a previous run still picks up a newer push under its tag.
    /// The caller compares the result with `image`; equality means the
    /// service is up to date.
    pub async fn resolve(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, ServiceError> {
        let unpinned = strip_digest(image);
        let reference = ImageReference::parse_normalized(unpinned)?;

        // The inspection input itself must never be canonical.
        if reference.is_canonical() {
            return Err(ServiceError::AlreadyDigestPinned {
                image: unpinned.to_string(),
            });
        }

        let digest = self
            .client
            .inspect_registry_digest(unpinned, auth)
            .await
            .map_err(|source| ServiceError::RegistryInspectFailed {
                image: unpinned.to_string(),
                source,
            })?;

        let pinned = reference.with_digest(&digest)?;
        Ok(pinned.to_string())
    }
}
