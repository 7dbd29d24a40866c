//! Applies one service update, retrying optimistic-concurrency conflicts with
//! a freshly fetched version token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use updater_core::{OrchestratorClient, RegistryAuth, Service, UpdateSpec};

use crate::error::ServiceError;

/// Total update attempts per service, the first one included.
pub const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// What the orchestrator reports after an accepted update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// The previous and current images differ.
    Updated { image: String },
    /// The update was accepted but the image did not change.
    Unchanged,
}

#[derive(Clone)]
pub struct ServiceUpdater {
    client: Arc<dyn OrchestratorClient>,
    honor_update_only: bool,
}

impl ServiceUpdater {
    pub fn new(client: Arc<dyn OrchestratorClient>, honor_update_only: bool) -> Self {
        Self {
            client,
            honor_update_only,
        }
    }

    /// Registry credentials for `image`; `None` when none are configured.
    pub async fn registry_auth(&self, image: &str) -> Result<Option<RegistryAuth>, ServiceError> {
        let token = self
            .client
            .registry_auth_token(image)
            .await
            .map_err(|source| ServiceError::AuthTokenFailed {
                image: image.to_string(),
                source,
            })?;
        Ok(RegistryAuth::from_token(token))
    }

    /// Update `service` to `image`.
    ///
    /// Version conflicts re-fetch the service and try again, up to
    /// [`MAX_UPDATE_ATTEMPTS`] in total. Cancellation is only observed
    /// between attempts; a call already in flight runs to completion.
    pub async fn update(
        &self,
        service: Service,
        image: &str,
        auth: Option<RegistryAuth>,
        cancel: &CancellationToken,
    ) -> Result<UpdateResult, ServiceError> {
        let mut current = service;
        let mut attempt = 1;

        loop {
            let spec = self.build_spec(&current, image, auth.clone());
            tracing::debug!(service = %current.name, attempt, "updating service");

            match self
                .client
                .update_service(&current.id, current.version, &spec)
                .await
            {
                Ok(response) => {
                    for warning in &response.warnings {
                        tracing::debug!(service = %current.name, %warning, "response warning");
                    }
                    return self.verify(&current).await;
                }
                Err(source) if source.is_version_conflict() => {
                    if attempt >= MAX_UPDATE_ATTEMPTS {
                        return Err(ServiceError::UpdateFailedAfterRetries {
                            service: current.name.clone(),
                            attempts: attempt,
                            source,
                        });
                    }
                    tracing::warn!(
                        service = %current.name,
                        attempt,
                        error = %source,
                        "version conflict, refreshing service before retry",
                    );
                    if cancel.is_cancelled() {
                        return Err(ServiceError::Cancelled {
                            service: current.name.clone(),
                        });
                    }
                    current = self.client.get_service(&current.id).await.map_err(|source| {
                        ServiceError::InspectFailed {
                            service: current.name.clone(),
                            source,
                        }
                    })?;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ServiceError::UpdateFailed {
                        service: current.name.clone(),
                        source,
                    });
                }
            }
        }
    }

    fn build_spec(&self, service: &Service, image: &str, auth: Option<RegistryAuth>) -> UpdateSpec {
        let spec = UpdateSpec::for_service(service, image).with_auth(auth);
        if self.honor_update_only && service.is_update_only() && service.replicas.is_some() {
            spec.with_replicas(0)
        } else {
            spec
        }
    }

    // Guards against an update the orchestrator accepted without changing
    // the image.
    async fn verify(&self, service: &Service) -> Result<UpdateResult, ServiceError> {
        let updated = self
            .client
            .get_service(&service.id)
            .await
            .map_err(|source| ServiceError::InspectFailed {
                service: service.name.clone(),
                source,
            })?;

        let previous = updated.previous_image.as_deref().unwrap_or_default();
        if previous != updated.image {
            tracing::info!(service = %service.name, image = %updated.image, "service updated");
            Ok(UpdateResult::Updated {
                image: updated.image,
            })
        } else {
            tracing::debug!(service = %service.name, "service is up to date");
            Ok(UpdateResult::Unchanged)
        }
    }
}
