//! Capability interface onto the orchestrator and its image registry.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::types::{RegistryAuth, Service, ServiceId, UpdateResponse, UpdateSpec, VersionToken};

/// Operations the update engine needs from an orchestrator.
///
/// Every method is a network round trip. Implementations must classify
/// stale-version rejections of [`update_service`](Self::update_service) so
/// that [`ClientError::is_version_conflict`] returns true for them.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError>;

    async fn get_service(&self, id: &ServiceId) -> Result<Service, ClientError>;

    async fn update_service(
        &self,
        id: &ServiceId,
        version: VersionToken,
        spec: &UpdateSpec,
    ) -> Result<UpdateResponse, ClientError>;

    /// Encoded credentials for the registry hosting `image`. An empty token
    /// or `e30=` means no credentials are configured.
    async fn registry_auth_token(&self, image: &str) -> Result<String, ClientError>;

    /// Current content digest (`algorithm:hex`) of `image` in its registry.
    async fn inspect_registry_digest(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, ClientError>;
}
