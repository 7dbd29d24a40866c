use async_trait::async_trait;
use serde::de::DeserializeOwned;
use updater_core::{
    ClientError, OrchestratorClient, RegistryAuth, Service, ServiceId, UpdateResponse, UpdateSpec,
    VersionToken,
};

use crate::auth::DockerCredentials;
use crate::error::DockerError;
use crate::model::{
    render_spec, ApiErrorBody, ApiService, ApiUpdateResponse, DistributionInspect,
};
use crate::tls::TlsConfig;
use crate::transport::{ApiRequest, ApiResponse, DockerHost, Transport};

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// [`OrchestratorClient`] backed by the Docker Engine swarm API.
pub struct DockerClient {
    transport: Transport,
    credentials: DockerCredentials,
}

impl DockerClient {
    pub fn new(host: &DockerHost, credentials: DockerCredentials) -> Result<Self, DockerError> {
        Self::with_tls(host, credentials, None)
    }

    pub fn with_tls(
        host: &DockerHost,
        credentials: DockerCredentials,
        tls: Option<&TlsConfig>,
    ) -> Result<Self, DockerError> {
        Ok(Self {
            transport: Transport::new(host, tls)?,
            credentials,
        })
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let path = request.path.clone();
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(api_error(&response));
        }
        serde_json::from_slice(&response.body)
            .map_err(|err| ClientError::decode(format!("unexpected response from {path}: {err}")))
    }
}

fn api_error(response: &ApiResponse) -> ClientError {
    let message = serde_json::from_slice::<ApiErrorBody>(&response.body)
        .map(|body| body.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).trim().to_string());
    match response.status {
        404 => ClientError::not_found(message),
        409 => ClientError::conflict(message),
        401 | 403 => ClientError::auth(message),
        _ => ClientError::api(message),
    }
}

#[async_trait]
impl OrchestratorClient for DockerClient {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        let services: Vec<ApiService> = self.call(ApiRequest::get("/services")).await?;
        services.into_iter().map(ApiService::into_service).collect()
    }

    async fn get_service(&self, id: &ServiceId) -> Result<Service, ClientError> {
        let service: ApiService = self
            .call(ApiRequest::get(format!("/services/{id}")))
            .await?;
        service.into_service()
    }

    async fn update_service(
        &self,
        id: &ServiceId,
        version: VersionToken,
        spec: &UpdateSpec,
    ) -> Result<UpdateResponse, ClientError> {
        let body = serde_json::to_vec(&render_spec(spec))
            .map_err(|err| ClientError::decode(format!("cannot encode service spec: {err}")))?;
        let mut request =
            ApiRequest::post_json(format!("/services/{id}/update?version={version}"), body);
        if let Some(auth) = &spec.registry_auth {
            request = request.header(REGISTRY_AUTH_HEADER, auth.as_str());
        }

        let response: ApiUpdateResponse = self.call(request).await?;
        Ok(UpdateResponse {
            warnings: response.warnings.unwrap_or_default(),
        })
    }

    async fn registry_auth_token(&self, image: &str) -> Result<String, ClientError> {
        self.credentials.token_for(image)
    }

    async fn inspect_registry_digest(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, ClientError> {
        let mut request = ApiRequest::get(format!("/distribution/{image}/json"));
        if let Some(auth) = auth {
            request = request.header(REGISTRY_AUTH_HEADER, auth.as_str());
        }
        let inspect: DistributionInspect = self.call(request).await?;
        Ok(inspect.descriptor.digest)
    }
}
