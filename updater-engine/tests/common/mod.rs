//! Recording in-memory orchestrator shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use updater_core::{
    ClientError, OrchestratorClient, RegistryAuth, Service, ServiceId, UpdateResponse, UpdateSpec,
    VersionToken,
};

pub const OLD_DIGEST: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";
pub const NEW_DIGEST: &str =
    "sha256:1111111111111111111111111111111111111111111111111111111111111111";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Get(String),
    Update {
        id: String,
        version: u64,
        image: String,
        replicas: Option<u64>,
        auth: Option<String>,
    },
    Auth(String),
    Inspect {
        image: String,
        auth: Option<String>,
    },
}

pub struct MockOrchestrator {
    services: Mutex<BTreeMap<String, Service>>,
    digests: Mutex<HashMap<String, String>>,
    conflicts: Mutex<HashMap<String, u32>>,
    failing_updates: Mutex<HashMap<String, String>>,
    panicking_images: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    listing_in_flight: AtomicUsize,
    listing_peak: AtomicUsize,
    fail_listing: AtomicBool,
    auth_token: Mutex<String>,
    delay: Duration,
}

impl MockOrchestrator {
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            services: Mutex::new(
                services
                    .into_iter()
                    .map(|s| (s.id.0.clone(), s))
                    .collect(),
            ),
            digests: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(HashMap::new()),
            failing_updates: Mutex::new(HashMap::new()),
            panicking_images: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            listing_in_flight: AtomicUsize::new(0),
            listing_peak: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
            auth_token: Mutex::new("e30=".to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Registry reports `digest` for the unpinned `image`.
    pub fn publish(&self, image: &str, digest: &str) {
        self.digests
            .lock()
            .unwrap()
            .insert(image.to_string(), digest.to_string());
    }

    /// The next `count` updates of `id` fail with a version conflict.
    pub fn conflict(&self, id: &str, count: u32) {
        self.conflicts.lock().unwrap().insert(id.to_string(), count);
    }

    pub fn fail_update(&self, id: &str, message: &str) {
        self.failing_updates
            .lock()
            .unwrap()
            .insert(id.to_string(), message.to_string());
    }

    /// Digest lookups for `image` panic instead of answering.
    pub fn panic_on_inspect(&self, image: &str) {
        self.panicking_images
            .lock()
            .unwrap()
            .insert(image.to_string());
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn set_auth_token(&self, token: &str) {
        *self.auth_token.lock().unwrap() = token.to_string();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Update { .. }))
            .collect()
    }

    pub fn updated_ids(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn peak_listing(&self) -> usize {
        self.listing_peak.load(Ordering::SeqCst)
    }

    pub fn service(&self, id: &str) -> Service {
        self.services.lock().unwrap()[id].clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn tracked<T>(&self, work: impl FnOnce() -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = work();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl OrchestratorClient for MockOrchestrator {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        self.record(Call::List);
        let now = self.listing_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.listing_peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.listing_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ClientError::transport("connection refused"));
        }
        Ok(self.services.lock().unwrap().values().cloned().collect())
    }

    async fn get_service(&self, id: &ServiceId) -> Result<Service, ClientError> {
        self.record(Call::Get(id.0.clone()));
        self.services
            .lock()
            .unwrap()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| ClientError::not_found(format!("service {id} not found")))
    }

    async fn update_service(
        &self,
        id: &ServiceId,
        version: VersionToken,
        spec: &UpdateSpec,
    ) -> Result<UpdateResponse, ClientError> {
        self.record(Call::Update {
            id: id.0.clone(),
            version: version.0,
            image: spec.image.clone(),
            replicas: spec.replicas,
            auth: spec.registry_auth.as_ref().map(|a| a.as_str().to_string()),
        });

        self.tracked(|| {
            if let Some(message) = self.failing_updates.lock().unwrap().get(&id.0) {
                return Err(ClientError::api(message.clone()));
            }

            let mut services = self.services.lock().unwrap();
            let service = services
                .get_mut(&id.0)
                .ok_or_else(|| ClientError::not_found(format!("service {id} not found")))?;

            let mut conflicts = self.conflicts.lock().unwrap();
            if let Some(remaining) = conflicts.get_mut(&id.0) {
                if *remaining > 0 {
                    *remaining -= 1;
                    // Someone else changed the service meanwhile.
                    service.version = VersionToken(service.version.0 + 1);
                    return Err(ClientError::api(
                        "rpc error: code = Unknown desc = update out of sequence",
                    ));
                }
            }
            if service.version != version {
                return Err(ClientError::api(
                    "rpc error: code = Unknown desc = update out of sequence",
                ));
            }

            service.previous_image = Some(service.image.clone());
            service.image = spec.image.clone();
            if let Some(replicas) = spec.replicas {
                service.replicas = Some(replicas);
            }
            service.version = VersionToken(service.version.0 + 1);
            Ok(UpdateResponse::default())
        })
        .await
    }

    async fn registry_auth_token(&self, image: &str) -> Result<String, ClientError> {
        self.record(Call::Auth(image.to_string()));
        Ok(self.auth_token.lock().unwrap().clone())
    }

    async fn inspect_registry_digest(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<String, ClientError> {
        self.record(Call::Inspect {
            image: image.to_string(),
            auth: auth.map(|a| a.as_str().to_string()),
        });
        if self.panicking_images.lock().unwrap().contains(image) {
            panic!("registry client crashed on {image}");
        }
        self.tracked(|| {
            self.digests
                .lock()
                .unwrap()
                .get(image)
                .cloned()
                .ok_or_else(|| ClientError::not_found(format!("manifest unknown: {image}")))
        })
        .await
    }
}

pub fn service(id: &str, name: &str, image: &str, labels: &[(&str, &str)]) -> Service {
    Service {
        id: ServiceId::from(id),
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        image: image.to_string(),
        version: VersionToken(10),
        replicas: Some(1),
        previous_image: None,
        definition: json!({ "Name": name }),
    }
}

pub fn pinned(image: &str, digest: &str) -> String {
    format!("{image}@{digest}")
}
