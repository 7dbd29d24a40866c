//! Domain types for the update engine.
//!
//! Services are transient snapshots: they are fetched from the orchestrator at
//! the start of a sweep (and re-fetched before retries) and never cached
//! across sweeps.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label marking the service that runs this updater.
pub const SELF_LABEL: &str = "xyz.megpoid.swarm-updater";
/// Opt-in label checked in label eligibility mode.
pub const ENABLE_LABEL: &str = "xyz.megpoid.swarm-updater.enable";
/// Deploy the new image but scale the service to zero replicas.
pub const UPDATE_ONLY_LABEL: &str = "xyz.megpoid.swarm-updater.update-only";

/// Registry auth token meaning "no credentials" (base64 of `{}`).
pub const EMPTY_AUTH_TOKEN: &str = "e30=";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque orchestrator identifier of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Optimistic-concurrency marker; must be echoed unchanged on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(pub u64);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Encoded registry credentials attached to inspection and update calls.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth(String);

impl RegistryAuth {
    /// Wrap a token from the client, dropping empty and `{}` tokens so they
    /// are omitted rather than sent literally.
    pub fn from_token(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() || token == EMPTY_AUTH_TOKEN {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegistryAuth(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Snapshot of one orchestrator service.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Current image reference, possibly digest-pinned.
    pub image: String,
    pub version: VersionToken,
    /// Replica count; `None` unless the service runs in fixed-replica mode.
    pub replicas: Option<u64>,
    /// Image of the previous spec, as reported by the orchestrator.
    pub previous_image: Option<String>,
    /// Raw deployable definition, echoed back on update.
    pub definition: Value,
}

impl Service {
    /// Case-insensitive `"true"` check on a label value; missing is false.
    pub fn label_is_true(&self, key: &str) -> bool {
        self.labels
            .get(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether this service hosts the updater itself.
    pub fn is_self(&self) -> bool {
        self.labels.contains_key(SELF_LABEL)
    }

    pub fn is_update_only(&self) -> bool {
        self.label_is_true(UPDATE_ONLY_LABEL)
    }
}

/// Mutated copy of a service definition submitted on update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    pub definition: Value,
    pub image: String,
    /// Replica count to force; `None` leaves the definition untouched.
    pub replicas: Option<u64>,
    pub registry_auth: Option<RegistryAuth>,
}

impl UpdateSpec {
    /// Start an update of `service` to `image`.
    pub fn for_service(service: &Service, image: impl Into<String>) -> Self {
        Self {
            definition: service.definition.clone(),
            image: image.into(),
            replicas: None,
            registry_auth: None,
        }
    }

    pub fn with_replicas(mut self, replicas: u64) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_auth(mut self, auth: Option<RegistryAuth>) -> Self {
        self.registry_auth = auth;
        self
    }
}

/// Response to an accepted update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResponse {
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Sweeps
// ---------------------------------------------------------------------------

/// Input of one sweep: image-name prefixes, empty means every eligible service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRequest {
    #[serde(default)]
    pub images: Vec<String>,
}

impl SweepRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            images: images.into_iter().map(Into::into).collect(),
        }
    }

    /// True when no filter was given or `image` starts with one of the prefixes.
    pub fn matches(&self, image: &str) -> bool {
        self.images.is_empty() || self.images.iter().any(|prefix| image.starts_with(prefix.as_str()))
    }
}

/// Why a service was left untouched without counting as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Blacklisted, or missing the enable label.
    Ineligible,
    /// Image matched none of the requested prefixes.
    FilteredOut,
    /// The sweep was cancelled before this service was dispatched.
    Cancelled,
}

/// Per-service result of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    Updated { image: String },
    AlreadyCurrent,
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub id: ServiceId,
    pub name: String,
    #[serde(flatten)]
    pub outcome: ServiceOutcome,
}

impl ServiceReport {
    pub fn new(service: &Service, outcome: ServiceOutcome) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    Completed,
    Cancelled,
}

/// Aggregated outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub status: SweepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub services: Vec<ServiceReport>,
}

impl SweepReport {
    pub fn count(&self, predicate: impl Fn(&ServiceOutcome) -> bool) -> usize {
        self.services.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Updated { .. }))
    }

    pub fn current(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::AlreadyCurrent))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ServiceOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, name: &str) -> Option<&ServiceOutcome> {
        self.services
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(labels: &[(&str, &str)]) -> Service {
        Service {
            id: ServiceId::from("1"),
            name: "service_foo".into(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            image: "foo:latest".into(),
            version: VersionToken(7),
            replicas: Some(2),
            previous_image: None,
            definition: json!({}),
        }
    }

    #[test]
    fn empty_and_brace_tokens_mean_no_auth() {
        assert!(RegistryAuth::from_token("").is_none());
        assert!(RegistryAuth::from_token(EMPTY_AUTH_TOKEN).is_none());
        let auth = RegistryAuth::from_token("eyJ1c2VybmFtZSI6ImEifQ==").expect("token");
        assert_eq!(auth.as_str(), "eyJ1c2VybmFtZSI6ImEifQ==");
        assert!(!format!("{auth:?}").contains("eyJ"));
    }

    #[test]
    fn self_label_presence_is_enough() {
        assert!(service(&[(SELF_LABEL, "")]).is_self());
        assert!(!service(&[(ENABLE_LABEL, "true")]).is_self());
    }

    #[test]
    fn update_only_is_case_insensitive() {
        assert!(service(&[(UPDATE_ONLY_LABEL, "True")]).is_update_only());
        assert!(!service(&[(UPDATE_ONLY_LABEL, "yes")]).is_update_only());
        assert!(!service(&[]).is_update_only());
    }

    #[test]
    fn sweep_request_prefix_matching() {
        assert!(SweepRequest::all().matches("anything"));
        let request = SweepRequest::images(["ghcr.io/acme/", "nginx"]);
        assert!(request.matches("ghcr.io/acme/api:1"));
        assert!(request.matches("nginx:latest"));
        assert!(!request.matches("redis:7"));
    }

    #[test]
    fn report_serializes_flat_outcome() {
        let report = ServiceReport::new(
            &service(&[]),
            ServiceOutcome::Skipped {
                reason: SkipReason::FilteredOut,
            },
        );
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["name"], "service_foo");
        assert_eq!(value["outcome"], "skipped");
        assert_eq!(value["reason"], "filtered_out");
    }
}
