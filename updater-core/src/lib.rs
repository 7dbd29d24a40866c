//! swarm-updater core library — domain types, image references, eligibility,
//! configuration and the orchestrator capability trait.
//!
//! Public API surface:
//! - [`types`]: services, update specs, sweep requests and reports
//! - [`reference`]: image reference parsing and digest pinning
//! - [`eligibility`]: label / blacklist service selection
//! - [`config`]: raw settings and the validated [`EngineConfig`]
//! - [`schedule`]: interval or cron timing of daemon sweeps
//! - [`client`]: the [`OrchestratorClient`] trait consumed by the engine
//! - [`error`]: [`ClientError`], [`ReferenceError`], [`ConfigError`]

pub mod client;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod reference;
pub mod schedule;
pub mod types;

pub use client::OrchestratorClient;
pub use config::{EngineConfig, OverlapPolicy, UpdaterSettings};
pub use eligibility::{eligible, Eligibility};
pub use error::{ClientError, ClientErrorKind, ConfigError, ReferenceError};
pub use reference::{strip_digest, ImageReference};
pub use schedule::SweepSchedule;
pub use types::{
    RegistryAuth, Service, ServiceId, ServiceOutcome, ServiceReport, SkipReason, SweepReport,
    SweepRequest, SweepStatus, UpdateResponse, UpdateSpec, VersionToken,
};
