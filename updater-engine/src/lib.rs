//! # updater-engine
//!
//! Update orchestration: digest resolution, conflict-safe service updates,
//! bounded-concurrency sweeps and the overlap guard.
//!
//! Callers normally go through [`SweepGuard::trigger_sweep`], which wraps
//! [`UpdateEngine::run`] in single-sweep mutual exclusion.

pub mod engine;
pub mod error;
pub mod guard;
pub mod resolver;
pub mod updater;

pub use engine::UpdateEngine;
pub use error::{ServiceError, SweepError};
pub use guard::SweepGuard;
pub use resolver::DigestResolver;
pub use updater::{ServiceUpdater, UpdateResult, MAX_UPDATE_ATTEMPTS};

pub use tokio_util::sync::CancellationToken;
