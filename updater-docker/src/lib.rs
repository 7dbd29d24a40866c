//! Docker Engine implementation of [`updater_core::OrchestratorClient`].
//!
//! Talks to the swarm service and distribution endpoints over the local unix
//! socket or TCP (optionally with TLS client certificates), and reads registry logins from the docker CLI config.

pub mod auth;
pub mod client;
pub mod error;
mod model;
pub mod tls;
pub mod transport;

pub use auth::DockerCredentials;
pub use client::DockerClient;
pub use error::DockerError;
pub use tls::TlsConfig;
pub use transport::{DockerHost, API_VERSION, DEFAULT_SOCKET};
