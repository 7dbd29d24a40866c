//! Global flags and the assembly of settings, engine and docker client.
//!
//! Precedence: command-line flag (or its environment variable) over the
//! settings file over built-in defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};

use updater_core::config::parse_blacklist;
use updater_core::types::ENABLE_LABEL;
use updater_core::{EngineConfig, OverlapPolicy, UpdaterSettings};
use updater_daemon::paths::state_dir;
use updater_docker::{DockerClient, DockerCredentials, DockerHost, TlsConfig, DEFAULT_SOCKET};
use updater_engine::{SweepGuard, UpdateEngine};

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Docker host (unix://, tcp://, http:// or https://).
    #[arg(
        short = 'H',
        long,
        global = true,
        env = "DOCKER_HOST",
        default_value_t = format!("unix://{DEFAULT_SOCKET}")
    )]
    pub host: String,

    /// Location of the docker client config directory.
    #[arg(short = 'c', long, global = true, env = "DOCKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// YAML settings file; flags override its values.
    #[arg(long, global = true, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Poll interval in seconds.
    #[arg(short = 'i', long, global = true, env = "INTERVAL", conflicts_with = "schedule")]
    pub interval: Option<u64>,

    /// Cron expression (5 or 6 fields, or @every <duration>) for sweeps.
    #[arg(short = 's', long, global = true, env = "SCHEDULE")]
    pub schedule: Option<String>,

    /// Use TLS and verify the docker engine certificate.
    #[arg(
        short = 't',
        long = "tlsverify",
        global = true,
        env = "DOCKER_TLS_VERIFY",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub tls_verify: bool,

    /// Directory with ca.pem, cert.pem and key.pem (default: docker config dir).
    #[arg(long, global = true, env = "DOCKER_CERT_PATH")]
    pub cert_path: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        global = true,
        env = "LABEL_ENABLE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
        help = format!("Only update services where {ENABLE_LABEL} is set to true")
    )]
    pub label_enable: bool,

    /// Comma separated list of service name patterns to ignore.
    #[arg(short = 'b', long, global = true, env = "BLACKLIST")]
    pub blacklist: Option<String>,

    /// Maximum number of services updated at the same time.
    #[arg(short = 'm', long, global = true, env = "MAX_THREADS")]
    pub max_threads: Option<usize>,

    /// What a trigger does while a sweep is running: wait or reject.
    #[arg(long, global = true, env = "OVERLAP_POLICY")]
    pub overlap: Option<OverlapPolicy>,

    /// Directory holding the daemon control socket (default ~/.swarm-updater).
    #[arg(long, global = true, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(
        short = 'd',
        long,
        global = true,
        env = "DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub debug: bool,

    /// Log one JSON object per line.
    #[arg(
        long,
        global = true,
        env = "LOG_JSON",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Effective settings after applying flags on top of the settings file.
    pub fn settings(&self) -> Result<UpdaterSettings> {
        let mut settings = match &self.config_file {
            Some(path) => UpdaterSettings::load(path)?,
            None => UpdaterSettings::default(),
        };

        if self.label_enable {
            settings.label_enable = true;
        }
        if let Some(raw) = &self.blacklist {
            settings.blacklist = parse_blacklist(raw);
        }
        if let Some(max) = self.max_threads {
            settings.max_concurrency = max;
        }
        if let Some(policy) = self.overlap {
            settings.overlap_policy = policy;
        }
        if let Some(interval) = self.interval {
            settings.interval_secs = Some(interval);
            settings.schedule = None;
        }
        if let Some(schedule) = &self.schedule {
            settings.schedule = Some(schedule.clone());
            settings.interval_secs = None;
        }
        Ok(settings)
    }

    /// Validated settings and engine configuration. Nothing touches the
    /// docker host before this succeeds.
    pub fn engine_config(&self) -> Result<(UpdaterSettings, EngineConfig)> {
        let settings = self.settings()?;
        let config = EngineConfig::from_settings(&settings)?;
        Ok((settings, config))
    }

    pub fn docker_client(&self) -> Result<DockerClient> {
        let host = DockerHost::parse(&self.host)?;
        let credentials = match DockerCredentials::config_dir(self.config.as_deref()) {
            Some(dir) => DockerCredentials::load(&dir)?,
            None => DockerCredentials::default(),
        };
        let tls = match (self.tls_verify, &self.cert_path) {
            (false, _) => None,
            (true, Some(dir)) => Some(TlsConfig::new(dir)),
            (true, None) => {
                let dir = DockerCredentials::config_dir(self.config.as_deref())
                    .context("cannot locate TLS certificates; set --cert-path")?;
                Some(TlsConfig::new(dir))
            }
        };
        DockerClient::with_tls(&host, credentials, tls.as_ref())
            .context("failed to create docker client")
    }

    /// Full update stack: validated config, docker client, engine and guard.
    pub fn build_guard(&self) -> Result<(UpdaterSettings, SweepGuard)> {
        let (settings, config) = self.engine_config()?;
        let client = self.docker_client()?;
        let engine = UpdateEngine::new(std::sync::Arc::new(client), config);
        Ok((settings, SweepGuard::new(engine)))
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        Ok(state_dir(self.state_dir.as_deref())?)
    }
}
