//! Configuration surface.
//!
//! [`UpdaterSettings`] is the raw, serializable form read from YAML and
//! command-line flags. [`EngineConfig::from_settings`] validates it once at
//! startup; an invalid combination never reaches a sweep.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::eligibility::Eligibility;
use crate::error::ConfigError;
use crate::schedule::SweepSchedule;
use crate::types::Service;

pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// What a trigger does when a sweep is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Block until the running sweep finishes, then run.
    #[default]
    Wait,
    /// Return a busy error immediately.
    Reject,
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::Wait => write!(f, "wait"),
            OverlapPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Raw settings, as found in a YAML settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterSettings {
    /// Only update services carrying the enable label.
    pub label_enable: bool,
    /// Regular expressions matched against service names.
    pub blacklist: Vec<String>,
    pub max_concurrency: usize,
    pub overlap_policy: OverlapPolicy,
    /// Seconds between sweeps; defaults when no cron schedule is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    /// Cron expression; mutually exclusive with `interval_secs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Honour the update-only label by scaling services to zero replicas.
    pub update_only_label: bool,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            label_enable: false,
            blacklist: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            overlap_policy: OverlapPolicy::default(),
            interval_secs: None,
            schedule: None,
            update_only_label: true,
        }
    }
}

impl UpdaterSettings {
    /// Load settings from a YAML file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// When the daemon sweeps.
    pub fn schedule(&self) -> Result<SweepSchedule, ConfigError> {
        match (&self.schedule, self.interval_secs) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingSchedule),
            (Some(expression), None) => SweepSchedule::parse(expression),
            (None, secs) => {
                SweepSchedule::every(Duration::from_secs(secs.unwrap_or(DEFAULT_INTERVAL_SECS)))
            }
        }
    }

    /// Settings as they take effect, with the default interval spelled out.
    pub fn effective(mut self) -> Self {
        if self.schedule.is_none() && self.interval_secs.is_none() {
            self.interval_secs = Some(DEFAULT_INTERVAL_SECS);
        }
        self
    }
}

/// Split a comma-separated blacklist, trimming each entry.
pub fn parse_blacklist(raw: &str) -> Vec<String> {
    raw.split(',').map(|entry| entry.trim().to_string()).collect()
}

/// Validated, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub eligibility: Eligibility,
    pub max_concurrency: usize,
    pub overlap_policy: OverlapPolicy,
    pub honor_update_only: bool,
}

impl EngineConfig {
    pub fn from_settings(settings: &UpdaterSettings) -> Result<Self, ConfigError> {
        if settings.label_enable && !settings.blacklist.is_empty() {
            return Err(ConfigError::ConflictingEligibility);
        }
        if settings.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        settings.schedule()?;

        let eligibility = if settings.label_enable {
            Eligibility::label()
        } else {
            let patterns = settings
                .blacklist
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Eligibility::Blacklist(patterns)
        };

        Ok(Self {
            eligibility,
            max_concurrency: settings.max_concurrency,
            overlap_policy: settings.overlap_policy,
            honor_update_only: settings.update_only_label,
        })
    }

    pub fn eligible(&self, service: &Service) -> bool {
        self.eligibility.allows(service)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eligibility: Eligibility::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            overlap_policy: OverlapPolicy::default(),
            honor_update_only: true,
        }
    }
}
