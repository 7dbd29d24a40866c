//! Service selection: label opt-in or blacklist opt-out, never both.

use regex::Regex;

use crate::config::EngineConfig;
use crate::types::{Service, ENABLE_LABEL};

/// How services are selected for updates.
#[derive(Debug, Clone)]
pub enum Eligibility {
    /// Only services whose `label` is `"true"` (any case) participate.
    Label { label: String },
    /// Every service participates unless its name matches a pattern.
    Blacklist(Vec<Regex>),
}

impl Eligibility {
    pub fn label() -> Self {
        Self::Label {
            label: ENABLE_LABEL.to_string(),
        }
    }

    /// Pure predicate; an empty pattern matches (and so excludes) every name.
    pub fn allows(&self, service: &Service) -> bool {
        match self {
            Eligibility::Label { label } => service.label_is_true(label),
            Eligibility::Blacklist(patterns) => {
                !patterns.iter().any(|pattern| pattern.is_match(&service.name))
            }
        }
    }
}

impl Default for Eligibility {
    fn default() -> Self {
        Self::Blacklist(Vec::new())
    }
}

/// Whether `service` participates in updates under `config`.
pub fn eligible(service: &Service, config: &EngineConfig) -> bool {
    config.eligibility.allows(service)
}
