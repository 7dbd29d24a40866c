//! Registry credentials from the docker CLI config file, encoded the way the
//! Engine expects them in `X-Registry-Auth`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use updater_core::reference::DEFAULT_DOMAIN;
use updater_core::{strip_digest, ClientError, ImageReference};

use crate::error::{io_err, DockerError};

/// Key Docker Hub credentials are stored under.
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(rename = "credsStore", default)]
    creds_store: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
    identitytoken: Option<String>,
    registrytoken: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serveraddress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identitytoken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    registrytoken: Option<String>,
}

/// Registry logins read from `config.json`.
#[derive(Debug, Default)]
pub struct DockerCredentials {
    auths: BTreeMap<String, AuthEntry>,
}

impl DockerCredentials {
    /// Docker config directory: `explicit` when given, else `~/.docker`.
    pub fn config_dir(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker")))
    }

    /// Read `config.json` from `dir`; a missing file means no credentials.
    pub fn load(dir: &Path) -> Result<Self, DockerError> {
        let path = dir.join(CONFIG_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no docker config, using anonymous registry access");
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        let config: ConfigFile = serde_json::from_slice(&raw)
            .map_err(|source| DockerError::Credentials { path: path.clone(), source })?;

        if let Some(store) = &config.creds_store {
            tracing::warn!(store = %store, "credential helpers are not supported, only inline auths are used");
        }
        Ok(Self {
            auths: config.auths,
        })
    }

    /// Encoded `X-Registry-Auth` token for the registry hosting `image`.
    ///
    /// Without a matching login the token is `e30=` (`{}`).
    pub fn token_for(&self, image: &str) -> Result<String, ClientError> {
        let reference = ImageReference::parse_normalized(strip_digest(image))
            .map_err(|err| ClientError::auth(format!("cannot resolve registry of {image}: {err}")))?;

        let config = match self.lookup(reference.domain()) {
            Some((key, entry)) => entry_to_config(key, entry)?,
            None => AuthConfig::default(),
        };
        let json = serde_json::to_vec(&config)
            .map_err(|err| ClientError::auth(format!("cannot encode credentials: {err}")))?;
        Ok(URL_SAFE.encode(json))
    }

    fn lookup(&self, domain: &str) -> Option<(&str, &AuthEntry)> {
        let wanted = if domain == DEFAULT_DOMAIN {
            DOCKER_HUB_AUTH_KEY
        } else {
            domain
        };
        if let Some((key, entry)) = self.auths.get_key_value(wanted) {
            return Some((key.as_str(), entry));
        }
        self.auths
            .iter()
            .find(|(key, _)| registry_host(key) == registry_host(wanted))
            .map(|(key, entry)| (key.as_str(), entry))
    }
}

fn registry_host(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = key.split('/').next().unwrap_or(key);
    match host {
        "index.docker.io" | "registry-1.docker.io" => DEFAULT_DOMAIN,
        other => other,
    }
}

fn entry_to_config(key: &str, entry: &AuthEntry) -> Result<AuthConfig, ClientError> {
    let (mut username, mut password) = (entry.username.clone(), entry.password.clone());
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(auth)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| ClientError::auth(format!("invalid auth entry for {key}")))?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or_else(|| ClientError::auth(format!("invalid auth entry for {key}")))?;
        username = Some(user.to_string());
        password = Some(pass.trim_end_matches('\n').to_string());
    }

    Ok(AuthConfig {
        username,
        password,
        serveraddress: Some(key.to_string()),
        identitytoken: entry.identitytoken.clone(),
        registrytoken: entry.registrytoken.clone(),
    })
}
