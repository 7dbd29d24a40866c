//! Raw request/response exchange with the Docker Engine API, either over
//! TCP via `reqwest` or over the local unix socket via `hyper`.

use std::path::{Path, PathBuf};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use updater_core::ClientError;

use crate::error::DockerError;
use crate::tls::TlsConfig;

/// Engine API version every request path is prefixed with.
pub const API_VERSION: &str = "v1.41";

pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Where the Docker Engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    Unix(PathBuf),
    /// Base URL without trailing slash, e.g. `http://10.0.0.5:2375`.
    Http(String),
}

impl DockerHost {
    /// Parse a `DOCKER_HOST` style address.
    pub fn parse(raw: &str) -> Result<Self, DockerError> {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(DockerError::UnsupportedHost(raw.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(address) = raw.strip_prefix("tcp://") {
            return Ok(Self::Http(format!("http://{}", address.trim_end_matches('/'))));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Http(raw.trim_end_matches('/').to_string()));
        }
        Err(DockerError::UnsupportedHost(raw.to_string()))
    }
}

impl Default for DockerHost {
    fn default() -> Self {
        Self::Unix(PathBuf::from(DEFAULT_SOCKET))
    }
}

pub(crate) struct ApiRequest {
    pub method: Method,
    /// Path below the versioned API root, including any query string.
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            headers: vec![("Content-Type", "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) enum Transport {
    Http { client: reqwest::Client, base: String },
    Unix { socket: PathBuf },
}

impl Transport {
    /// With `tls`, TCP hosts are reached over https and the engine
    /// certificate is verified against the configured CA.
    pub fn new(host: &DockerHost, tls: Option<&TlsConfig>) -> Result<Self, DockerError> {
        Ok(match host {
            DockerHost::Unix(socket) => {
                if tls.is_some() {
                    tracing::warn!(socket = %socket.display(), "TLS settings ignored for unix socket");
                }
                Self::Unix {
                    socket: socket.clone(),
                }
            }
            DockerHost::Http(base) => {
                let mut builder = reqwest::Client::builder()
                    .user_agent(concat!("swarm-updater/", env!("CARGO_PKG_VERSION")));
                let mut base = base.clone();
                if let Some(tls) = tls {
                    builder = tls.apply(builder)?;
                    if let Some(address) = base.strip_prefix("http://") {
                        base = format!("https://{address}");
                    }
                }
                Self::Http {
                    client: builder.build()?,
                    base,
                }
            }
        })
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        match self {
            Self::Http { client, base } => send_http(client, base, request).await,
            Self::Unix { socket } => send_unix(socket, request).await,
        }
    }

    #[cfg(test)]
    fn base_url(&self) -> Option<&str> {
        match self {
            Self::Http { base, .. } => Some(base),
            Self::Unix { .. } => None,
        }
    }
}

async fn send_http(
    client: &reqwest::Client,
    base: &str,
    request: ApiRequest,
) -> Result<ApiResponse, ClientError> {
    let url = format!("{base}/{API_VERSION}{}", request.path);
    // reqwest 0.11 is built on the http 0.2 types.
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .map_err(|err| ClientError::transport(format!("invalid method: {err}")))?;
    let mut builder = client.request(method, &url);
    for (name, value) in request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|err| ClientError::transport(format!("request to {url} failed: {err}")))?;
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|err| ClientError::transport(format!("reading response from {url}: {err}")))?;
    Ok(ApiResponse {
        status,
        body: body.to_vec(),
    })
}

// One HTTP/1.1 connection per request; hyper frames the body by
// Content-Length or chunked encoding, so the engine may keep the socket open.
async fn send_unix(socket: &Path, request: ApiRequest) -> Result<ApiResponse, ClientError> {
    let stream = UnixStream::connect(socket).await.map_err(|err| {
        ClientError::transport(format!("cannot connect to {}: {err}", socket.display()))
    })?;
    let failed = |err: hyper::Error| {
        ClientError::transport(format!("docker socket {}: {err}", socket.display()))
    };

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(failed)?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!(error = %err, "docker socket connection closed");
        }
    });

    let mut builder = Request::builder()
        .method(request.method)
        .uri(format!("/{API_VERSION}{}", request.path))
        .header(header::HOST, "docker");
    for (name, value) in &request.headers {
        builder = builder.header(*name, value.as_str());
    }
    let body = Full::new(Bytes::from(request.body.unwrap_or_default()));
    let http_request = builder
        .body(body)
        .map_err(|err| ClientError::transport(format!("invalid request: {err}")))?;

    let response = sender.send_request(http_request).await.map_err(failed)?;
    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(failed)?
        .to_bytes();
    Ok(ApiResponse {
        status,
        body: body.to_vec(),
    })
}
