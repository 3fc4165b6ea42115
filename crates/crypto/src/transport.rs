//! Scheme-selected transport to the local workload API.
//!
//! `unix://` endpoints are served over a fresh Unix stream connection per
//! request with a hand-serialized HTTP/1.1 exchange; `http://` and
//! `https://` endpoints go through `reqwest`. Every exchange is bounded by
//! the configured timeout.

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[cfg(unix)]
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Workload API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix stream socket
    Unix {
        /// Filesystem path of the socket
        socket_path: PathBuf,
        /// `Host` header value: the socket file name
        host: String,
    },
    /// TCP endpoint reached through the HTTP client
    Http {
        /// Base URL without trailing slash
        base_url: String,
    },
}

impl Endpoint {
    /// Parse an endpoint URI, choosing the transport by scheme.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let url = Url::parse(uri).map_err(|e| TransportError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "unix" => {
                let socket_path = PathBuf::from(url.path());
                let host = socket_path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| TransportError::InvalidUri {
                        uri: uri.to_string(),
                        reason: "missing socket path".to_string(),
                    })?;
                Ok(Endpoint::Unix { socket_path, host })
            }
            "http" | "https" => Ok(Endpoint::Http {
                base_url: uri.trim_end_matches('/').to_string(),
            }),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    fn describe(&self) -> String {
        match self {
            Endpoint::Unix { socket_path, .. } => format!("unix://{}", socket_path.display()),
            Endpoint::Http { base_url } => base_url.clone(),
        }
    }
}

/// Sends requests to one workload endpoint.
#[derive(Debug, Clone)]
pub struct WorkloadTransport {
    endpoint: Endpoint,
    timeout: Duration,
    client: reqwest::Client,
}

impl WorkloadTransport {
    /// Build a transport for `endpoint` with a per-request `timeout`.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self {
            endpoint,
            timeout,
            client,
        })
    }

    /// Endpoint served by this transport.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Perform one request/response exchange.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(
            endpoint = %self.endpoint.describe(),
            method = %request.method,
            path = %request.path_and_query,
            "Sending workload request"
        );

        let exchange = async {
            match &self.endpoint {
                Endpoint::Unix { socket_path, host } => send_unix(socket_path, host, &request).await,
                Endpoint::Http { base_url } => self.send_http(base_url, &request).await,
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }

    async fn send_http(
        &self,
        base_url: &str,
        request: &HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let url = format!("{}{}", base_url, request.path_and_query);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Client(e.to_string()))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| TransportError::Client(e.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(unix)]
async fn send_unix(
    socket_path: &Path,
    host: &str,
    request: &HttpRequest,
) -> Result<HttpResponse, TransportError> {
    use crate::http::ResponseParser;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let mut stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: socket_path.display().to_string(),
                source,
            })?;

    stream.write_all(&request.to_bytes(host)).await?;
    stream.flush().await?;

    let mut parser = ResponseParser::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return parser.finish();
        }
        if let Some(response) = parser.feed(&buf[..read])? {
            return Ok(response);
        }
    }
}

#[cfg(not(unix))]
async fn send_unix(
    _socket_path: &Path,
    _host: &str,
    _request: &HttpRequest,
) -> Result<HttpResponse, TransportError> {
    Err(TransportError::UnsupportedScheme("unix".to_string()))
}
