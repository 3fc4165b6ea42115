//! Error types for the workload transport and credential signing.

use leafbridge_core::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Failures reaching the workload API, before any application status is known.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Endpoint URI could not be parsed
    #[error("Invalid endpoint URI {uri}: {reason}")]
    InvalidUri {
        /// Offending URI
        uri: String,
        /// Parse failure
        reason: String,
    },

    /// Endpoint URI uses a scheme other than unix, http or https
    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Connecting to the endpoint failed
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint description
        endpoint: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent bytes that are not a valid HTTP/1.1 response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Request did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP client failure on the TCP path
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidUri { .. } | TransportError::UnsupportedScheme(_)
        )
    }
}

/// Errors raised while obtaining a device credential.
#[derive(Debug, Error)]
pub enum SignError {
    /// Workload API unreachable or the exchange broke down
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Workload API answered with a non-success status
    #[error("Workload API returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Response body did not contain a usable digest
    #[error("Invalid sign response: {0}")]
    InvalidResponse(String),
}

impl SignError {
    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SignError::Transport(TransportError::Timeout(_)))
    }
}

impl Retryable for SignError {
    fn is_retryable(&self) -> bool {
        match self {
            SignError::Transport(err) => err.is_retryable(),
            SignError::Status { status, .. } => *status == 429 || *status >= 500,
            SignError::InvalidResponse(_) => false,
        }
    }
}

/// Errors raised while generating a shared access signature.
#[derive(Debug, Error)]
pub enum SasError {
    /// Key is not valid base64
    #[error("Signing key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    /// Key was rejected by the MAC
    #[error("Signing key has an invalid length")]
    InvalidKeyLength,
}
