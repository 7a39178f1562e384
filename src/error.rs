//! Error taxonomy for the read-through path.

use thiserror::Error;

use crate::http::StatusCode;

/// Failure of the outbound call itself, before or while reading a response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("failed to connect to upstream: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("failed to read upstream body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            Self::Body(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Every way a single gateway request can fail.
///
/// None of these are fatal to the process and none are retried; the cache
/// stays usable for the next request whatever happened to this one.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller's identifier failed validation. Never reaches the transport.
    #[error("invalid resource identifier {0:?}")]
    InvalidKey(String),

    /// The upstream could not be reached (connect, DNS, timeout).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] TransportError),

    /// The upstream answered with something other than 200.
    #[error("upstream returned status {status}")]
    UpstreamError { status: u16 },

    /// The upstream answered 200 but the body could not be read in full.
    #[error("failed to read upstream response: {0}")]
    UpstreamReadFailure(#[source] TransportError),
}

impl GatewayError {
    /// The outward status this failure is surfaced with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidKey(_) => StatusCode::BadRequest,
            Self::UpstreamUnavailable(_)
            | Self::UpstreamError { .. }
            | Self::UpstreamReadFailure(_) => StatusCode::BadGateway,
        }
    }

    /// Stable, coarse reason shown to clients. Details stay in the logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "Invalid event id",
            Self::UpstreamUnavailable(_) => "Upstream unavailable",
            Self::UpstreamError { .. } => "Upstream error",
            Self::UpstreamReadFailure(_) => "Failed to read upstream response",
        }
    }
}
