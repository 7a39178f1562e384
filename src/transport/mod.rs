//! Outbound transport: one bounded GET against the upstream origin.
//!
//! The fetcher only needs "send a GET, look at the status, maybe read the
//! body", so that is all [`Transport`] and [`UpstreamResponse`] describe.
//! [`HttpTransport`] is the `reqwest` implementation used in production; tests
//! substitute an in-memory one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::TransportError;

/// Fixed timeout for every upstream call, independent of caller configuration.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// A received upstream response whose body has not been read yet.
pub trait UpstreamResponse: Send {
    /// Numeric HTTP status.
    fn status(&self) -> u16;

    /// Reads the full body.
    fn into_body(self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

/// Issues a single GET request.
pub trait Transport: Send + Sync {
    type Response: UpstreamResponse;

    /// Sends `GET url`. Errors here mean no response was received at all.
    fn get(&self, url: &str) -> impl Future<Output = Result<Self::Response, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    type Response = T::Response;

    fn get(&self, url: &str) -> impl Future<Output = Result<T::Response, TransportError>> + Send {
        (**self).get(url)
    }
}

/// `reqwest`-backed transport with [`UPSTREAM_TIMEOUT`] applied to every call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the shared client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .user_agent(concat!("calgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    type Response = reqwest::Response;

    async fn get(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        debug!(url, "sending upstream request");
        Ok(self.client.get(url).send().await?)
    }
}

impl UpstreamResponse for reqwest::Response {
    fn status(&self) -> u16 {
        reqwest::Response::status(self).as_u16()
    }

    async fn into_body(self) -> Result<Bytes, TransportError> {
        self.bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))
    }
}
