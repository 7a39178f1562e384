//! Calendar resources, their upstream URLs, and the routes that serve them.
//!
//! | Inbound path                 | Upstream                       |
//! |------------------------------|--------------------------------|
//! | `/api/calendar/events`       | `{base}/events?show_past=true` |
//! | `/api/calendar/genres`       | `{base}/genres`                |
//! | `/api/calendar/event/{id}`   | `{base}/event/{id}`            |
//!
//! The cache key for every resource is its fully-qualified upstream URL.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::GatewayError;
use crate::fetcher::{Fetched, ReadThroughFetcher};
use crate::http::{Response, StatusCode};
use crate::router::{REST_PARAM, Router};
use crate::transport::Transport;

/// Origin the gateway fronts unless configured otherwise.
pub const DEFAULT_UPSTREAM: &str = "https://calman02.barrierefrei.berlin/calendar/api/v1";

pub const EVENTS_PATH: &str = "/api/calendar/events";
pub const GENRES_PATH: &str = "/api/calendar/genres";
/// Everything after this prefix is the event id.
pub const EVENT_PREFIX: &str = "/api/calendar/event/";

/// A numeric event identifier: one or more ASCII digits, nothing else.
///
/// Kept as the received digit string so leading zeros reach the upstream
/// unchanged.
///
/// # Examples
///
/// ```
/// use calgate::gateway::EventId;
///
/// assert!("42".parse::<EventId>().is_ok());
/// assert!("0".parse::<EventId>().is_ok());
/// assert!("-1".parse::<EventId>().is_err());
/// assert!("".parse::<EventId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EventId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_owned()))
        } else {
            Err(GatewayError::InvalidKey(s.to_owned()))
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Events,
    Genres,
    Event(EventId),
}

impl Resource {
    /// The upstream URL for this resource under `base`, which doubles as its
    /// cache key.
    pub fn upstream_url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            Self::Events => format!("{base}/events?show_past=true"),
            Self::Genres => format!("{base}/genres"),
            Self::Event(id) => format!("{base}/event/{id}"),
        }
    }
}

/// The single long-lived gateway instance shared by all request tasks.
pub struct Gateway<T> {
    upstream: String,
    fetcher: ReadThroughFetcher<T>,
}

impl<T: Transport> Gateway<T> {
    pub fn new(upstream: impl Into<String>, fetcher: ReadThroughFetcher<T>) -> Self {
        Self {
            upstream: upstream.into(),
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &ReadThroughFetcher<T> {
        &self.fetcher
    }

    /// Serves `resource` through the read-through fetcher.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`] from the fetcher.
    pub async fn fetch(&self, resource: &Resource) -> Result<Fetched, GatewayError> {
        let url = resource.upstream_url(&self.upstream);
        self.fetcher.get(&url, &url).await
    }

    /// Validates a raw event id and serves the event.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidKey`] without touching cache or transport when
    /// `raw_id` is not all digits; otherwise whatever [`fetch`](Self::fetch) returns.
    pub async fn fetch_event(&self, raw_id: &str) -> Result<Fetched, GatewayError> {
        let id: EventId = raw_id.parse()?;
        self.fetch(&Resource::Event(id)).await
    }
}

/// Shapes a fetch outcome into the outward response.
pub fn respond(result: Result<Fetched, GatewayError>) -> Response {
    match result {
        Ok(fetched) => Response::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .header("X-Cache", fetched.source.as_str())
            .payload(fetched.payload),
        Err(e) => {
            debug!(error = %e, "request failed");
            Response::text(e.status_code(), e.reason())
        }
    }
}

/// Builds the router for the three calendar resources.
pub fn routes<T>(gateway: Arc<Gateway<T>>) -> Router
where
    T: Transport + 'static,
{
    let mut router = Router::new();

    let gw = Arc::clone(&gateway);
    router.get(EVENTS_PATH, move |_ctx: Context| {
        let gw = Arc::clone(&gw);
        async move { respond(gw.fetch(&Resource::Events).await) }
    });

    let gw = Arc::clone(&gateway);
    router.get(GENRES_PATH, move |_ctx: Context| {
        let gw = Arc::clone(&gw);
        async move { respond(gw.fetch(&Resource::Genres).await) }
    });

    let gw = gateway;
    router.get(&format!("{EVENT_PREFIX}*"), move |ctx: Context| {
        let gw = Arc::clone(&gw);
        async move {
            let id = ctx.params().get(REST_PARAM).unwrap_or_default();
            respond(gw.fetch_event(id).await)
        }
    });

    router
}
