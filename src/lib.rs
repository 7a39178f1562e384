//! # calgate
//!
//! A read-through caching gateway in front of a calendar JSON API.
//!
//! Clients ask for the event list, the genre list, or one event by numeric id.
//! Each is mapped to an upstream URL; a fresh cached copy is served when there
//! is one (`X-Cache: HIT`), otherwise the origin is asked, and a `200` body is
//! cached for five minutes and returned verbatim (`X-Cache: MISS`).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use calgate::cache::FreshnessCache;
//! use calgate::fetcher::ReadThroughFetcher;
//! use calgate::gateway::{self, Gateway, DEFAULT_UPSTREAM};
//! use calgate::middleware::{CorsMiddleware, LoggerMiddleware, Pipeline};
//! use calgate::server::Server;
//! use calgate::transport::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(FreshnessCache::new());
//!     let fetcher = ReadThroughFetcher::new(cache, HttpTransport::new()?);
//!     let gateway = Arc::new(Gateway::new(DEFAULT_UPSTREAM, fetcher));
//!
//!     let pipeline = Pipeline::new(gateway::routes(gateway))
//!         .layer(LoggerMiddleware)
//!         .layer(CorsMiddleware::permissive());
//!
//!     let server = Server::bind("0.0.0.0:3000").await?;
//!     server
//!         .run(move |req| {
//!             let pipeline = pipeline.clone();
//!             async move { pipeline.handle(req).await }
//!         }, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

// ── Core: cache and read-through path ─────────────────────────────────────────
pub mod cache;
pub mod error;
pub mod fetcher;
pub mod transport;

// ── Resources and routes ──────────────────────────────────────────────────────
pub mod gateway;

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheEntry, FreshnessCache};
pub use error::{GatewayError, TransportError};
pub use fetcher::{CACHE_TTL, CacheStatus, Fetched, ReadThroughFetcher};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
