//! Middleware pipeline: composable logic around the router.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by every layer.
//! - [`Next`]: cursor into the remaining chain; [`Next::run`] advances it and,
//!   once the chain is exhausted, dispatches to the router.
//! - [`Pipeline`]: the ordered layers plus the router, shared by all connections.
//! - [`LoggerMiddleware`]: one structured log line per request.
//! - [`CorsMiddleware`]: permissive cross-origin headers and preflight handling.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::{context::Context, http::Request, http::Response, router::Router};

pub mod cors;

pub use cors::CorsMiddleware;

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// Consumed by [`run`](Self::run), so each layer can forward at most once.
pub struct Next {
    middlewares: Arc<Vec<MiddlewareHandler>>,
    router: Arc<Router>,
    // Which middleware the next `run` invokes.
    index: usize,
}

impl Next {
    /// Invokes the next layer, or the router when no layers remain.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => self.router.route(ctx.into_request()).await,
        }
    }
}

/// Implemented by every layer of the pipeline.
///
/// A layer may pass through (`next.run(ctx).await`), short-circuit by
/// returning its own [`Response`], or decorate the downstream response.
/// Implementations are shared across Tokio tasks and must not hold `&mut`
/// state across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Ordered middleware layers in front of a [`Router`].
///
/// # Examples
///
/// ```rust,no_run
/// use calgate::middleware::{CorsMiddleware, LoggerMiddleware, Pipeline};
/// use calgate::router::Router;
///
/// let pipeline = Pipeline::new(Router::new())
///     .layer(LoggerMiddleware)
///     .layer(CorsMiddleware::permissive());
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Arc<Vec<MiddlewareHandler>>,
    router: Arc<Router>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
            router: Arc::new(router),
        }
    }

    /// Appends a layer. Layers run in the order they were added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        Arc::make_mut(&mut self.middlewares).push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Runs `request` through every layer and then the router.
    pub async fn handle(&self, request: Request) -> Response {
        let next = Next {
            middlewares: Arc::clone(&self.middlewares),
            router: Arc::clone(&self.router),
            index: 0,
        };
        next.run(Context::new(request)).await
    }
}

/// Logs method, path, status, and duration of every request at `info`.
///
/// Never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                cache = response.headers().get("x-cache").unwrap_or("-"),
                elapsed = ?start.elapsed(),
                "request served"
            );

            response
        })
    }
}
