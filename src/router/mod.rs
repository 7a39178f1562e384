//! Request routing: map request paths to handler functions.
//!
//! Two pattern styles are supported:
//!
//! | Pattern                  | Example match              | Captured params       |
//! |--------------------------|----------------------------|-----------------------|
//! | `/api/calendar/genres`   | `/api/calendar/genres`     | *(none)*              |
//! | `/api/calendar/event/*`  | `/api/calendar/event/42`   | `rest → "42"`         |
//!
//! Exact patterns match only the identical path, so `/api/calendar/genres/` is
//! a 404. Prefix patterns keep their trailing `/` and capture everything after
//! it verbatim, including the empty string and further slashes, so the handler
//! gets to reject them.
//!
//! Routes are matched in registration order. When a path matches but no route
//! for it accepts the method, the router answers `405 Method Not Allowed`;
//! when nothing matches the path at all, `404 Not Found`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::http::{Method, Request, Response, StatusCode};

/// Type-erased async handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this automatically.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// Name of the parameter a prefix pattern captures into.
pub const REST_PARAM: &str = "rest";

// Compiled representation of a route pattern string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    // One exact path, e.g. `/api/calendar/events`.
    Exact(String),
    // Any path starting with the prefix (which ends in `/`), e.g. `/api/calendar/event/`.
    Prefix(String),
}

impl Pattern {
    // `"/a/b/*"` compiles to `Prefix("/a/b/")`; anything else to `Exact`.
    fn parse(pattern: &str) -> Self {
        if let Some(prefix) = pattern.strip_suffix('*') {
            if prefix.ends_with('/') {
                return Self::Prefix(prefix.to_owned());
            }
        }
        Self::Exact(pattern.to_owned())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        match self {
            Self::Exact(p) => (p == path).then(PathParams::new),
            Self::Prefix(prefix) => path.strip_prefix(prefix.as_str()).map(|rest| {
                let mut params = PathParams::new();
                params.insert(REST_PARAM, rest);
                params
            }),
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// Dispatches requests to registered handlers.
///
/// # Examples
///
/// ```rust,no_run
/// use calgate::context::Context;
/// use calgate::router::Router;
/// use calgate::http::{Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::Ok) });
/// router.get("/items/*", |ctx: Context| async move {
///     let rest = ctx.params().get("rest").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(rest)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `GET` handler for `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    // Erase the concrete handler type and store it as a `Handler` trait object.
    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    /// Dispatches `request` to the first route matching both method and path.
    pub async fn route(&self, request: Request) -> Response {
        let mut path_known = false;

        for route in &self.routes {
            let Some(params) = route.pattern.matches(request.path()) else {
                continue;
            };
            if &route.method == request.method() {
                let ctx = Context::with_params(request, params);
                return (route.handler)(ctx).await;
            }
            path_known = true;
        }

        if path_known {
            Response::text(StatusCode::MethodNotAllowed, "Method not allowed")
        } else {
            Response::new(StatusCode::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn echo_rest() -> impl IntoHandler {
        |ctx: Context| async move {
            let rest = ctx.params().get(REST_PARAM).unwrap_or("<none>").to_owned();
            Response::new(StatusCode::Ok).body(rest)
        }
    }

    #[test]
    fn pattern_parse() {
        assert_eq!(Pattern::parse("/"), Pattern::Exact("/".into()));
        assert_eq!(Pattern::parse("/a/b/"), Pattern::Exact("/a/b/".into()));
        assert_eq!(Pattern::parse("/a/b/*"), Pattern::Prefix("/a/b/".into()));
    }

    #[test]
    fn exact_pattern_rejects_trailing_slash() {
        let pat = Pattern::parse("/api/calendar/genres");
        assert!(pat.matches("/api/calendar/genres").is_some());
        assert!(pat.matches("/api/calendar/genres/").is_none());
        assert!(pat.matches("/api/calendar/genresx").is_none());
        assert!(pat.matches("/api/calendar").is_none());
    }

    #[test]
    fn prefix_pattern_captures_rest_verbatim() {
        let pat = Pattern::parse("/api/calendar/event/*");
        let rest = |p: &str| pat.matches(p).map(|params| params.get(REST_PARAM).unwrap().to_owned());
        assert_eq!(rest("/api/calendar/event/42").as_deref(), Some("42"));
        assert_eq!(rest("/api/calendar/event/").as_deref(), Some(""));
        assert_eq!(rest("/api/calendar/event/1/2").as_deref(), Some("1/2"));
        assert_eq!(rest("/api/calendar/event"), None);
        assert_eq!(rest("/api/calendar/events"), None);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("GET", "/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert!(Router::new().route(make_request("GET", "/")).await.status() == StatusCode::NotFound);

        let res = router.route(make_request("GET", "/hello/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn known_path_with_wrong_method_is_405() {
        let mut router = Router::new();
        router.get("/api/calendar/events", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/api/calendar/event/*", echo_rest());

        for (method, path) in [
            ("POST", "/api/calendar/events"),
            ("DELETE", "/api/calendar/event/1"),
            ("HEAD", "/api/calendar/events"),
        ] {
            let res = router.route(make_request(method, path)).await;
            assert_eq!(res.status(), StatusCode::MethodNotAllowed, "{method} {path}");
            assert_eq!(res.body_bytes().as_ref(), b"Method not allowed\n");
        }
    }

    #[tokio::test]
    async fn prefix_route_receives_rest() {
        let mut router = Router::new();
        router.get("/api/calendar/event/*", echo_rest());
        let res = router.route(make_request("GET", "/api/calendar/event/42")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_bytes().as_ref(), b"42");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::NoContent) });
        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }
}
