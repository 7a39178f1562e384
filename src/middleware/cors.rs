//! Cross-Origin Resource Sharing.

use std::future::Future;
use std::pin::Pin;

use super::{Middleware, Next};
use crate::context::Context;
use crate::http::{Method, Response, StatusCode};

/// Attaches `Access-Control-*` headers to every response and answers
/// `OPTIONS` preflight requests itself with `204 No Content`.
///
/// Headers are applied whether or not the request carried an `Origin`, and
/// whatever the downstream status was, so error responses are readable from
/// the browser too.
///
/// # Examples
///
/// ```rust
/// use calgate::middleware::CorsMiddleware;
///
/// let cors = CorsMiddleware::permissive();
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl CorsMiddleware {
    /// Any origin, `GET` and `OPTIONS`, and the `Content-Type` request header.
    pub fn permissive() -> Self {
        Self {
            allow_origin: "*".to_owned(),
            allowed_methods: vec!["GET".to_owned(), "OPTIONS".to_owned()],
            allowed_headers: vec!["Content-Type".to_owned()],
        }
    }

    fn apply(&self, response: &mut Response) {
        response.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        response.set_header("Access-Control-Allow-Methods", self.allowed_methods.join(", "));
        response.set_header("Access-Control-Allow-Headers", self.allowed_headers.join(", "));
    }
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::permissive()
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let policy = self.clone();
        Box::pin(async move {
            let mut response = if ctx.request().method() == &Method::Options {
                Response::new(StatusCode::NoContent)
            } else {
                next.run(ctx).await
            };
            policy.apply(&mut response);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::middleware::Pipeline;
    use crate::router::Router;

    fn request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn pipeline() -> Pipeline {
        let mut router = Router::new();
        router.get("/api/calendar/genres", |_ctx: Context| async {
            Response::new(StatusCode::Ok).body("[]")
        });
        Pipeline::new(router).layer(CorsMiddleware::permissive())
    }

    fn assert_cors(res: &Response) {
        assert_eq!(res.headers().get("access-control-allow-origin"), Some("*"));
        assert_eq!(res.headers().get("access-control-allow-methods"), Some("GET, OPTIONS"));
        assert_eq!(res.headers().get("access-control-allow-headers"), Some("Content-Type"));
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_204() {
        let res = pipeline().handle(request("OPTIONS", "/anything")).await;
        assert_eq!(res.status(), StatusCode::NoContent);
        assert!(res.body_bytes().is_empty());
        assert_cors(&res);
    }

    #[tokio::test]
    async fn headers_on_success_and_failure() {
        let ok = pipeline().handle(request("GET", "/api/calendar/genres")).await;
        assert_eq!(ok.status(), StatusCode::Ok);
        assert_cors(&ok);

        let missing = pipeline().handle(request("GET", "/nope")).await;
        assert_eq!(missing.status(), StatusCode::NotFound);
        assert_cors(&missing);

        let wrong_method = pipeline().handle(request("POST", "/api/calendar/genres")).await;
        assert_eq!(wrong_method.status(), StatusCode::MethodNotAllowed);
        assert_cors(&wrong_method);
    }
}
