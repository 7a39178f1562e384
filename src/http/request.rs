//! HTTP/1.1 request parsing using the [`httparse`] crate.

use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("request path is not valid UTF-8 once decoded")]
    InvalidPath,
}

/// A parsed HTTP/1.1 request head.
///
/// The gateway never reads request bodies; [`Request::content_length`] is only
/// consulted so the connection loop can skip past a body a client sent anyway.
///
/// # Examples
///
/// ```
/// use calgate::http::request::Request;
///
/// let raw = b"GET /api/calendar/event/%34%32?x=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/api/calendar/event/42");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parse a request head from `buf`.
    ///
    /// Returns the request and the offset at which its body begins (right after
    /// the `\r\n\r\n` terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the head has not fully arrived yet.
    /// - [`RequestError::Parse`] if the bytes are not valid HTTP/1.x.
    /// - [`RequestError::MissingField`] if httparse reports a complete head
    ///   without method, path, or version.
    /// - [`RequestError::InvalidPath`] if the percent-decoded path is not UTF-8.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(m) => m,
            Err(never) => match never {},
        };

        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        // Routing sees the decoded path; the query string is never consulted.
        let raw_path = target.split_once('?').map_or(target, |(p, _)| p);
        let path = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| RequestError::InvalidPath)?
            .into_owned();

        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The percent-decoded request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only with an explicit
    /// `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// The declared body length, `0` when the header is absent.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidContentLength`] if the header is not a decimal number.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        match self.headers.get("content-length") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| RequestError::InvalidContentLength),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET /api/calendar/genres HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/api/calendar/genres");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn path_is_percent_decoded_and_query_dropped() {
        let (req, _) =
            Request::parse(b"GET /api/calendar/event/%34%32?show=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/api/calendar/event/42");

        let (spaced, _) = Request::parse(b"GET /a%20b HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(spaced.path(), "/a b");

        assert!(matches!(
            Request::parse(b"GET /%ff HTTP/1.1\r\n\r\n"),
            Err(RequestError::InvalidPath)
        ));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let raw = b"\x01\x02 nonsense\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        let (v11, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(v11.is_keep_alive());

        let (v10, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!v10.is_keep_alive());

        let (closing, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!closing.is_keep_alive());
    }

    #[test]
    fn content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length().unwrap(), 5);
        assert_eq!(&raw[body_offset..], b"hello");

        let (bad, _) = Request::parse(b"POST / HTTP/1.1\r\nContent-Length: x\r\n\r\n").unwrap();
        assert!(matches!(
            bad.content_length(),
            Err(RequestError::InvalidContentLength)
        ));
    }
}
