//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function, one Tokio task per connection. Persistent connections are
//! supported and bounded by three listener timeouts (see [`Timeouts`]).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Per-connection time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// From the first byte of a request until it has fully arrived.
    pub read: Duration,
    /// From a complete request until its response has been written.
    pub write: Duration,
    /// How long a keep-alive connection may sit between requests.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            write: Duration::from_secs(15),
            idle: Duration::from_secs(30),
        }
    }
}

/// The gateway's HTTP listener.
///
/// # Examples
///
/// ```rust,no_run
/// use calgate::server::Server;
/// use calgate::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:3000").await?;
///     server
///         .run(|_req: Request| async { Response::new(StatusCode::Ok) }, async {
///             let _ = tokio::signal::ctrl_c().await;
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    timeouts: Timeouts,
}

impl Server {
    /// Binds the server to the given TCP address with default [`Timeouts`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            timeouts: Timeouts::default(),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` resolves.
    ///
    /// Connections already being served keep running on their own tasks after
    /// the accept loop stops; they end at their next keep-alive boundary or
    /// timeout.
    ///
    /// # Errors
    ///
    /// Currently only returns `Ok`; accept failures are logged and retried.
    pub async fn run<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        let timeouts = self.timeouts;
        info!(address = %self.local_addr, "listening");

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, timeouts).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        Ok(())
    }
}

/// Serves one TCP connection, one request per loop iteration, until the peer
/// closes it, asks for `Connection: close`, or a timeout fires.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    timeouts: Timeouts,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // Set when the first byte of the current request arrives.
    let mut read_deadline: Option<Instant> = None;
    // Cleared while `buf` may already hold a whole pipelined request.
    let mut needs_read = true;

    loop {
        if needs_read {
            let read = stream.read_buf(&mut buf);
            let bytes_read = match read_deadline {
                Some(deadline) => match timeout_at(deadline, read).await {
                    Ok(res) => res?,
                    Err(_) => {
                        debug!(peer = %peer_addr, "read timeout");
                        break;
                    }
                },
                None => match timeout(timeouts.idle, read).await {
                    Ok(res) => res?,
                    Err(_) => {
                        debug!(peer = %peer_addr, "idle timeout");
                        break;
                    }
                },
            };

            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            if read_deadline.is_none() {
                read_deadline = Some(Instant::now() + timeouts.read);
            }
        }
        needs_read = true;

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::text(StatusCode::PayloadTooLarge, "Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let parsed = Request::parse(&buf).and_then(|(request, body_offset)| {
            // Saturates so an absurd Content-Length lands in the 413 branch below.
            let total = body_offset.saturating_add(request.content_length()?);
            Ok((request, total))
        });
        let (request, total_needed) = match parsed {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::text(StatusCode::BadRequest, "Bad Request")
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        if total_needed > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "declared body too large, sending 413");
            let response = Response::text(StatusCode::PayloadTooLarge, "Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let respond = async {
            let response = handler(request).await.keep_alive(keep_alive);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await
        };
        match timeout(timeouts.write, respond).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(peer = %peer_addr, "write timeout, closing connection");
                break;
            }
        }

        let _ = buf.split_to(total_needed);
        if buf.is_empty() {
            read_deadline = None;
        } else {
            // Pipelined bytes of the next request are already here.
            read_deadline = Some(Instant::now() + timeouts.read);
            needs_read = false;
        }

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::sync::oneshot;

    async fn spawn_echo(timeouts: Timeouts) -> (SocketAddr, oneshot::Sender<()>) {
        let server = Server::bind("127.0.0.1:0").await.unwrap().with_timeouts(timeouts);
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(server.run(
            |req: Request| async move { Response::new(StatusCode::Ok).body(req.path().to_owned()) },
            async {
                let _ = rx.await;
            },
        ));
        (addr, tx)
    }

    async fn read_response(stream: &mut tokio::io::BufReader<TcpStream>) -> (String, String) {
        let mut status = String::new();
        stream.read_line(&mut status).await.unwrap();
        let mut len = 0usize;
        loop {
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            if line == "\r\n" {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length: ") {
                len = v.trim().parse().unwrap();
            }
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();
        (status, String::from_utf8(body).unwrap())
    }

    #[tokio::test]
    async fn keep_alive_serves_several_requests() {
        let (addr, _stop) = spawn_echo(Timeouts::default()).await;
        let mut stream = tokio::io::BufReader::new(TcpStream::connect(addr).await.unwrap());

        for path in ["/a", "/b"] {
            let req = format!("GET {path} HTTP/1.1\r\nHost: x\r\n\r\n");
            stream.get_mut().write_all(req.as_bytes()).await.unwrap();
            let (status, body) = read_response(&mut stream).await;
            assert_eq!(status, "HTTP/1.1 200 OK\r\n");
            assert_eq!(body, path);
        }
    }

    #[tokio::test]
    async fn pipelined_requests_are_all_answered() {
        let (addr, _stop) = spawn_echo(Timeouts::default()).await;
        let mut stream = tokio::io::BufReader::new(TcpStream::connect(addr).await.unwrap());
        stream
            .get_mut()
            .write_all(
                b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n\
                  GET /b HTTP/1.1\r\nHost: x\r\n\r\n\
                  GET /c HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let answered = tokio::time::timeout(Duration::from_secs(1), async {
            let mut bodies = Vec::new();
            for _ in 0..3 {
                let (status, body) = read_response(&mut stream).await;
                assert_eq!(status, "HTTP/1.1 200 OK\r\n");
                bodies.push(body);
            }
            bodies
        })
        .await
        .expect("all pipelined requests answered before the read timeout");
        assert_eq!(answered, ["/a", "/b", "/c"]);

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn overflowing_content_length_gets_413() {
        let (addr, _stop) = spawn_echo(Timeouts::default()).await;
        let mut stream = tokio::io::BufReader::new(TcpStream::connect(addr).await.unwrap());
        let req = format!(
            "POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            usize::MAX
        );
        stream.get_mut().write_all(req.as_bytes()).await.unwrap();

        let (status, _) = read_response(&mut stream).await;
        assert_eq!(status, "HTTP/1.1 413 Payload Too Large\r\n");
        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let (addr, _stop) = spawn_echo(Timeouts::default()).await;
        let mut stream = tokio::io::BufReader::new(TcpStream::connect(addr).await.unwrap());
        stream.get_mut().write_all(b"\x01 nonsense\r\n\r\n").await.unwrap();
        let (status, _) = read_response(&mut stream).await;
        assert_eq!(status, "HTTP/1.1 400 Bad Request\r\n");

        let mut rest = Vec::new();
        assert_eq!(stream.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_connection_is_closed() {
        let timeouts = Timeouts {
            idle: Duration::from_millis(50),
            ..Timeouts::default()
        };
        let (addr, _stop) = spawn_echo(timeouts).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
            .await
            .expect("server should hang up")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let (addr, stop) = spawn_echo(Timeouts::default()).await;
        stop.send(()).unwrap();
        // Give the accept loop a moment to observe the signal and drop the listener.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
