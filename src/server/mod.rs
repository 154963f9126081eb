//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function. Supports persistent connections and streamed (chunked) response
//! bodies. While a request is in flight the connection keeps watching the
//! socket: if the peer hangs up, the request's cancellation token fires so the
//! handler can abandon its upstream work.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::http::response::{LAST_CHUNK, encode_chunk};
use crate::http::{
    Body, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Service;

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

/// The relay's HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use chatrelay::server::Server;
/// use chatrelay::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8787").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("up")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
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
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves a finished router until `shutdown` is cancelled.
    pub async fn serve(
        self,
        service: Service,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let handler = move |req: Request| {
            let service = service.clone();
            async move { service.route(req).await }
        };
        tokio::select! {
            res = self.run(handler) => res,
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                Ok(())
            }
        }
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler is shared across all spawned Tokio tasks, so it must be
    /// `Send + Sync + 'static`. Runs until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "chatrelay listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// What became of a response once we tried to deliver it.
enum Delivery {
    Written,
    PeerGone,
}

/// Handles a single TCP connection over its lifetime.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Only read when the buffer holds no complete request yet.
        let parsed = match Request::parse(&buf) {
            Ok(pair) => Some(pair),
            Err(RequestError::Incomplete) => None,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                write_response(&mut stream, &mut buf, response, &CancellationToken::new()).await?;
                break;
            }
        };

        // A declared body we would never accept is refused before it is read.
        let ready = match parsed {
            Some((request, offset)) => {
                let total = offset.saturating_add(request.content_length().unwrap_or(0));
                if total > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "declared body too large, sending 413");
                    let response = payload_too_large();
                    write_response(&mut stream, &mut buf, response, &CancellationToken::new())
                        .await?;
                    break;
                }
                (buf.len() >= total).then_some((request, total))
            }
            None => None,
        };

        let Some((request, total)) = ready else {
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large — sending 413");
                let response = payload_too_large();
                write_response(&mut stream, &mut buf, response, &CancellationToken::new()).await?;
                break;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            continue;
        };

        let _ = buf.split_to(total);

        let keep_alive = request.is_keep_alive();
        let cancel = request.cancellation().clone();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        // Race the handler against the peer hanging up.
        let mut pending = pin!(handler(request));
        let mut peer_open = true;
        let response = loop {
            tokio::select! {
                response = &mut pending => break response,
                read = stream.read_buf(&mut buf), if peer_open => {
                    if matches!(read, Ok(0) | Err(_)) {
                        debug!(peer = %peer_addr, "peer left before the response was ready");
                        peer_open = false;
                        cancel.cancel();
                    } else if buf.len() > MAX_REQUEST_SIZE {
                        warn!(peer = %peer_addr, "pipelined input too large, dropping connection");
                        peer_open = false;
                        cancel.cancel();
                    }
                }
            }
        };

        if !peer_open {
            debug!(peer = %peer_addr, status = %response.status(), "response discarded");
            break;
        }

        let response = response.keep_alive(keep_alive);
        let delivery = write_response(&mut stream, &mut buf, response, &cancel).await?;
        if let Delivery::PeerGone = delivery {
            debug!(peer = %peer_addr, "peer left mid-stream");
            break;
        }

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

fn payload_too_large() -> Response {
    Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false)
}

/// Writes `response` to the socket.
///
/// Streamed bodies are written chunk by chunk while the socket is watched for
/// a hang-up; when the peer leaves, `cancel` fires and the body stream is
/// dropped, which tears down whatever is producing it.
async fn write_response(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    response: Response,
    cancel: &CancellationToken,
) -> Result<Delivery, std::io::Error> {
    let (head, body) = response.into_parts();
    stream.write_all(&head).await?;

    match body {
        Body::Full(bytes) => {
            stream.write_all(&bytes).await?;
        }
        Body::Stream(mut chunks) => {
            stream.flush().await?;
            loop {
                tokio::select! {
                    chunk = chunks.next() => match chunk {
                        Some(chunk) if chunk.is_empty() => {}
                        Some(chunk) => {
                            if stream.write_all(&encode_chunk(&chunk)).await.is_err() {
                                cancel.cancel();
                                return Ok(Delivery::PeerGone);
                            }
                            stream.flush().await?;
                        }
                        None => break,
                    },
                    read = stream.read_buf(buf) => {
                        if matches!(read, Ok(0) | Err(_)) || buf.len() > MAX_REQUEST_SIZE {
                            cancel.cancel();
                            return Ok(Delivery::PeerGone);
                        }
                    }
                }
            }
            stream.write_all(LAST_CHUNK).await?;
        }
    }

    stream.flush().await?;
    Ok(Delivery::Written)
}
