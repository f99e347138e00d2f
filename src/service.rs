//! Serving a composed handler with hyper.
//!
//! [`HyperService`] turns a [`BoxedHandler`] into a
//! [`hyper::service::Service`]. Bind it to connections however you like; the
//! crate has no listener of its own. A minimal accept loop with
//! `hyper-util`:
//!
//! ```rust,no_run
//! # async fn run(handler: stackwrap::BoxedHandler) -> std::io::Result<()> {
//! use hyper_util::rt::{TokioExecutor, TokioIo};
//! use hyper_util::server::conn::auto::Builder;
//! use stackwrap::HyperService;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! loop {
//!     let (stream, peer) = listener.accept().await?;
//!     let svc = HyperService::new(handler.clone()).with_remote_addr(peer);
//!     tokio::spawn(async move {
//!         let _ = Builder::new(TokioExecutor::new())
//!             .serve_connection_with_upgrades(TokioIo::new(stream), svc)
//!             .await;
//!     });
//! }
//! # }
//! ```
//!
//! The handler runs synchronously once the request body is collected, and
//! the response is buffered until it returns.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::upgrade::OnUpgrade;
use tracing::{error, warn};

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::{Hijacker, ResponseWriter};

/// A [`hyper::service::Service`] serving every request with one handler.
#[derive(Clone)]
pub struct HyperService {
    handler: BoxedHandler,
    remote_addr: Option<SocketAddr>,
}

impl HyperService {
    pub fn new(handler: BoxedHandler) -> Self {
        Self { handler, remote_addr: None }
    }

    /// Peer address handed to every [`Request`] served by this instance.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl fmt::Debug for HyperService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperService").field("remote_addr", &self.remote_addr).finish_non_exhaustive()
    }
}

impl<B> hyper::service::Service<http::Request<B>> for HyperService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: fmt::Display + Send,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, mut req: http::Request<B>) -> Self::Future {
        let handler = self.handler.clone();
        let remote_addr = self.remote_addr;
        let on_upgrade = hyper::upgrade::on(&mut req);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    error!(path = parts.uri.path(), "failed to read request body: {e}");
                    let mut res = http::Response::new(Full::new(Bytes::new()));
                    *res.status_mut() = StatusCode::BAD_REQUEST;
                    return Ok(res);
                }
            };

            let req = Request::from_parts(parts, body, remote_addr);
            let mut w = HyperWriter::new(on_upgrade);
            handler.serve(&mut w, &req);
            Ok(w.into_response())
        })
    }
}

// ── HyperWriter ───────────────────────────────────────────────────────────────

/// Buffers the response of one request.
struct HyperWriter {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
    on_upgrade: Option<OnUpgrade>,
}

impl HyperWriter {
    fn new(on_upgrade: OnUpgrade) -> Self {
        Self { headers: HeaderMap::new(), status: None, body: BytesMut::new(), on_upgrade: Some(on_upgrade) }
    }

    fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }
}

impl ResponseWriter for HyperWriter {
    fn headers(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        match self.status {
            Some(current) => warn!(%current, ignored = %status, "superfluous write_header call"),
            None => self.status = Some(status),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> {
        Some(self)
    }
}

impl Hijacker for HyperWriter {
    fn hijack(&mut self) -> Option<OnUpgrade> {
        self.on_upgrade.take()
    }
}
