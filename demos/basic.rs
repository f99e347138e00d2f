//! stackwrap example: a context carrier, a few middlewares and a hyper server.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl -H 'x-forwarded-for: 203.0.113.9' http://localhost:3000/
//!   curl -H 'x-forwarded-for: garbage'     http://localhost:3000/
//!   curl 'http://localhost:3000/?name=<script>'
//!   curl http://localhost:3000/missing

use std::cell::Cell;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use http::{HeaderMap, HeaderValue, StatusCode, header};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use stackwrap::middleware::{EscapeHtml, Peek};
use stackwrap::{
    BoxedHandler, Contexter, Handler, HyperService, LogTracer, NextHandler, Request, ResponseWriter, Slot,
    Stack, StackConfig, Wrapper, handler_fn, next_handler, unsupported_getter, unsupported_setter,
};
use tokio::net::TcpListener;
use tracing::{error, info};

// ── Context carrier ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct UserIp(IpAddr);

#[derive(Debug, Clone)]
struct RequestError(String);

/// Carries the client address, or the reason it could not be determined.
struct AppCtx<'a> {
    w: &'a mut dyn ResponseWriter,
    user_ip: Option<UserIp>,
    err: Option<RequestError>,
}

impl ResponseWriter for AppCtx<'_> {
    fn headers(&mut self) -> &mut HeaderMap { self.w.headers() }
    fn write_header(&mut self, status: StatusCode) { self.w.write_header(status) }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.w.write(buf) }
    fn as_contexter(&mut self) -> Option<&mut dyn Contexter> { Some(self) }
}

impl Contexter for AppCtx<'_> {
    fn response_writer(&mut self) -> &mut dyn ResponseWriter {
        &mut *self.w
    }

    fn context(&mut self, slot: &mut dyn Slot) -> bool {
        if let Some(s) = slot.downcast::<UserIp>() {
            *s = self.user_ip;
            return s.is_some();
        }
        if let Some(s) = slot.downcast::<RequestError>() {
            s.clone_from(&self.err);
            return s.is_some();
        }
        unsupported_getter(slot)
    }

    fn set_context(&mut self, slot: &mut dyn Slot) {
        if let Some(s) = slot.downcast::<UserIp>() {
            self.user_ip = s.take();
            return;
        }
        if let Some(s) = slot.downcast::<RequestError>() {
            self.err = s.take();
            return;
        }
        unsupported_setter(slot)
    }
}

struct WithAppCtx;

impl Wrapper for WithAppCtx {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(move |w: &mut dyn ResponseWriter, req: &Request| {
            let mut ctx = AppCtx { w, user_ip: None, err: None };
            next.serve(&mut ctx, req);
        })
    }

    fn provides_context(&self) -> bool { true }
}

// ── Middlewares ───────────────────────────────────────────────────────────────

/// Stores the client IP, preferring `x-forwarded-for` set by a proxy.
struct SetUserIp;

impl NextHandler for SetUserIp {
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
        if let Some(ctx) = w.as_contexter() {
            match user_ip(req) {
                Ok(ip) => ctx.set(UserIp(ip)),
                Err(e) => ctx.set(e),
            }
        }
        next.serve(w, req);
    }

    fn validate_context(&self, ctx: &mut dyn Contexter) {
        ctx.set(UserIp(IpAddr::from([127, 0, 0, 1])));
        ctx.set(RequestError(String::new()));
    }
}

fn user_ip(req: &Request) -> Result<IpAddr, RequestError> {
    if let Some(fwd) = req.header("x-forwarded-for") {
        let first = fwd.split(',').next().unwrap_or_default().trim();
        return first.parse().map_err(|_| RequestError(format!("userip: {first:?} is not an IP")));
    }
    req.remote_addr()
        .map(|a| a.ip())
        .ok_or_else(|| RequestError("userip: no remote address".into()))
}

/// Answers `400` with the stored error instead of calling the rest of the stack.
struct HandleError;

impl NextHandler for HandleError {
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
        let err = w.as_contexter().and_then(|ctx| ctx.get::<RequestError>());
        if let Some(RequestError(msg)) = err {
            w.write_header(StatusCode::BAD_REQUEST);
            let _ = w.write_all(msg.as_bytes());
            return;
        }
        next.serve(w, req);
    }

    fn validate_context(&self, ctx: &mut dyn Contexter) {
        ctx.get::<RequestError>();
    }
}

/// Replaces the body of every `404` with a page of its own.
struct NotFoundPage;

impl NextHandler for NotFoundPage {
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
        let replaced = Cell::new(false);
        let mut peek = Peek::new(w, |p| {
            if p.status() != Some(StatusCode::NOT_FOUND) {
                p.flush_missing();
                return true;
            }
            let out = p.inner();
            out.headers().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            out.write_header(StatusCode::NOT_FOUND);
            let _ = out.write_all(b"nothing here\n");
            replaced.set(true);
            false
        });
        next.serve(&mut peek, req);
        if !replaced.get() {
            peek.flush_missing();
        }
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

fn app(w: &mut dyn ResponseWriter, req: &Request) {
    if req.path() != "/" {
        w.write_header(StatusCode::NOT_FOUND);
        let _ = w.write_all(b"not found");
        return;
    }

    let ip = w.as_contexter().and_then(|ctx| ctx.get::<UserIp>());
    let name = req
        .uri()
        .query()
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("name=")))
        .unwrap_or("stranger");

    w.headers().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    let mut html = EscapeHtml::new(w);
    let _ = html.write_all(format!("hello {name}").as_bytes());
    if let Some(UserIp(ip)) = ip {
        let _ = html.write_all(format!(" from {ip}").as_bytes());
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let trace = std::env::var_os("STACKWRAP_TRACE").is_some();
    let stack = Stack::new()
        .config(StackConfig::new().trace(trace).tracer(LogTracer::stdout().prefix("[basic]")))
        .with(WithAppCtx)
        .with(next_handler(SetUserIp))
        .with(next_handler(HandleError))
        .with(next_handler(NotFoundPage))
        .with(handler_fn(app));

    stack.validate()?;
    let handler = stack.build();

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!(addr = %listener.local_addr()?, "basic listening");

    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let svc = HyperService::new(Arc::clone(&handler)).with_remote_addr(remote_addr);
                let io = TokioIo::new(stream);
                tasks.spawn(async move {
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    info!("basic stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
