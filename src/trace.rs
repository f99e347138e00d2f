//! Per-link tracing of a stack.
//!
//! When a [`Stack`](crate::Stack) is built with tracing enabled, every link is
//! wrapped in a decorator that reports the request, the object behind the
//! link and its [`Role`] to a [`Tracer`] before delegating. The decision is
//! taken once, at build time; a stack built without tracing pays nothing.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::wrapper::Role;

/// Receives one report per stack link a request passes through.
pub trait Tracer: Send + Sync + 'static {
    fn trace(&self, req: &Request, object: &'static str, role: Role);
}

// ── LogTracer ─────────────────────────────────────────────────────────────────

/// Writes one line per link to an output stream:
///
/// ```text
/// <prefix> [<http-date>] <method> <path> <type> as <role>
/// ```
///
/// The date is present when timestamps are enabled (the default).
pub struct LogTracer {
    out: Mutex<Box<dyn Write + Send>>,
    prefix: String,
    timestamp: bool,
}

impl LogTracer {
    pub const DEFAULT_PREFIX: &'static str = "[stackwrap]";

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            prefix: Self::DEFAULT_PREFIX.to_owned(),
            timestamp: true,
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    fn line(&self, req: &Request, object: &str, role: Role) -> String {
        let mut line = self.prefix.clone();
        if self.timestamp {
            line.push(' ');
            line.push_str(&httpdate::fmt_http_date(SystemTime::now()));
        }
        line.push_str(&format!(" {} {} {object} as {role}\n", req.method(), req.path()));
        line
    }
}

impl Default for LogTracer {
    fn default() -> Self { Self::stdout() }
}

impl Tracer for LogTracer {
    fn trace(&self, req: &Request, object: &'static str, role: Role) {
        let line = self.line(req, object, role);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|()| out.flush()) {
            warn!("trace output failed: {e}");
        }
    }
}

// ── TracingTracer ─────────────────────────────────────────────────────────────

/// Reports links as `tracing` debug events on the `stackwrap::trace` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn trace(&self, req: &Request, object: &'static str, role: Role) {
        debug!(
            target: "stackwrap::trace",
            method = %req.method(),
            path = req.path(),
            object,
            role = role.as_str(),
            "link"
        );
    }
}

// ── Traced link ───────────────────────────────────────────────────────────────

pub(crate) struct Traced {
    object: &'static str,
    role: Role,
    tracer: Arc<dyn Tracer>,
    inner: BoxedHandler,
}

impl Traced {
    pub(crate) fn new(object: &'static str, role: Role, tracer: Arc<dyn Tracer>, inner: BoxedHandler) -> Self {
        Self { object, role, tracer, inner }
    }
}

impl Handler for Traced {
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request) {
        self.tracer.trace(req, self.object, self.role);
        self.inner.serve(w, req);
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};

    use super::*;

    #[test]
    fn line_without_timestamp() {
        let tracer = LogTracer::new(io::sink()).prefix("[test]").timestamp(false);
        let req = Request::new(Method::POST, Uri::from_static("/users?x=1"));
        assert_eq!(tracer.line(&req, "app::Auth", Role::NextHandler), "[test] POST /users app::Auth as NextHandler\n");
    }

    #[test]
    fn line_with_timestamp_keeps_the_prefix_first() {
        let tracer = LogTracer::new(io::sink());
        let req = Request::new(Method::GET, Uri::from_static("/"));
        let line = tracer.line(&req, "app::Auth", Role::Wrapper);
        assert!(line.starts_with("[stackwrap] "));
        assert!(line.contains(" GMT GET / "));
        assert!(line.ends_with("app::Auth as Wrapper\n"));
    }

    #[test]
    fn tracing_tracer_emits_events() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).finish();
        tracing::subscriber::with_default(subscriber, || {
            let req = Request::new(Method::GET, Uri::from_static("/"));
            TracingTracer.trace(&req, "app::Auth", Role::HandlerFn);
        });
    }
}
