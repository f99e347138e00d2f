//! The response sink every handler writes to, its optional capabilities, and
//! the reclamation helpers that reach those capabilities through decorators.
//!
//! # Capabilities and decorators
//!
//! A sink may be able to do more than set headers, a status and a body: flush
//! buffered bytes, hand over the connection, or notify when the peer goes
//! away. Those extras are discovered through the `as_*` methods, which return
//! `None` unless a writer opts in.
//!
//! Decorators such as [`Buffer`](crate::middleware::Buffer) only forward
//! [`ResponseWriter::as_contexter`]. Every other capability is hidden behind
//! them. When a context carrier sits at the top of the stack, the helpers
//! below ask it for the sink it wraps ([`reclaim`]) and use that instead:
//!
//! ```text
//! raw sink (Flusher) ← carrier (Contexter) ← Buffer ← handler calls flush(w)
//!                         └── reclaim(w, f) ───────────┘
//! ```
//!
//! Reclamation goes exactly one level deep. A carrier wrapped in another
//! carrier reclaims to the inner carrier, not to the raw sink.

use std::io;

use http::{HeaderMap, StatusCode};
use hyper::upgrade::OnUpgrade;
use tokio::sync::watch;

use crate::context::Contexter;

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// A byte-oriented response sink.
///
/// Header changes must happen before [`write_header`](Self::write_header),
/// and the status before the first [`write`](Self::write); what a writer does
/// with late changes is up to the writer.
pub trait ResponseWriter {
    /// The header map that will be sent with the response.
    fn headers(&mut self) -> &mut HeaderMap;

    /// Sets the status code.
    fn write_header(&mut self, status: StatusCode);

    /// Writes body bytes, returning how many were accepted.
    ///
    /// `Ok(0)` on a non-empty buffer means the writer no longer accepts body
    /// bytes.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes the whole buffer, failing with [`io::ErrorKind::WriteZero`] if the
    /// writer stops accepting bytes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn as_contexter(&mut self) -> Option<&mut dyn Contexter> { None }
    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> { None }
    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> { None }
    fn as_close_notifier(&mut self) -> Option<&mut dyn CloseNotifier> { None }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Sends any buffered data to the client.
pub trait Flusher {
    fn flush(&mut self);
}

/// Takes over the underlying connection.
pub trait Hijacker {
    /// The pending upgrade of the connection, `None` once it has been taken.
    fn hijack(&mut self) -> Option<OnUpgrade>;
}

/// Reports when the client goes away.
pub trait CloseNotifier {
    /// A receiver whose value flips to `true` once the connection is closed.
    fn close_notify(&mut self) -> watch::Receiver<bool>;
}

// ── Reclamation ───────────────────────────────────────────────────────────────

/// Runs `f` on the sink wrapped by `w` if `w` is (or forwards to) a context
/// carrier, and on `w` itself otherwise.
///
/// Does not recurse through nested carriers.
///
/// ```rust
/// use stackwrap::{Recorder, ResponseWriter, reclaim};
///
/// let mut rec = Recorder::new();
/// reclaim(&mut rec, |raw| raw.write_all(b"raw")).unwrap();
/// assert_eq!(rec.body(), b"raw");
/// ```
pub fn reclaim<R>(w: &mut dyn ResponseWriter, f: impl FnOnce(&mut dyn ResponseWriter) -> R) -> R {
    match w.as_contexter() {
        Some(ctx) => f(ctx.response_writer()),
        None => f(w),
    }
}

/// Address of the value behind a writer, for identity checks.
pub(crate) fn writer_addr(w: &mut dyn ResponseWriter) -> usize {
    std::ptr::from_mut(w).cast::<()>() as usize
}

/// Flushes the reclaimed sink. Returns `false` if it cannot flush.
pub fn flush(w: &mut dyn ResponseWriter) -> bool {
    reclaim(w, |raw| match raw.as_flusher() {
        Some(f) => {
            f.flush();
            true
        }
        None => false,
    })
}

/// Hijacks the connection behind the reclaimed sink.
///
/// `None` when the sink cannot be hijacked or the upgrade was already taken.
pub fn hijack(w: &mut dyn ResponseWriter) -> Option<OnUpgrade> {
    reclaim(w, |raw| raw.as_hijacker().and_then(|h| h.hijack()))
}

/// Subscribes to close notifications of the reclaimed sink.
pub fn close_notify(w: &mut dyn ResponseWriter) -> Option<watch::Receiver<bool>> {
    reclaim(w, |raw| raw.as_close_notifier().map(|c| c.close_notify()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most two bytes per call.
    #[derive(Default)]
    struct Trickle {
        headers: HeaderMap,
        body: Vec<u8>,
        interrupted: bool,
    }

    impl ResponseWriter for Trickle {
        fn headers(&mut self) -> &mut HeaderMap { &mut self.headers }
        fn write_header(&mut self, _: StatusCode) {}
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(2);
            self.body.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn write_all_retries_short_and_interrupted_writes() {
        let mut w = Trickle::default();
        w.write_all(b"hello").unwrap();
        assert_eq!(w.body, b"hello");
    }

    #[test]
    fn plain_writer_has_no_capabilities() {
        let mut w = Trickle::default();
        assert!(!flush(&mut w));
        assert!(hijack(&mut w).is_none());
        assert!(close_notify(&mut w).is_none());

        let addr = writer_addr(&mut w);
        assert_eq!(reclaim(&mut w, writer_addr), addr);
    }
}
