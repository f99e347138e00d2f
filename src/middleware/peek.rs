use std::io;
use std::panic::panic_any;

use http::{HeaderMap, StatusCode};

use crate::context::Contexter;
use crate::error::Error;
use crate::response::ResponseWriter;

use super::{copy_headers, is_ok};

/// Decides, right before the first body write, whether the body may pass.
///
/// It may inspect the cached headers and status of the [`Peek`] and is
/// responsible for sending them on, e.g. with [`Peek::flush_missing`], or for
/// writing something else straight to [`Peek::inner`].
pub type Proceed<'a> = Box<dyn FnMut(&mut Peek<'a>) -> bool + 'a>;

/// Caches headers and status, and gates the body behind a [`Proceed`] decision.
///
/// ```text
///   headers(), write_header()  ──► cached
///   first write()              ──► proceed(&mut peek)
///                                    true  ──► this and later writes pass through
///                                    false ──► writes return Ok(0)
/// ```
///
/// If nothing writes a body, `proceed` never runs; call
/// [`flush_missing`](Self::flush_missing) after the inner handler to make sure
/// cached headers and status still arrive.
///
/// Headers, status and body must reach the wrapped writer in that order.
/// Flushing out of order panics with [`Error::CodeFlushedBeforeHeaders`] or
/// [`Error::BodyFlushedBeforeCode`].
pub struct Peek<'a> {
    inner: &'a mut dyn ResponseWriter,
    proceed: Option<Proceed<'a>>,
    headers: HeaderMap,
    status: Option<StatusCode>,
    changed: bool,
    checked: bool,
    forbidden: bool,
    headers_written: bool,
    code_written: bool,
    body_written: bool,
}

impl<'a> Peek<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter, proceed: impl FnMut(&mut Peek<'a>) -> bool + 'a) -> Self {
        Self::with_proceed(inner, Some(Box::new(proceed)))
    }

    /// A `Peek` without a decision: every write passes through.
    pub fn passthrough(inner: &'a mut dyn ResponseWriter) -> Self {
        Self::with_proceed(inner, None)
    }

    fn with_proceed(inner: &'a mut dyn ResponseWriter, proceed: Option<Proceed<'a>>) -> Self {
        Self {
            inner,
            proceed,
            headers: HeaderMap::new(),
            status: None,
            changed: false,
            checked: false,
            forbidden: false,
            headers_written: false,
            code_written: false,
            body_written: false,
        }
    }

    /// The cached status code.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    /// The cached headers, without counting as a change.
    pub fn cached_headers(&self) -> &HeaderMap { &self.headers }

    /// `true` if no status was set or the status is `2xx`.
    pub fn is_ok(&self) -> bool {
        is_ok(self.status)
    }

    /// Whether headers were accessed, a status was set or body bytes passed through.
    pub fn has_changed(&self) -> bool { self.changed }

    /// The wrapped writer.
    pub fn inner(&mut self) -> &mut dyn ResponseWriter {
        &mut *self.inner
    }

    /// Back to the freshly created state. The `proceed` decision is kept and
    /// runs again on the next write.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.status = None;
        self.changed = false;
        self.checked = false;
        self.forbidden = false;
        self.headers_written = false;
        self.code_written = false;
        self.body_written = false;
    }

    /// Copies the cached headers onto the wrapped writer, once.
    ///
    /// # Panics
    ///
    /// With [`Error::CodeFlushedBeforeHeaders`] if the status was already
    /// flushed, or [`Error::BodyFlushedBeforeCode`] if body bytes already
    /// passed through.
    pub fn flush_headers(&mut self) {
        if self.headers_written {
            return;
        }
        if self.code_written {
            panic_any(Error::CodeFlushedBeforeHeaders);
        }
        if self.body_written {
            panic_any(Error::BodyFlushedBeforeCode);
        }
        copy_headers(&self.headers, self.inner.headers());
        self.headers_written = true;
    }

    /// Sets the cached status on the wrapped writer, once, if there is one.
    ///
    /// # Panics
    ///
    /// With [`Error::BodyFlushedBeforeCode`] if body bytes already passed through.
    pub fn flush_code(&mut self) {
        if self.code_written {
            return;
        }
        if self.body_written {
            panic_any(Error::BodyFlushedBeforeCode);
        }
        if let Some(status) = self.status {
            self.inner.write_header(status);
            self.code_written = true;
        }
    }

    /// Flushes headers and status unless the status or the body already went out.
    pub fn flush_missing(&mut self) {
        if self.body_written || self.code_written {
            return;
        }
        self.flush_headers();
        self.flush_code();
    }
}

impl ResponseWriter for Peek<'_> {
    fn headers(&mut self) -> &mut HeaderMap {
        self.changed = true;
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.changed = true;
        self.status = Some(status);
    }

    /// Runs `proceed` on the first call. Returns `Ok(0)` without writing if it
    /// said no.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.checked {
            if let Some(mut proceed) = self.proceed.take() {
                self.forbidden = !proceed(self);
                self.proceed = Some(proceed);
            }
            self.checked = true;
        }
        if self.forbidden {
            return Ok(0);
        }
        self.body_written = true;
        self.changed = true;
        self.inner.write(buf)
    }

    fn as_contexter(&mut self) -> Option<&mut dyn Contexter> {
        self.inner.as_contexter()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use http::HeaderValue;

    use super::*;
    use crate::recorder::Recorder;

    fn panic_error(f: impl FnOnce()) -> Error {
        let payload = catch_unwind(AssertUnwindSafe(f)).expect_err("expected a panic");
        payload.downcast::<Error>().map(|e| *e).expect("payload is an Error")
    }

    #[test]
    fn ok_status_passes_body_through() {
        let mut rec = Recorder::new();
        let mut peek = Peek::new(&mut rec, |p| {
            p.flush_missing();
            p.is_ok()
        });
        peek.headers().insert("x", HeaderValue::from_static("1"));
        peek.write_header(StatusCode::CREATED);
        peek.write_all(b"made").unwrap();
        peek.write_all(b" it").unwrap();

        assert!(peek.has_changed());
        drop(peek);
        assert_eq!(rec.header("x"), Some("1"));
        assert_eq!(rec.code(), Some(StatusCode::CREATED));
        assert_eq!(rec.body(), b"made it");
    }

    #[test]
    fn refused_body_is_not_written() {
        let mut rec = Recorder::new();
        let mut peek = Peek::new(&mut rec, |p| {
            if p.is_ok() {
                p.flush_missing();
                return true;
            }
            p.inner().write_header(StatusCode::NOT_FOUND);
            p.inner().write_all(b"custom 404").unwrap();
            false
        });
        peek.write_header(StatusCode::NOT_FOUND);
        assert_eq!(peek.write(b"original").unwrap(), 0);
        assert_eq!(peek.write(b"again").unwrap(), 0);
        assert_eq!(peek.write_all(b"x").unwrap_err().kind(), io::ErrorKind::WriteZero);
        drop(peek);

        assert_eq!(rec.code(), Some(StatusCode::NOT_FOUND));
        assert_eq!(rec.body(), b"custom 404");
    }

    #[test]
    fn proceed_runs_once_and_again_after_reset() {
        let mut calls = 0;
        let mut rec = Recorder::new();
        {
            let mut peek = Peek::new(&mut rec, |_| {
                calls += 1;
                true
            });
            peek.write_all(b"a").unwrap();
            peek.write_all(b"b").unwrap();
            peek.reset();
            peek.write_all(b"c").unwrap();
        }
        assert_eq!(calls, 2);
        assert_eq!(rec.body(), b"abc");
    }

    #[test]
    fn flush_missing_without_body() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        peek.headers().insert("x", HeaderValue::from_static("1"));
        peek.write_header(StatusCode::NO_CONTENT);
        peek.flush_missing();
        peek.flush_missing();
        drop(peek);

        assert_eq!(rec.header("x"), Some("1"));
        assert_eq!(rec.code(), Some(StatusCode::NO_CONTENT));
    }

    #[test]
    fn untouched_peek_is_unchanged() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        assert!(peek.is_ok());
        assert!(!peek.has_changed());
        assert_eq!(peek.status(), None);
        peek.flush_missing();
        drop(peek);
        assert_eq!(rec.code(), None);
    }

    #[test]
    fn code_after_body_panics() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        peek.write_header(StatusCode::ACCEPTED);
        peek.write_all(b"body").unwrap();
        assert_eq!(panic_error(|| peek.flush_code()), Error::BodyFlushedBeforeCode);
    }

    #[test]
    fn headers_after_code_panics() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        peek.write_header(StatusCode::ACCEPTED);
        peek.flush_code();
        assert_eq!(panic_error(|| peek.flush_headers()), Error::CodeFlushedBeforeHeaders);
    }

    #[test]
    fn headers_after_body_panics() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        peek.write_all(b"body").unwrap();
        assert_eq!(panic_error(|| peek.flush_headers()), Error::BodyFlushedBeforeCode);
    }

    #[test]
    fn repeated_flushes_are_ignored() {
        let mut rec = Recorder::new();
        let mut peek = Peek::passthrough(&mut rec);
        peek.write_header(StatusCode::ACCEPTED);
        peek.flush_headers();
        peek.flush_code();
        peek.write_all(b"body").unwrap();
        peek.flush_headers();
        peek.flush_code();
        drop(peek);
        assert_eq!(rec.code(), Some(StatusCode::ACCEPTED));
        assert_eq!(rec.body(), b"body");
    }
}
