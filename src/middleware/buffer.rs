use std::borrow::Cow;
use std::io;

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};

use crate::context::Contexter;
use crate::response::ResponseWriter;

use super::{copy_headers, is_ok};

/// Captures a complete response in memory.
///
/// Headers, status and body written to a `Buffer` are held back until
/// [`flush_all`](Self::flush_all), which sends them to the wrapped writer in
/// that order. The body is held in memory and copied once more on flush, so
/// this is meant for small responses, e.g. to retry an inner handler after an
/// error status:
///
/// ```rust
/// use stackwrap::middleware::Buffer;
/// use stackwrap::{Handler, Recorder, Request, ResponseWriter};
///
/// fn retry_once(inner: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
///     let mut buf = Buffer::new(w);
///     inner.serve(&mut buf, req);
///     if !buf.is_ok() {
///         buf.reset();
///         inner.serve(&mut buf, req);
///     }
///     buf.flush_all().ok();
/// }
/// ```
pub struct Buffer<'a> {
    inner: &'a mut dyn ResponseWriter,
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
    changed: bool,
}

impl<'a> Buffer<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner, headers: HeaderMap::new(), status: None, body: BytesMut::new(), changed: false }
    }

    /// The cached status code.
    pub fn status(&self) -> Option<StatusCode> { self.status }

    /// The cached headers. Unlike [`ResponseWriter::headers`] this does not
    /// count as a change.
    pub fn cached_headers(&self) -> &HeaderMap { &self.headers }

    pub fn body(&self) -> &[u8] { &self.body }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Whether headers were accessed, a status was set or body bytes were written.
    pub fn has_changed(&self) -> bool { self.changed }

    /// `true` if no status was set or the status is `2xx`.
    pub fn is_ok(&self) -> bool {
        is_ok(self.status)
    }

    /// The wrapped writer.
    pub fn inner(&mut self) -> &mut dyn ResponseWriter {
        &mut *self.inner
    }

    /// Forgets everything captured so far.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.status = None;
        self.body.clear();
        self.changed = false;
    }

    /// Copies the cached headers onto the wrapped writer.
    pub fn flush_headers(&mut self) {
        copy_headers(&self.headers, self.inner.headers());
    }

    /// Sets the cached status on the wrapped writer, if there is one.
    pub fn flush_code(&mut self) {
        if let Some(status) = self.status {
            self.inner.write_header(status);
        }
    }

    /// Sends headers, status and body to the wrapped writer, in that order, if
    /// anything changed.
    pub fn flush_all(&mut self) -> io::Result<()> {
        if !self.changed {
            return Ok(());
        }
        self.flush_headers();
        self.flush_code();
        self.inner.write_all(&self.body)
    }
}

impl ResponseWriter for Buffer<'_> {
    fn headers(&mut self) -> &mut HeaderMap {
        self.changed = true;
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.changed = true;
        self.status = Some(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.changed = true;
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn as_contexter(&mut self) -> Option<&mut dyn Contexter> {
        self.inner.as_contexter()
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::recorder::Recorder;

    #[test]
    fn holds_everything_back_until_flush() {
        let mut rec = Recorder::new();
        let mut buf = Buffer::new(&mut rec);
        buf.headers().insert("x", HeaderValue::from_static("1"));
        buf.write_header(StatusCode::NOT_FOUND);
        buf.write_all(b"not found").unwrap();

        assert!(!buf.is_ok());
        assert_eq!(buf.body_text(), "not found");
        assert!(buf.inner().headers().is_empty());

        buf.flush_all().unwrap();
        assert_eq!(rec.header("x"), Some("1"));
        assert_eq!(rec.code(), Some(StatusCode::NOT_FOUND));
        assert_eq!(rec.body(), b"not found");
    }

    #[test]
    fn unchanged_buffer_flushes_nothing() {
        let mut rec = Recorder::new();
        let mut buf = Buffer::new(&mut rec);
        assert!(buf.is_ok());
        assert!(!buf.has_changed());
        buf.flush_all().unwrap();
        assert_eq!(rec.code(), None);
    }

    #[test]
    fn reading_headers_counts_as_change() {
        let mut rec = Recorder::new();
        let mut buf = Buffer::new(&mut rec);
        let _ = buf.headers();
        assert!(buf.has_changed());
        buf.flush_all().unwrap();
        assert_eq!(rec.code(), None);
        assert!(rec.body().is_empty());
    }

    #[test]
    fn flush_replaces_existing_header_values() {
        let mut rec = Recorder::new();
        rec.headers().append("x", HeaderValue::from_static("old"));
        rec.headers().append("y", HeaderValue::from_static("kept"));

        let mut buf = Buffer::new(&mut rec);
        buf.headers().append("x", HeaderValue::from_static("a"));
        buf.headers().append("x", HeaderValue::from_static("b"));
        buf.flush_headers();

        let x: Vec<_> = rec.header_map().get_all("x").iter().collect();
        assert_eq!(x, ["a", "b"]);
        assert_eq!(rec.header("y"), Some("kept"));
    }

    #[test]
    fn reset_forgets_captured_state() {
        let mut rec = Recorder::new();
        let mut buf = Buffer::new(&mut rec);
        buf.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        buf.write_all(b"boom").unwrap();
        buf.reset();

        assert!(buf.is_ok());
        assert!(buf.body().is_empty());
        assert!(!buf.has_changed());

        buf.write_header(StatusCode::CREATED);
        assert!(buf.is_ok());
        buf.flush_all().unwrap();
        assert_eq!(rec.code(), Some(StatusCode::CREATED));
    }
}
