//! In-memory response writer.

use std::borrow::Cow;
use std::io;

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};

use crate::response::{Flusher, ResponseWriter};

/// Records everything written to it.
///
/// Like a real connection, the first status wins and the first body write
/// without a status implies `200 OK`. Used for tests and as the probe sink of
/// the validation routines.
#[derive(Debug, Default)]
pub struct Recorder {
    headers: HeaderMap,
    code: Option<StatusCode>,
    body: BytesMut,
    flushed: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self) -> Option<StatusCode> { self.code }
    pub fn header_map(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn flushed(&self) -> bool { self.flushed }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl ResponseWriter for Recorder {
    fn headers(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.code.is_none() {
            self.code = Some(status);
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.code.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        Some(self)
    }
}

impl Flusher for Recorder {
    fn flush(&mut self) {
        self.flushed = true;
    }
}
