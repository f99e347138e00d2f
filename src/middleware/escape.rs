use std::io;

use http::{HeaderMap, StatusCode};

use crate::context::Contexter;
use crate::response::ResponseWriter;

/// HTML-escapes the body on its way to the wrapped writer.
///
/// `&`, `'`, `"`, `<` and `>` become `&amp;`, `&#39;`, `&#34;`, `&lt;` and
/// `&gt;`. All of them are ASCII, so escaping byte by byte never splits a
/// UTF-8 sequence, and chunk boundaries don't matter. Headers and status pass
/// straight through.
pub struct EscapeHtml<'a> {
    inner: &'a mut dyn ResponseWriter,
}

impl<'a> EscapeHtml<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner }
    }
}

fn replacement(b: u8) -> Option<&'static [u8]> {
    match b {
        b'&'  => Some(b"&amp;"),
        b'\'' => Some(b"&#39;"),
        b'"'  => Some(b"&#34;"),
        b'<'  => Some(b"&lt;"),
        b'>'  => Some(b"&gt;"),
        _     => None,
    }
}

impl ResponseWriter for EscapeHtml<'_> {
    fn headers(&mut self) -> &mut HeaderMap {
        self.inner.headers()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.write_header(status);
    }

    /// Reports the whole of `buf` as consumed once its escaped form is written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut last = 0;
        for (i, &b) in buf.iter().enumerate() {
            let Some(esc) = replacement(b) else { continue };
            self.inner.write_all(&buf[last..i])?;
            self.inner.write_all(esc)?;
            last = i + 1;
        }
        self.inner.write_all(&buf[last..])?;
        Ok(buf.len())
    }

    fn as_contexter(&mut self) -> Option<&mut dyn Contexter> {
        self.inner.as_contexter()
    }
}
