//! Response writer decorators for middleware.
//!
//! These intercept what the handlers below a middleware write, so the
//! middleware can inspect, rewrite or suppress it:
//!
//! - [`Buffer`] captures headers, status and body entirely; nothing reaches
//!   the wrapped writer until [`Buffer::flush_all`].
//! - [`Peek`] caches headers and status, but lets the body through as soon as
//!   a `proceed` decision allows it. Cheaper than `Buffer` for large bodies.
//! - [`EscapeHtml`] HTML-escapes body bytes on the way through.
//!
//! All three forward [`as_contexter`](crate::ResponseWriter::as_contexter) to
//! the wrapped writer, so context and [`reclaim`](crate::reclaim) keep working
//! below them. They are request-scoped and not meant to be shared.

mod buffer;
mod escape;
mod peek;

pub use buffer::Buffer;
pub use escape::EscapeHtml;
pub use peek::{Peek, Proceed};

use http::{HeaderMap, StatusCode};

/// Replaces every header present in `from` on `to`, keeping all values.
fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for name in from.keys() {
        to.remove(name);
        for value in from.get_all(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Unset or `2xx`.
fn is_ok(status: Option<StatusCode>) -> bool {
    status.is_none_or(|s| s.is_success())
}
