//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A stack links handlers of *different* concrete types: every wrapper hands
//! back its own type, closing over the next one. Each link is therefore kept
//! behind a trait object (`dyn Handler`) so the chain can be built from any
//! mix of wrappers and served uniformly.
//!
//! ```text
//! fn hello(w, req) { … }                        ← user writes this
//!        ↓ handler_fn(hello)
//! HandlerFn(Arc::new(hello))                   ← wrapper holding the function
//!        ↓ Stack::build → wrapper.wrap(next)
//! Arc<dyn Handler>  (BoxedHandler)             ← one link of the chain
//!        ↓
//! link.serve(w, req)  at request time          ← one vtable dispatch per link
//! ```
//!
//! Serving is synchronous: a request runs through the chain on one thread,
//! start to finish, without suspension points.

use std::sync::Arc;

use crate::request::Request;
use crate::response::ResponseWriter;

/// Serves a request against a response writer.
///
/// Implemented automatically for every
/// `Fn(&mut dyn ResponseWriter, &Request) + Send + Sync + 'static`.
///
/// A built stack is shared by concurrent requests, so any state a handler
/// keeps must be immutable or synchronised by the handler itself.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request);
}

/// A type-erased handler shared across concurrent requests.
///
/// `Arc` lets one built chain be cloned into every connection task for the
/// price of one atomic increment.
pub type BoxedHandler = Arc<dyn Handler>;

impl<F> Handler for F
where
    F: Fn(&mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request) {
        self(w, req)
    }
}

/// The handler at the bottom of every stack. Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

impl Handler for NoOp {
    fn serve(&self, _w: &mut dyn ResponseWriter, _req: &Request) {}
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};

    use super::*;
    use crate::recorder::Recorder;

    fn hello(w: &mut dyn ResponseWriter, _req: &Request) {
        w.write_all(b"hello").unwrap();
    }

    #[test]
    fn functions_are_handlers() {
        let h: BoxedHandler = Arc::new(hello);
        let mut rec = Recorder::new();
        h.serve(&mut rec, &Request::new(Method::GET, Uri::from_static("/")));
        assert_eq!(rec.body(), b"hello");
    }

    #[test]
    fn noop_leaves_the_writer_untouched() {
        let mut rec = Recorder::new();
        NoOp.serve(&mut rec, &Request::new(Method::GET, Uri::from_static("/")));
        assert_eq!(rec.code(), None);
        assert!(rec.body().is_empty());
    }
}
