//! The [`Wrapper`] trait and adapters turning other callable shapes into wrappers.
//!
//! | Adapter | Wraps | Calls `next`? | [`Role`] |
//! |---|---|---|---|
//! | [`handler`] | a [`Handler`] | never | `Handler` |
//! | [`handler_fn`] | `fn(w, req)` | never | `HandlerFn` |
//! | [`next_handler`] | a [`NextHandler`] | when it likes | `NextHandler` |
//! | [`next_handler_fn`] | `fn(next, w, req)` | when it likes | `NextHandlerFn` |
//! | [`wrapper_fn`] | `fn(next) -> handler` | when it likes | `Wrapper` |

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::context::Contexter;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;

/// Decorates the next handler of a stack.
///
/// `wrap` runs once, when the stack is built. It should only capture what it
/// needs and leave per-request work to the handler it returns.
pub trait Wrapper: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;

    /// Type name reported by stack tracing.
    fn object(&self) -> &'static str {
        type_name::<Self>()
    }

    /// How the object takes part in the stack, reported by stack tracing.
    fn role(&self) -> Role {
        Role::Wrapper
    }

    /// Whether the handlers of this wrapper pass a [`Contexter`] downstream.
    ///
    /// [`Stack::validate`](crate::Stack::validate) also spots carriers that
    /// leave this at `false` by serving them once. Return `true` for carriers
    /// that only install their [`Contexter`] on some requests.
    fn provides_context(&self) -> bool {
        false
    }

    /// Touches every context type this wrapper reads or writes.
    ///
    /// Called by [`validate_wrappers`](crate::validate_wrappers) with the
    /// carrier of the stack. A carrier lacking one of the types panics here,
    /// at start-up, instead of inside a live request.
    fn validate_context(&self, _ctx: &mut dyn Contexter) {}
}

/// The adaptation path a stack link came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Handler,
    HandlerFn,
    NextHandler,
    NextHandlerFn,
    Wrapper,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handler       => "Handler",
            Self::HandlerFn     => "HandlerFn",
            Self::NextHandler   => "NextHandler",
            Self::NextHandlerFn => "NextHandlerFn",
            Self::Wrapper       => "Wrapper",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Plain handlers ────────────────────────────────────────────────────────────

/// Wrapper that serves with a [`Handler`] and ignores the next handler.
pub struct HandlerWrapper<H>(Arc<H>);

/// Ends the chain with `h`.
pub fn handler<H: Handler>(h: H) -> HandlerWrapper<H> {
    HandlerWrapper(Arc::new(h))
}

impl<H: Handler> Wrapper for HandlerWrapper<H> {
    fn wrap(&self, _next: BoxedHandler) -> BoxedHandler {
        self.0.clone()
    }

    fn object(&self) -> &'static str { type_name::<H>() }
    fn role(&self) -> Role { Role::Handler }
}

/// Wrapper that serves with a function and ignores the next handler.
pub struct HandlerFn<F>(Arc<F>);

/// Ends the chain with the function `f`.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    HandlerFn(Arc::new(f))
}

impl<F> Wrapper for HandlerFn<F>
where
    F: Fn(&mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    fn wrap(&self, _next: BoxedHandler) -> BoxedHandler {
        self.0.clone()
    }

    fn object(&self) -> &'static str { type_name::<F>() }
    fn role(&self) -> Role { Role::HandlerFn }
}

// ── Next-aware handlers ───────────────────────────────────────────────────────

/// Serves a request with the aid of the next handler.
///
/// The implementation decides whether, when and how often `next` runs.
pub trait NextHandler: Send + Sync + 'static {
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request);

    /// See [`Wrapper::validate_context`].
    fn validate_context(&self, _ctx: &mut dyn Contexter) {}
}

/// Wrapper for a [`NextHandler`].
pub struct NextHandlerWrapper<N>(Arc<N>);

pub fn next_handler<N: NextHandler>(n: N) -> NextHandlerWrapper<N> {
    NextHandlerWrapper(Arc::new(n))
}

impl<N: NextHandler> Wrapper for NextHandlerWrapper<N> {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(NextLink { this: Arc::clone(&self.0), next })
    }

    fn object(&self) -> &'static str { type_name::<N>() }
    fn role(&self) -> Role { Role::NextHandler }

    fn validate_context(&self, ctx: &mut dyn Contexter) {
        self.0.validate_context(ctx)
    }
}

/// Wrapper for a function taking the next handler.
pub struct NextHandlerFn<F>(Arc<F>);

pub fn next_handler_fn<F>(f: F) -> NextHandlerFn<F>
where
    F: Fn(&dyn Handler, &mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    NextHandlerFn(Arc::new(f))
}

impl<F> Wrapper for NextHandlerFn<F>
where
    F: Fn(&dyn Handler, &mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(NextLink { this: FnNext(Arc::clone(&self.0)), next })
    }

    fn object(&self) -> &'static str { type_name::<F>() }
    fn role(&self) -> Role { Role::NextHandlerFn }
}

struct FnNext<F>(Arc<F>);

impl<F> NextHandler for FnNext<F>
where
    F: Fn(&dyn Handler, &mut dyn ResponseWriter, &Request) + Send + Sync + 'static,
{
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
        (self.0)(next, w, req)
    }
}

impl<N: NextHandler> NextHandler for Arc<N> {
    fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
        N::serve_next(self, next, w, req)
    }

    fn validate_context(&self, ctx: &mut dyn Contexter) {
        N::validate_context(self, ctx)
    }
}

/// One link: a next-aware handler bound to its next handler.
struct NextLink<N> {
    this: N,
    next: BoxedHandler,
}

impl<N: NextHandler> Handler for NextLink<N> {
    fn serve(&self, w: &mut dyn ResponseWriter, req: &Request) {
        self.this.serve_next(self.next.as_ref(), w, req)
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

/// Wrapper expressed as a single function from next handler to handler.
pub struct WrapperFn<F>(F);

pub fn wrapper_fn<F>(f: F) -> WrapperFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    WrapperFn(f)
}

impl<F> Wrapper for WrapperFn<F>
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        (self.0)(next)
    }

    fn object(&self) -> &'static str { type_name::<F>() }
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};

    use super::*;
    use crate::handler::NoOp;
    use crate::recorder::Recorder;

    struct Twice;

    impl NextHandler for Twice {
        fn serve_next(&self, next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request) {
            next.serve(w, req);
            next.serve(w, req);
        }
    }

    fn serve(h: BoxedHandler) -> Recorder {
        let mut rec = Recorder::new();
        h.serve(&mut rec, &Request::new(Method::GET, Uri::from_static("/")));
        rec
    }

    fn write_x(w: &mut dyn ResponseWriter, _req: &Request) {
        w.write_all(b"x").unwrap();
    }

    #[test]
    fn handler_adapters_ignore_next() {
        let next: BoxedHandler = Arc::new(|w: &mut dyn ResponseWriter, _: &Request| {
            w.write_all(b"next").unwrap();
        });
        assert_eq!(serve(handler_fn(write_x).wrap(Arc::clone(&next))).body(), b"x");
        assert_eq!(serve(handler(write_x).wrap(next)).body(), b"x");
    }

    #[test]
    fn next_handler_controls_next() {
        let rec = serve(next_handler(Twice).wrap(handler_fn(write_x).wrap(Arc::new(NoOp))));
        assert_eq!(rec.body(), b"xx");

        let skip = next_handler_fn(|_next: &dyn Handler, w: &mut dyn ResponseWriter, _req: &Request| {
            w.write_all(b"skipped").unwrap();
        });
        assert_eq!(serve(skip.wrap(handler_fn(write_x).wrap(Arc::new(NoOp)))).body(), b"skipped");
    }

    #[test]
    fn adapters_report_the_adapted_object() {
        assert_eq!(handler(NoOp).object(), type_name::<NoOp>());
        assert_eq!(handler(NoOp).role(), Role::Handler);
        assert_eq!(handler_fn(write_x).role(), Role::HandlerFn);
        assert!(handler_fn(write_x).object().ends_with("write_x"));
        assert_eq!(next_handler(Twice).object(), type_name::<Twice>());
        assert_eq!(next_handler(Twice).role(), Role::NextHandler);
        assert_eq!(wrapper_fn(|next| next).role(), Role::Wrapper);
        assert_eq!(Role::NextHandlerFn.to_string(), "NextHandlerFn");
    }
}
