//! # stackwrap
//!
//! Composable middleware stacks for HTTP handlers, with typed per-request
//! context carried by the response writer.
//!
//! ## The model
//!
//! A [`Handler`] serves a request against a [`ResponseWriter`]. A [`Wrapper`]
//! turns the next handler into a new one. A [`Stack`] is an ordered list of
//! wrappers; building it nests them so the first one added runs first and
//! decides whether the rest run at all.
//!
//! ```text
//! request → wrapper 1 → wrapper 2 → … → wrapper n → NoOp
//!              │            │
//!              │            └ may stop here (write a 403 and return)
//!              └ may swap the writer for a Buffer, Peek or context carrier
//! ```
//!
//! There is no routing, no async handler and no global state. Per-request
//! values travel with the writer: a *context carrier* at the top of the stack
//! wraps the writer and stores values by type ([`Contexter`]). Decorators
//! from [`middleware`] forward the carrier, so any handler below can reach it.
//!
//! ## Quick start
//!
//! ```rust
//! use std::net::IpAddr;
//! use std::sync::Arc;
//!
//! use http::{HeaderMap, Method, StatusCode, Uri};
//! use stackwrap::{
//!     BoxedHandler, Contexter, Handler, Recorder, Request, ResponseWriter, Slot, Stack,
//!     Wrapper, handler_fn, next_handler_fn, unsupported_getter, unsupported_setter,
//! };
//!
//! #[derive(Clone, Copy)]
//! struct UserIp(IpAddr);
//!
//! // The carrier: supports UserIp and nothing else.
//! struct Ctx<'a> {
//!     w: &'a mut dyn ResponseWriter,
//!     ip: Option<UserIp>,
//! }
//!
//! impl ResponseWriter for Ctx<'_> {
//!     fn headers(&mut self) -> &mut HeaderMap { self.w.headers() }
//!     fn write_header(&mut self, status: StatusCode) { self.w.write_header(status) }
//!     fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.w.write(buf) }
//!     fn as_contexter(&mut self) -> Option<&mut dyn Contexter> { Some(self) }
//! }
//!
//! impl Contexter for Ctx<'_> {
//!     fn response_writer(&mut self) -> &mut dyn ResponseWriter { &mut *self.w }
//!
//!     fn context(&mut self, slot: &mut dyn Slot) -> bool {
//!         if let Some(s) = slot.downcast::<UserIp>() {
//!             *s = self.ip;
//!             return s.is_some();
//!         }
//!         unsupported_getter(slot)
//!     }
//!
//!     fn set_context(&mut self, slot: &mut dyn Slot) {
//!         if let Some(s) = slot.downcast::<UserIp>() {
//!             self.ip = s.take();
//!             return;
//!         }
//!         unsupported_setter(slot)
//!     }
//! }
//!
//! struct WithCtx;
//!
//! impl Wrapper for WithCtx {
//!     fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
//!         Arc::new(move |w: &mut dyn ResponseWriter, req: &Request| {
//!             next.serve(&mut Ctx { w, ip: None }, req);
//!         })
//!     }
//!
//!     fn provides_context(&self) -> bool { true }
//! }
//!
//! fn greet(w: &mut dyn ResponseWriter, _req: &Request) {
//!     let ip = w.as_contexter().and_then(|ctx| ctx.get::<UserIp>());
//!     let msg = match ip {
//!         Some(UserIp(ip)) => format!("hello {ip}"),
//!         None => "hello stranger".to_owned(),
//!     };
//!     w.write_all(msg.as_bytes()).unwrap();
//! }
//!
//! let stack = Stack::new()
//!     .with(WithCtx)
//!     .with(next_handler_fn(|next: &dyn Handler, w: &mut dyn ResponseWriter, req: &Request| {
//!         if let (Some(ctx), Some(addr)) = (w.as_contexter(), req.remote_addr()) {
//!             ctx.set(UserIp(addr.ip()));
//!         }
//!         next.serve(w, req);
//!     }))
//!     .with(handler_fn(greet));
//!
//! // Once, at start-up.
//! stack.validate().unwrap();
//! let app = stack.build();
//!
//! let req = Request::new(Method::GET, Uri::from_static("/"))
//!     .with_remote_addr("127.0.0.1:9000".parse().unwrap());
//! let mut rec = Recorder::new();
//! app.serve(&mut rec, &req);
//! assert_eq!(rec.body_text(), "hello 127.0.0.1");
//! ```
//!
//! Serve the built handler over the network with [`HyperService`].

mod context;
mod error;
mod handler;
mod recorder;
mod request;
mod response;
mod service;
mod stack;
mod trace;
mod wrapper;

pub mod middleware;

pub use context::{Contexter, Slot, unsupported_getter, unsupported_setter, validate_contexter, validate_wrappers};
pub use error::{Error, SlotType};
pub use handler::{BoxedHandler, Handler, NoOp};
pub use recorder::Recorder;
pub use request::Request;
pub use response::{CloseNotifier, Flusher, Hijacker, ResponseWriter, close_notify, flush, hijack, reclaim};
pub use service::HyperService;
pub use stack::{Stack, StackConfig, new};
pub use trace::{LogTracer, Tracer, TracingTracer};
pub use wrapper::{
    HandlerFn, HandlerWrapper, NextHandler, NextHandlerFn, NextHandlerWrapper, Role, Wrapper, WrapperFn,
    handler, handler_fn, next_handler, next_handler_fn, wrapper_fn,
};
