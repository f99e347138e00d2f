//! Typed per-request context shared through the response writer.
//!
//! # How slots work
//!
//! A [`Contexter`] is a [`ResponseWriter`] decorator that also stores values,
//! one per type. Nothing is keyed by string and nothing is global: a wrapper
//! that needs a value asks the writer it was handed for a slot of that type.
//!
//! ```text
//! ctx.set(UserIp(ip))          → set_context(&mut Some(UserIp(ip)))
//!                                  carrier: slot.downcast::<UserIp>() → store
//! ctx.get::<UserIp>()          → context(&mut None::<UserIp>)
//!                                  carrier: slot.downcast::<UserIp>() → fill
//! ctx.get::<Unregistered>()    → carrier: no match → unsupported_getter(slot) → panic
//! ```
//!
//! Each application writes its own carrier and lists the types it supports
//! in a closed chain of `downcast` checks. Unknown types panic with
//! [`Error::UnsupportedContextGetter`] / [`Error::UnsupportedContextSetter`]
//! instead of answering "not found", so a wrapper compiled against a
//! different carrier fails at once.
//!
//! Besides its own slots a carrier always hands out the writer it wraps
//! through [`Contexter::response_writer`]. That is what
//! [`reclaim`](crate::reclaim) relies on.
//!
//! # Validation
//!
//! [`validate_contexter`] proves a carrier behaves as described above;
//! [`validate_wrappers`] runs every wrapper's
//! [`Wrapper::validate_context`] against it. Both belong at start-up, before
//! any traffic is served. The unsupported-type probes panic by contract, so
//! the installed panic hook reports them even when validation succeeds.
//!
//! Only one carrier per request is supported. A carrier nested inside another
//! shadows the outer one for everything below it, so [`reclaim`](crate::reclaim)
//! through the inner carrier stops at the outer carrier.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::{debug, info};

use crate::error::{Error, SlotType};
use crate::handler::Handler;
use crate::recorder::Recorder;
use crate::request::Request;
use crate::response::{ResponseWriter, writer_addr};
use crate::wrapper::Wrapper;

// ── Slot ──────────────────────────────────────────────────────────────────────

/// A type-identified storage location, passed to a [`Contexter`].
///
/// Only `Option<T>` implements it; the slot type is `T`.
pub trait Slot {
    fn slot_type(&self) -> SlotType;

    #[doc(hidden)]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> Slot for Option<T> {
    fn slot_type(&self) -> SlotType {
        SlotType::of::<T>()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn Slot + '_ {
    /// The slot as `Option<T>` if its type is `T`.
    pub fn downcast<T: Any>(&mut self) -> Option<&mut Option<T>> {
        self.as_any_mut().downcast_mut::<Option<T>>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.slot_type().is::<T>()
    }
}

// ── Contexter ─────────────────────────────────────────────────────────────────

/// A response writer that carries typed per-request values.
///
/// Implementations wrap the writer they receive at the top of the stack and
/// return `Some(self)` from [`ResponseWriter::as_contexter`].
pub trait Contexter: ResponseWriter {
    /// The writer this carrier wraps. Must be the exact writer it was created with.
    fn response_writer(&mut self) -> &mut dyn ResponseWriter;

    /// Fills `slot` with the stored value of its type. Returns whether a value
    /// was stored.
    ///
    /// Must call [`unsupported_getter`] for types it does not support.
    fn context(&mut self, slot: &mut dyn Slot) -> bool;

    /// Takes the value out of `slot` and stores it, replacing the previous
    /// value of that type.
    ///
    /// Must call [`unsupported_setter`] for types it does not support.
    fn set_context(&mut self, slot: &mut dyn Slot);
}

impl dyn Contexter + '_ {
    /// The stored value of type `T`, if any.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::UnsupportedContextGetter`] if the carrier does not
    /// support `T`.
    pub fn get<T: Any>(&mut self) -> Option<T> {
        let mut slot: Option<T> = None;
        self.context(&mut slot);
        slot
    }

    /// Stores `value`, replacing the previous value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::UnsupportedContextSetter`] if the carrier does not
    /// support `T`.
    pub fn set<T: Any>(&mut self, value: T) {
        self.set_context(&mut Some(value));
    }
}

/// Raises [`Error::UnsupportedContextGetter`] for the type of `slot`.
pub fn unsupported_getter(slot: &dyn Slot) -> ! {
    panic::panic_any(Error::UnsupportedContextGetter(slot.slot_type()))
}

/// Raises [`Error::UnsupportedContextSetter`] for the type of `slot`.
pub fn unsupported_setter(slot: &dyn Slot) -> ! {
    panic::panic_any(Error::UnsupportedContextSetter(slot.slot_type()))
}

// ── Validation ────────────────────────────────────────────────────────────────

/// A type no carrier may support.
struct Unregistered;

static PROBE_BODY: &[u8] = b"stackwrap probe";
static PROBE_HEADER: HeaderName = HeaderName::from_static("x-stackwrap-probe");

/// Checks that `carrier` implements the context protocol.
///
/// The carrier is wrapped around a probe handler and served once. The probe
/// asserts that
///
/// - the writer it receives is a [`Contexter`] that delegates headers, status
///   and body to the wrapped writer,
/// - [`Contexter::response_writer`] returns that exact writer,
/// - an unregistered type raises [`Error::UnsupportedContextGetter`] and
///   [`Error::UnsupportedContextSetter`] carrying that type.
///
/// Any failure is reported as [`Error::InvalidContexter`].
pub fn validate_contexter(carrier: &dyn Wrapper) -> Result<(), Error> {
    let contexter = carrier.object();
    let mut sink = Recorder::new();
    let expected = writer_addr(&mut sink);

    serve_probe(carrier, &mut sink, move |w| check_contexter(w, expected))
        .and_then(|checked| checked)
        .map_err(|reason| Error::InvalidContexter { contexter, reason })?;

    let delegated = sink.header(PROBE_HEADER.as_str()) == Some("1")
        && sink.code() == Some(StatusCode::ACCEPTED)
        && sink.body() == PROBE_BODY;
    if !delegated {
        return Err(Error::InvalidContexter {
            contexter,
            reason: "headers, status or body did not reach the wrapped writer".into(),
        });
    }

    info!(contexter, "contexter validated");
    Ok(())
}

/// Runs [`Wrapper::validate_context`] of every wrapper against `carrier`.
///
/// The first wrapper whose required context the carrier rejects is reported
/// as [`Error::UnsatisfiedContext`].
pub fn validate_wrappers(carrier: &dyn Wrapper, wrappers: &[Arc<dyn Wrapper>]) -> Result<(), Error> {
    let contexter = carrier.object();
    let count = wrappers.len();
    let wrappers: Vec<Arc<dyn Wrapper>> = wrappers.to_vec();
    let mut sink = Recorder::new();

    let checked = serve_probe(carrier, &mut sink, move |w| {
        let ctx = w.as_contexter().ok_or_else(|| Error::InvalidContexter {
            contexter,
            reason: "next handler did not receive a contexter".into(),
        })?;
        wrappers.iter().try_for_each(|wrapper| check_requirements(wrapper.as_ref(), ctx))
    });

    checked.map_err(|reason| Error::InvalidContexter { contexter, reason })??;
    info!(contexter, wrappers = count, "wrapper context requirements validated");
    Ok(())
}

/// Whether `wrapper` hands a [`Contexter`] to its next handler although the
/// writer it was given is none.
///
/// The wrapper is served once over a [`Recorder`]. A wrapper that does not
/// call its next handler, or panics without a carrier above it, passes no
/// context.
pub(crate) fn passes_context(wrapper: &dyn Wrapper) -> bool {
    let mut sink = Recorder::new();
    let served = panic::catch_unwind(AssertUnwindSafe(|| {
        serve_probe(wrapper, &mut sink, |w| w.as_contexter().is_some())
    }));
    matches!(served, Ok(Ok(true)))
}

/// Serves `carrier` around a probe running `check` on the writer it receives.
fn serve_probe<T, F>(carrier: &dyn Wrapper, sink: &mut Recorder, check: F) -> Result<T, String>
where
    T: Send + 'static,
    F: Fn(&mut dyn ResponseWriter) -> T + Send + Sync + 'static,
{
    let outcome: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
    let probe = Probe { check, outcome: Arc::clone(&outcome) };
    let req = Request::new(Method::GET, Uri::from_static("/"));

    carrier.wrap(Arc::new(probe)).serve(sink, &req);

    let result = outcome.lock().unwrap_or_else(PoisonError::into_inner).take();
    result.ok_or_else(|| "carrier did not call the next handler".to_owned())
}

struct Probe<T, F> {
    check: F,
    outcome: Arc<Mutex<Option<T>>>,
}

impl<T, F> Handler for Probe<T, F>
where
    T: Send + 'static,
    F: Fn(&mut dyn ResponseWriter) -> T + Send + Sync + 'static,
{
    fn serve(&self, w: &mut dyn ResponseWriter, _req: &Request) {
        let result = (self.check)(w);
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }
}

fn check_contexter(w: &mut dyn ResponseWriter, expected: usize) -> Result<(), String> {
    let ctx = w.as_contexter().ok_or("next handler did not receive a contexter")?;

    ctx.headers().insert(PROBE_HEADER.clone(), HeaderValue::from_static("1"));
    ctx.write_header(StatusCode::ACCEPTED);
    ctx.write_all(PROBE_BODY).map_err(|e| format!("write through contexter failed: {e}"))?;

    if writer_addr(ctx.response_writer()) != expected {
        return Err("response_writer did not return the wrapped writer".into());
    }

    let getter = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut slot: Option<Unregistered> = None;
        ctx.context(&mut slot)
    }));
    expect_unsupported(getter, Error::UnsupportedContextGetter(SlotType::of::<Unregistered>()))?;

    let setter = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut slot = Some(Unregistered);
        ctx.set_context(&mut slot)
    }));
    expect_unsupported(setter, Error::UnsupportedContextSetter(SlotType::of::<Unregistered>()))
}

fn expect_unsupported<T>(result: std::thread::Result<T>, expected: Error) -> Result<(), String> {
    let payload = match result {
        Ok(_) => return Err(format!("accepted an unregistered type instead of raising \"{expected}\"")),
        Err(payload) => payload,
    };
    match payload.downcast::<Error>() {
        Ok(e) if *e == expected => {
            debug!(%e, "contexter rejected unregistered type");
            Ok(())
        }
        Ok(e) => Err(format!("raised \"{e}\" instead of \"{expected}\"")),
        Err(_) => Err(format!("panicked without an error payload instead of raising \"{expected}\"")),
    }
}

fn check_requirements(wrapper: &dyn Wrapper, ctx: &mut dyn Contexter) -> Result<(), Error> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| wrapper.validate_context(ctx)));
    let Err(payload) = result else {
        return Ok(());
    };
    match payload.downcast::<Error>() {
        Ok(cause) => match *cause {
            e @ (Error::UnsupportedContextGetter(_) | Error::UnsupportedContextSetter(_)) => {
                Err(Error::UnsatisfiedContext { wrapper: wrapper.object(), cause: Box::new(e) })
            }
            e => panic::resume_unwind(Box::new(e)),
        },
        Err(payload) => panic::resume_unwind(payload),
    }
}
