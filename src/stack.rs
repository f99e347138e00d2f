//! Composing wrappers into one handler.
//!
//! ```text
//! Stack::new().with(a).with(b).with(c).build()
//!
//!   a.wrap( b.wrap( c.wrap( NoOp ) ) )
//!   └ runs first, decides whether b runs, which decides whether c runs
//! ```
//!
//! Build once at start-up and share the result; a built handler never
//! changes, whatever happens to the `Stack` afterwards.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::{Contexter, passes_context, validate_contexter, validate_wrappers};
use crate::error::Error;
use crate::handler::{BoxedHandler, NoOp};
use crate::trace::{LogTracer, Traced, Tracer};
use crate::wrapper::Wrapper;

// ── StackConfig ───────────────────────────────────────────────────────────────

/// Build-time options of a [`Stack`].
///
/// Defaults to no tracing, with a [`LogTracer`] on stdout ready for when
/// tracing is switched on.
#[derive(Clone)]
pub struct StackConfig {
    trace: bool,
    tracer: Arc<dyn Tracer>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self { trace: false, tracer: Arc::new(LogTracer::stdout()) }
    }

    /// Wraps every link in a decorator reporting to the tracer.
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    pub fn is_tracing(&self) -> bool { self.trace }
}

impl Default for StackConfig {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for StackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackConfig").field("trace", &self.trace).finish_non_exhaustive()
    }
}

// ── Stack ─────────────────────────────────────────────────────────────────────

/// An ordered list of wrappers; the first one added is the outermost.
///
/// A `Stack` is itself a [`Wrapper`], so stacks nest: the chain of an inner
/// stack ends in the outer stack's next handler instead of [`NoOp`].
#[derive(Clone, Default)]
pub struct Stack {
    wrappers: Vec<Arc<dyn Wrapper>>,
    config: StackConfig,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a wrapper. Returns `self` for chaining.
    pub fn with(self, wrapper: impl Wrapper) -> Self {
        self.with_shared(Arc::new(wrapper))
    }

    /// Appends a wrapper that is shared with other stacks.
    pub fn with_shared(mut self, wrapper: Arc<dyn Wrapper>) -> Self {
        self.wrappers.push(wrapper);
        self
    }

    pub fn config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn wrappers(&self) -> &[Arc<dyn Wrapper>] {
        &self.wrappers
    }

    /// Checks the context setup of the stack before it serves traffic.
    ///
    /// A wrapper is a carrier if it says so through
    /// [`Wrapper::provides_context`] or if, served once over a plain writer,
    /// its next handler receives a [`Contexter`]. Wrappers are therefore run
    /// once against a throwaway writer here.
    ///
    /// If the first wrapper is a carrier, it is validated with
    /// [`validate_contexter`] and all others are checked against it with
    /// [`validate_wrappers`]. Any later carrier is rejected with
    /// [`Error::NestedContexter`].
    pub fn validate(&self) -> Result<(), Error> {
        let Some((first, rest)) = self.wrappers.split_first() else {
            return Ok(());
        };

        if let Some((i, nested)) = rest.iter().enumerate().find(|&(_, w)| is_carrier(w.as_ref())) {
            return Err(Error::NestedContexter { wrapper: nested.object(), position: i + 1 });
        }

        if is_carrier(first.as_ref()) {
            validate_contexter(first.as_ref())?;
            validate_wrappers(first.as_ref(), rest)?;
        }

        info!(wrappers = self.wrappers.len(), "stack validated");
        Ok(())
    }

    /// Composes the wrappers into one handler ending in [`NoOp`].
    pub fn build(&self) -> BoxedHandler {
        let handler = compose(&self.wrappers, Arc::new(NoOp), &self.config);
        debug!(wrappers = self.wrappers.len(), trace = self.config.trace, "stack built");
        handler
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.wrappers.iter().map(|w| w.object()).collect();
        f.debug_struct("Stack").field("wrappers", &names).field("config", &self.config).finish()
    }
}

impl FromIterator<Arc<dyn Wrapper>> for Stack {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Wrapper>>>(iter: I) -> Self {
        Self { wrappers: iter.into_iter().collect(), config: StackConfig::default() }
    }
}

impl Wrapper for Stack {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        compose(&self.wrappers, next, &self.config)
    }

    fn provides_context(&self) -> bool {
        self.wrappers.iter().any(|w| w.provides_context())
    }

    fn validate_context(&self, ctx: &mut dyn Contexter) {
        for w in &self.wrappers {
            w.validate_context(ctx);
        }
    }
}

/// Composes `wrappers` into a single handler with default options.
pub fn new<I>(wrappers: I) -> BoxedHandler
where
    I: IntoIterator<Item = Arc<dyn Wrapper>>,
{
    wrappers.into_iter().collect::<Stack>().build()
}

fn is_carrier(wrapper: &dyn Wrapper) -> bool {
    if wrapper.provides_context() {
        return true;
    }
    let detected = passes_context(wrapper);
    if detected {
        debug!(wrapper = wrapper.object(), "carrier detected without provides_context");
    }
    detected
}

fn compose(wrappers: &[Arc<dyn Wrapper>], terminal: BoxedHandler, config: &StackConfig) -> BoxedHandler {
    wrappers.iter().rev().fold(terminal, |next, wrapper| {
        let link = wrapper.wrap(next);
        if !config.trace {
            return link;
        }
        let traced: BoxedHandler = Arc::new(Traced::new(wrapper.object(), wrapper.role(), Arc::clone(&config.tracer), link));
        traced
    })
}
