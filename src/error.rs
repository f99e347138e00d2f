//! Unified error type.
//!
//! Every variant is a programming error, not a runtime condition. The flush
//! ordering and context variants are raised as typed panic payloads via
//! [`std::panic::panic_any`]; the validation variants come back as `Err` from
//! [`validate_contexter`](crate::validate_contexter),
//! [`validate_wrappers`](crate::validate_wrappers) and
//! [`Stack::validate`](crate::Stack::validate).

use std::any::{Any, TypeId};
use std::fmt;

/// Runtime identity of a context slot type, with its name for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SlotType {
    id: TypeId,
    name: &'static str,
}

impl SlotType {
    pub fn of<T: Any>() -> Self {
        Self { id: TypeId::of::<T>(), name: std::any::type_name::<T>() }
    }

    pub fn id(&self) -> TypeId { self.id }
    pub fn name(&self) -> &'static str { self.name }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for SlotType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SlotType {}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The error type of stackwrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Body bytes reached the wrapped writer before the cached status code.
    BodyFlushedBeforeCode,
    /// The cached status code was flushed before the cached headers.
    CodeFlushedBeforeHeaders,
    /// A [`Contexter`](crate::Contexter) was asked for a slot type it does not know.
    UnsupportedContextGetter(SlotType),
    /// A [`Contexter`](crate::Contexter) was asked to store a slot type it does not know.
    UnsupportedContextSetter(SlotType),
    /// A context carrier failed validation; the carrier implementation is broken.
    InvalidContexter { contexter: &'static str, reason: String },
    /// A wrapper needs a context type the carrier does not support.
    UnsatisfiedContext { wrapper: &'static str, cause: Box<Error> },
    /// A second context carrier was placed inside the stack.
    NestedContexter { wrapper: &'static str, position: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BodyFlushedBeforeCode => f.write_str("body flushed before code"),
            Self::CodeFlushedBeforeHeaders => f.write_str("code flushed before headers"),
            Self::UnsupportedContextGetter(ty) => write!(f, "unsupported context getter: {ty}"),
            Self::UnsupportedContextSetter(ty) => write!(f, "unsupported context setter: {ty}"),
            Self::InvalidContexter { contexter, reason } => {
                write!(f, "invalid contexter {contexter}: {reason}")
            }
            Self::UnsatisfiedContext { wrapper, cause } => {
                write!(f, "context required by {wrapper} is not supported: {cause}")
            }
            Self::NestedContexter { wrapper, position } => {
                write!(f, "nested contexter {wrapper} at position {position}; only the first wrapper may provide context")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsatisfiedContext { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn slot_type_compares_by_id() {
        assert_eq!(SlotType::of::<Marker>(), SlotType::of::<Marker>());
        assert_ne!(SlotType::of::<Marker>(), SlotType::of::<u8>());
        assert!(SlotType::of::<Marker>().is::<Marker>());
    }

    #[test]
    fn display_names_the_slot_type() {
        let e = Error::UnsupportedContextGetter(SlotType::of::<Marker>());
        assert!(e.to_string().starts_with("unsupported context getter: "));
        assert!(e.to_string().ends_with("Marker"));
        assert_eq!(Error::BodyFlushedBeforeCode.to_string(), "body flushed before code");
        assert_eq!(Error::CodeFlushedBeforeHeaders.to_string(), "code flushed before headers");
    }

    #[test]
    fn unsatisfied_context_exposes_cause() {
        use std::error::Error as _;
        let e = Error::UnsatisfiedContext {
            wrapper: "app::Auth",
            cause: Box::new(Error::UnsupportedContextSetter(SlotType::of::<u8>())),
        };
        assert_eq!(e.source().map(|s| s.to_string()), Some("unsupported context setter: u8".into()));
    }
}
