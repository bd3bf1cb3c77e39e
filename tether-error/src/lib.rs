#![deny(missing_docs)]

//! Error handling for the tether marshaling layer.
//!
//! Every fallible operation returns a [`TetherResult`]. Errors are constructed through the
//! [`tether_err`], [`tether_bail`] and [`tether_panic`] macros, which capture a backtrace at the
//! point of failure.
//!
//! Double release or use of a handle after release is a caller contract violation with no
//! runtime detection. The handle guards in the `tether` crate make both unrepresentable in safe
//! code, so there is deliberately no error variant for them.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for tether.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum TetherError {
    /// A type descriptor with no encode or decode mapping. Always raised before any native call.
    #[error("unsupported type for marshaling: {0}\nBacktrace:\n{1}")]
    UnsupportedType(ErrString, Box<Backtrace>),
    /// The native engine raised its pending-error flag during the named entry point.
    #[error("native call {0} failed: {1}\nBacktrace:\n{2}")]
    NativeCallFailed(&'static str, ErrString, Box<Backtrace>),
    /// Flattened lengths or buffers disagree with the traversal of a type descriptor.
    #[error("shape mismatch: {0}\nBacktrace:\n{1}")]
    ShapeMismatch(ErrString, Box<Backtrace>),
    /// An array value does not match the type descriptor it was paired with.
    #[error("expected type {0} but found type {1}\nBacktrace:\n{2}")]
    MismatchedTypes(ErrString, ErrString, Box<Backtrace>),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Box<Backtrace>),
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Box<Backtrace>),
    /// A string handed to the native side contained an interior nul byte.
    #[error(transparent)]
    Nul(#[from] std::ffi::NulError),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<TetherError>),
}

impl TetherError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        TetherError::Context(msg.into(), Box::new(self))
    }

    /// Whether this error, or the error it wraps, came from the native engine.
    pub fn is_native(&self) -> bool {
        match self {
            TetherError::NativeCallFailed(..) => true,
            TetherError::Context(_, inner) => inner.is_native(),
            _ => false,
        }
    }
}

impl Debug for TetherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return TetherErrors as their error type.
pub type TetherResult<T> = Result<T, TetherError>;

/// A convenient macro for creating a TetherError.
#[macro_export]
macro_rules! tether_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TetherError::OutOfBounds($idx, $start, $stop, Box::new(Backtrace::capture()))
        )
    }};
    (NativeCallFailed: $entry:expr, $msg:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TetherError::NativeCallFailed($entry, $msg.into(), Box::new(Backtrace::capture()))
        )
    }};
    (MismatchedTypes: $expected:expr, $actual:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TetherError::MismatchedTypes(
                $expected.to_string().into(),
                $actual.to_string().into(),
                Box::new(Backtrace::capture()),
            )
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::TetherError::Context($msg.into(), Box::new($err))
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::TetherError::$variant(format!($fmt, $($arg),*).into(), Box::new(Backtrace::capture()))
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::TetherError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tether_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning a TetherError.
#[macro_export]
macro_rules! tether_bail {
    ($($tt:tt)+) => {
        return Err($crate::tether_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a TetherError in the presence of a programmer error
/// (e.g., an invariant has been violated).
#[macro_export]
macro_rules! tether_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::tether_panic!($crate::tether_err!(OutOfBounds: $idx, $start, $stop))
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tether_panic!($crate::tether_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::TetherError = $err;
        panic!("{}", err.with_context(format!($fmt, $($arg),*)))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tether_panic!($crate::tether_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::TetherError = $err;
        panic!("{}", err)
    }};
}

/// A trait for expect-ing a TetherResult or an Option.
pub trait TetherExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn tether_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> TetherExpect for Result<T, E>
where
    E: Into<TetherError>,
{
    type Output = T;

    #[inline(always)]
    fn tether_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| tether_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> TetherExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn tether_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = TetherError::InvalidArgument(msg.to_string().into(), Box::new(Backtrace::capture()));
            tether_panic!(err)
        })
    }
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[cold]
    #[must_use]
    pub const fn must_use(error: crate::TetherError) -> crate::TetherError {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bails(kind: u8) -> TetherResult<()> {
        match kind {
            0 => tether_bail!(UnsupportedType: "{}", "extension(uuid)"),
            1 => tether_bail!(NativeCallFailed: "sort_values_table", "bad key"),
            2 => tether_bail!(OutOfBounds: 5, 0, 3),
            _ => tether_bail!("plain {}", kind),
        }
    }

    #[test]
    fn macros_select_variants() {
        assert!(matches!(bails(0), Err(TetherError::UnsupportedType(..))));
        assert!(matches!(
            bails(1),
            Err(TetherError::NativeCallFailed("sort_values_table", ..))
        ));
        assert!(matches!(bails(2), Err(TetherError::OutOfBounds(5, 0, 3, _))));
        assert!(matches!(bails(9), Err(TetherError::InvalidArgument(..))));
    }

    #[test]
    fn context_keeps_native_origin() {
        let err = bails(1).unwrap_err().with_context("hash join");
        assert!(err.is_native());
        assert!(err.to_string().starts_with("hash join: native call sort_values_table failed"));
    }

    #[test]
    #[should_panic]
    fn expect_panics_with_context() {
        let none: Option<u8> = None;
        none.tether_expect("missing");
    }
}
