#![deny(missing_docs)]

//! Reference-counted memory shared between the managed runtime and native code.
//!
//! Every buffer is a zero-copy view kept alive by an [`Allocation`] token. The same token type is
//! handed to the native engine when an array is marshaled, so both sides take part in a single
//! reference count and memory is freed only once the last side lets go.

pub use allocation::*;
pub use bitmap::*;
pub use buffer::*;

mod allocation;
mod bitmap;
mod buffer;
mod debug;
mod macros;
