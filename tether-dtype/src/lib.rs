#![deny(missing_docs)]

//! The type descriptors of the tether marshaling layer.
//!
//! A [`DType`] describes the logical shape of an array. The fixed-width kinds ([`PType`]) and
//! the container kinds map onto the integer tags of [`CTypeEnum`], which are shared verbatim with
//! the native engine.

pub use categorical::*;
pub use ctype::*;
pub use decimal::*;
pub use dtype::*;
pub use ptype::*;
pub use struct_::*;

mod categorical;
mod ctype;
mod decimal;
mod dtype;
mod ptype;
mod struct_;
