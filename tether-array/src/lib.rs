#![deny(missing_docs)]

//! Managed-runtime array values and tables.
//!
//! An [`Array`] is the value side of a marshaling call: a tree of zero-copy buffers whose
//! shape matches its [`DType`](tether_dtype::DType). A [`LogicalTable`] groups columns into
//! type-homogeneous blocks and defers unboxing each column until it is first needed.

pub use array::*;
pub use table::*;

mod array;
pub mod arrays;
mod table;
