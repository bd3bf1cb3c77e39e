//! Marshaling of columnar arrays and tables between managed values and a native engine.
//!
//! A [`Session`] encodes [`Array`](tether_array::Array)s into engine-owned descriptors without
//! copying their buffers, and decodes descriptors back into arrays that keep the engine's memory
//! alive. Descriptors are held by the guards [`ArrayHandle`], [`TableHandle`] and
//! [`ShuffleInfo`], which release them exactly once. The gateways in [`ops`] run the engine's
//! table operations on those guards.
//!
//! Nested arrays cross the boundary in the flat layout produced by [`flatten`].

pub use flatten::{
    buffers_of, field_names_of, lengths_of, num_buffers, num_lengths, tags_of,
    PLACEHOLDER_FIELD_NAME,
};
pub use handle::*;
pub use logging::*;
pub use session::*;

mod decode;
mod encode;
pub mod flatten;
mod handle;
mod logging;
mod native;
pub mod ops;
mod session;
mod table;
