#![allow(clippy::missing_safety_doc)]

//! The native side of tether: the call protocol every compute engine implements, and an
//! in-process reference engine.
//!
//! The protocol in [`abi`] mirrors a C interface. Descriptors are opaque pointers, ownership
//! tokens travel as raw [`Allocation`](tether_buffer::Allocation) pointers, and failures are
//! reported through a pending-error slot rather than return values.

pub mod abi;
pub mod reference;

pub use abi::*;
pub use reference::{ReferenceEngine, ReferenceEngineOptions};
