//! Concrete array kinds.

mod categorical;
mod datetime;
mod decimal;
mod dict;
mod extension;
mod interval;
mod list;
mod map;
mod nullable;
mod primitive;
mod struct_;
mod varbin;

pub use categorical::*;
pub use datetime::*;
pub use decimal::*;
pub use dict::*;
pub use extension::*;
pub use interval::*;
pub use list::*;
pub use map::*;
pub use nullable::*;
pub use primitive::*;
pub use struct_::*;
pub use varbin::*;
