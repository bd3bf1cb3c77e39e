//! Conversion of the engine's pending-error slot into typed errors.
//!
//! Every native call is followed by one of these checks before its result is trusted.

use std::ptr::NonNull;
use std::sync::Arc;

use log::trace;
use tether_buffer::{Allocation, MemInfo};
use tether_error::{TetherResult, tether_err};
use tether_native::{NativeEngine, array_info, table_info};

use crate::handle::{ArrayHandle, TableHandle};

/// Fail with `NativeCallFailed` if `entry` left an error pending.
pub(crate) fn check(engine: &dyn NativeEngine, entry: &'static str) -> TetherResult<()> {
    trace!("native call {entry} returned");
    match engine.take_pending_error() {
        Some(msg) => Err(tether_err!(NativeCallFailed: entry, msg)),
        None => Ok(()),
    }
}

/// Adopt the array returned by `entry`, then check for a pending error.
///
/// A descriptor returned together with an error is released rather than leaked.
pub(crate) fn check_array(
    engine: &Arc<dyn NativeEngine>,
    entry: &'static str,
    ptr: *mut array_info,
) -> TetherResult<ArrayHandle> {
    let handle = NonNull::new(ptr).map(|ptr| unsafe { ArrayHandle::from_raw(engine.clone(), ptr) });
    check(engine.as_ref(), entry)?;
    handle.ok_or_else(|| tether_err!(NativeCallFailed: entry, "returned a null array"))
}

/// Adopt the table returned by `entry`, then check for a pending error.
pub(crate) fn check_table(
    engine: &Arc<dyn NativeEngine>,
    entry: &'static str,
    ptr: *mut table_info,
) -> TetherResult<TableHandle> {
    let handle = NonNull::new(ptr).map(|ptr| unsafe { TableHandle::from_raw(engine.clone(), ptr) });
    check(engine.as_ref(), entry)?;
    handle.ok_or_else(|| tether_err!(NativeCallFailed: entry, "returned a null table"))
}

/// Reclaim an ownership token written to an accessor's out-parameter.
///
/// # Safety
///
/// `ptr` must be null or a token produced by [`Allocation::into_raw`] that nobody else reclaims.
pub(crate) unsafe fn adopt(ptr: *const Allocation) -> Option<MemInfo> {
    (!ptr.is_null()).then(|| unsafe { Allocation::from_raw(ptr) })
}

/// The token of an accessor that succeeded, which must have written one.
pub(crate) fn token(entry: &'static str, meminfo: Option<MemInfo>) -> TetherResult<MemInfo> {
    meminfo.ok_or_else(|| tether_err!(NativeCallFailed: entry, "returned no ownership token"))
}
