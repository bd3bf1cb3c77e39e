//! Owning guards around native descriptors.
//!
//! Each guard releases its descriptor exactly once: either explicitly through one of the
//! `delete_*` methods, which report a failed release, or implicitly on drop, which can only
//! log it. A raw descriptor never escapes a guard except through `into_raw`, which hands the
//! obligation to release it to the caller.

use std::fmt::{Debug, Formatter};
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use log::{debug, warn};
use tether_error::{TetherResult, tether_bail};
use tether_native::{NativeEngine, array_info, shuffle_info, table_info};

use crate::native::check;

/// Whether two engine references point at the same engine.
pub(crate) fn same_engine(a: &Arc<dyn NativeEngine>, b: &Arc<dyn NativeEngine>) -> bool {
    ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// An owned native array descriptor.
pub struct ArrayHandle {
    engine: Arc<dyn NativeEngine>,
    ptr: NonNull<array_info>,
}

impl ArrayHandle {
    /// Take ownership of a descriptor.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live descriptor created by `engine` that nothing else will release.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, ptr: NonNull<array_info>) -> Self {
        Self { engine, ptr }
    }

    /// The raw descriptor, still owned by this handle.
    pub fn as_ptr(&self) -> *mut array_info {
        self.ptr.as_ptr()
    }

    /// The engine that created the descriptor.
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Give up ownership of the descriptor. The caller must release it.
    pub fn into_raw(self) -> *mut array_info {
        let this = ManuallyDrop::new(self);
        // Drop the engine reference without running the guard's destructor.
        drop(unsafe { ptr::read(&this.engine) });
        this.ptr.as_ptr()
    }

    /// Release the descriptor and the references it holds on its buffers.
    pub fn delete_array(self) -> TetherResult<()> {
        let engine = self.engine.clone();
        let ptr = self.into_raw();
        unsafe { engine.delete_info_decref_array(ptr) };
        check(engine.as_ref(), "delete_info_decref_array")
    }
}

impl Drop for ArrayHandle {
    fn drop(&mut self) {
        unsafe { self.engine.delete_info_decref_array(self.ptr.as_ptr()) };
        if let Some(msg) = self.engine.take_pending_error() {
            warn!("releasing an array handle failed: {msg}");
        }
    }
}

impl Debug for ArrayHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ArrayHandle").field(&self.ptr).finish()
    }
}

/// An owned native table descriptor.
pub struct TableHandle {
    engine: Arc<dyn NativeEngine>,
    ptr: NonNull<table_info>,
}

impl TableHandle {
    /// Take ownership of a table.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live table created by `engine` that nothing else will release.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, ptr: NonNull<table_info>) -> Self {
        Self { engine, ptr }
    }

    /// The raw table, still owned by this handle.
    pub fn as_ptr(&self) -> *mut table_info {
        self.ptr.as_ptr()
    }

    /// The engine that created the table.
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Number of columns.
    pub fn ncols(&self) -> TetherResult<usize> {
        let n = unsafe { self.engine.table_ncols(self.as_ptr()) };
        check(self.engine.as_ref(), "table_ncols")?;
        match usize::try_from(n) {
            Ok(n) => Ok(n),
            Err(_) => tether_bail!("table reports {} columns", n),
        }
    }

    /// Give up ownership of the table. The caller must release it.
    pub fn into_raw(self) -> *mut table_info {
        let this = ManuallyDrop::new(self);
        drop(unsafe { ptr::read(&this.engine) });
        this.ptr.as_ptr()
    }

    /// Release the table and every column it owns.
    ///
    /// Columns that share a dictionary's values each drop their own reference, so the shared
    /// values live until the last of them is gone.
    pub fn delete_table_decref_contents(self) -> TetherResult<()> {
        let engine = self.engine.clone();
        let ptr = self.into_raw();
        debug!("releasing table {ptr:?} with its columns");
        unsafe { engine.delete_table_decref_arrays(ptr) };
        check(engine.as_ref(), "delete_table_decref_arrays")
    }

    /// Release only the table's bookkeeping.
    ///
    /// # Safety
    ///
    /// Every column must already be owned elsewhere, e.g. by [`ArrayHandle`]s adopted from
    /// [`NativeEngine::info_from_table`], or it leaks.
    pub unsafe fn delete_table(self) -> TetherResult<()> {
        let engine = self.engine.clone();
        let ptr = self.into_raw();
        unsafe { engine.delete_table(ptr) };
        check(engine.as_ref(), "delete_table")
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        unsafe { self.engine.delete_table_decref_arrays(self.ptr.as_ptr()) };
        if let Some(msg) = self.engine.take_pending_error() {
            warn!("releasing a table handle failed: {msg}");
        }
    }
}

impl Debug for TableHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TableHandle").field(&self.ptr).finish()
    }
}

/// Owned metadata that can reverse a shuffle.
pub struct ShuffleInfo {
    engine: Arc<dyn NativeEngine>,
    ptr: NonNull<shuffle_info>,
}

impl ShuffleInfo {
    /// Take ownership of shuffle metadata.
    ///
    /// # Safety
    ///
    /// `ptr` must be live metadata created by `engine` that nothing else will release.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, ptr: NonNull<shuffle_info>) -> Self {
        Self { engine, ptr }
    }

    /// The raw metadata, still owned by this guard.
    pub fn as_ptr(&self) -> *mut shuffle_info {
        self.ptr.as_ptr()
    }

    /// The engine that created the metadata.
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Release the metadata.
    pub fn delete_shuffle_metadata(self) -> TetherResult<()> {
        let this = ManuallyDrop::new(self);
        let engine = unsafe { ptr::read(&this.engine) };
        unsafe { engine.delete_shuffle_info(this.ptr.as_ptr()) };
        check(engine.as_ref(), "delete_shuffle_info")
    }
}

impl Drop for ShuffleInfo {
    fn drop(&mut self) {
        unsafe { self.engine.delete_shuffle_info(self.ptr.as_ptr()) };
        if let Some(msg) = self.engine.take_pending_error() {
            warn!("releasing shuffle metadata failed: {msg}");
        }
    }
}

impl Debug for ShuffleInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShuffleInfo").field(&self.ptr).finish()
    }
}
