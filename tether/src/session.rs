use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::debug;
use tether_array::arrays::CategoricalArray;
use tether_array::{Array, LogicalTable, TableSchema};
use tether_dtype::{DType, PType};
use tether_error::TetherResult;
use tether_native::NativeEngine;

use crate::handle::{ArrayHandle, TableHandle};
use crate::{decode, encode, ops, table};

/// Options of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    verify_shapes: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify_shapes: true,
        }
    }
}

impl SessionOptions {
    /// Whether flattened nested arrays are checked against the counts their type predicts
    /// before being handed to the engine.
    pub fn verify_shapes(&self) -> bool {
        self.verify_shapes
    }

    pub fn with_verify_shapes(mut self, verify_shapes: bool) -> Self {
        self.verify_shapes = verify_shapes;
        self
    }
}

/// The marshaling entry point bound to one native engine.
///
/// Every handle a session produces remembers its engine, so handles from different sessions
/// over the same engine mix freely.
#[derive(Clone)]
pub struct Session {
    engine: Arc<dyn NativeEngine>,
    options: SessionOptions,
}

impl Session {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self::with_options(engine, SessionOptions::default())
    }

    pub fn with_options(engine: Arc<dyn NativeEngine>, options: SessionOptions) -> Self {
        Self { engine, options }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Lend `array` to the engine as a descriptor of type `dtype`.
    ///
    /// The descriptor holds its own references on the array's buffers, so `array` stays usable
    /// and the buffers outlive whichever of the two is dropped last.
    pub fn encode(&self, array: &Array, dtype: &DType) -> TetherResult<ArrayHandle> {
        encode::encode(&self.engine, array, dtype, self.options.verify_shapes)
    }

    /// Hand `array` over to the engine. The descriptor ends up as the only owner of its
    /// buffers unless they are shared elsewhere.
    pub fn encode_owned(&self, array: Array, dtype: &DType) -> TetherResult<ArrayHandle> {
        let handle = self.encode(&array, dtype)?;
        drop(array);
        Ok(handle)
    }

    /// Rebuild an array of type `dtype` from `handle` without copying its buffers.
    pub fn decode(&self, handle: &ArrayHandle, dtype: &DType) -> TetherResult<Array> {
        decode::decode(handle, dtype)
    }

    /// Decode categorical codes, reusing the categories of `known`.
    pub fn decode_categorical(
        &self,
        handle: &ArrayHandle,
        known: &CategoricalArray,
    ) -> TetherResult<CategoricalArray> {
        decode::decode_categorical(handle, known)
    }

    /// Assemble columns into a table. The table takes ownership of every column.
    pub fn to_table(&self, columns: Vec<ArrayHandle>) -> TetherResult<TableHandle> {
        table::to_table(&self.engine, columns)
    }

    /// Split a table into its columns.
    pub fn from_table(&self, table: TableHandle) -> TetherResult<Vec<ArrayHandle>> {
        table::from_table(table)
    }

    /// Encode every column of `table`, materializing deferred ones on the way.
    pub fn pack(&self, table: &mut LogicalTable) -> TetherResult<TableHandle> {
        debug!("packing a table of {} columns", table.ncols());
        table::pack(&self.engine, table, self.options.verify_shapes)
    }

    /// Decode `table` into the logical columns of `schema`, see [`LogicalTable`].
    ///
    /// `index_map[slot]` is the logical column physical column `slot` becomes, or `-1` to skip
    /// the slot.
    pub fn unpack(
        &self,
        table: TableHandle,
        index_map: &[i64],
        schema: Arc<TableSchema>,
    ) -> TetherResult<LogicalTable> {
        table::unpack(table, index_map, schema)
    }

    /// A zeroed native-owned array of `len` rows.
    pub fn alloc_numpy(&self, len: usize, ptype: PType) -> TetherResult<ArrayHandle> {
        ops::alloc(&self.engine, len, ptype, false)
    }

    /// A native-owned array of `len` null rows.
    pub fn alloc_nullable_array(&self, len: usize, ptype: PType) -> TetherResult<ArrayHandle> {
        ops::alloc(&self.engine, len, ptype, true)
    }

    /// A native-owned string array of `len` null rows with room for `n_chars` bytes.
    pub fn alloc_string_array(&self, len: usize, n_chars: usize) -> TetherResult<ArrayHandle> {
        ops::alloc_string(&self.engine, len, n_chars)
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_are_verified_by_default() {
        assert!(SessionOptions::default().verify_shapes());
        assert!(!SessionOptions::default().with_verify_shapes(false).verify_shapes());
    }
}
