//! Whole tables across the boundary.

use std::ptr::NonNull;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, trace};
use tether_array::{LogicalTable, TableSchema};
use tether_error::{TetherResult, tether_bail};
use tether_native::NativeEngine;

use crate::decode::decode;
use crate::encode::encode;
use crate::handle::{ArrayHandle, TableHandle, same_engine};
use crate::native::{check, check_table};

/// Assemble a table from columns. Ownership of every column passes to the table, even on
/// failure.
pub(crate) fn to_table(
    engine: &Arc<dyn NativeEngine>,
    columns: Vec<ArrayHandle>,
) -> TetherResult<TableHandle> {
    if columns.iter().any(|c| !same_engine(c.engine(), engine)) {
        tether_bail!("every column of a table must come from the same engine");
    }
    let infos = columns.into_iter().map(ArrayHandle::into_raw).collect_vec();
    debug!("assembling a table of {} columns", infos.len());
    let ptr = unsafe { engine.arr_info_list_to_table(infos.as_ptr(), infos.len() as u64) };
    check_table(engine, "arr_info_list_to_table", ptr)
}

/// Split a table into its columns, consuming the table.
pub(crate) fn from_table(table: TableHandle) -> TetherResult<Vec<ArrayHandle>> {
    let engine = table.engine().clone();
    let ncols = table.ncols()?;
    let mut infos = Vec::with_capacity(ncols);
    for i in 0..ncols {
        let ptr = unsafe { engine.info_from_table(table.as_ptr(), i as u64) };
        check(engine.as_ref(), "info_from_table")?;
        let Some(ptr) = NonNull::new(ptr) else {
            tether_bail!(NativeCallFailed: "info_from_table", format!("column {i} is null"));
        };
        infos.push(ptr);
    }
    // The table owns its columns until they are adopted here.
    let columns = infos
        .into_iter()
        .map(|ptr| unsafe { ArrayHandle::from_raw(engine.clone(), ptr) })
        .collect_vec();
    unsafe { table.delete_table()? };
    trace!("split a table into {ncols} columns");
    Ok(columns)
}

/// Encode every column of `table` in logical order, materializing deferred columns first.
pub(crate) fn pack(
    engine: &Arc<dyn NativeEngine>,
    table: &mut LogicalTable,
    verify_shapes: bool,
) -> TetherResult<TableHandle> {
    let schema = table.schema().clone();
    let mut columns = Vec::with_capacity(schema.ncols());
    for (i, dtype) in schema.dtypes().iter().enumerate() {
        let array = table.materialize(i)?;
        columns.push(encode(engine, array, dtype, verify_shapes)?);
    }
    to_table(engine, columns)
}

/// Decode a table into the columns of `schema`.
///
/// `index_map[slot]` names the logical column that physical column `slot` fills, or is `-1`
/// when the slot has no output column. Logical columns that no slot fills stay missing. The
/// row count comes from the last decoded column.
pub(crate) fn unpack(
    table: TableHandle,
    index_map: &[i64],
    schema: Arc<TableSchema>,
) -> TetherResult<LogicalTable> {
    let columns = from_table(table)?;
    if columns.len() != index_map.len() {
        tether_bail!(
            "index map has {} entries for a table of {} columns",
            index_map.len(),
            columns.len()
        );
    }
    let mut filled = vec![false; schema.ncols()];
    let mut out = LogicalTable::empty(schema.clone());
    for (slot, (&logical, column)) in index_map.iter().zip_eq(columns).enumerate() {
        let Ok(logical) = usize::try_from(logical) else {
            trace!("physical column {slot} has no output column");
            continue;
        };
        if logical >= schema.ncols() {
            tether_bail!(OutOfBounds: logical, 0, schema.ncols());
        }
        if std::mem::replace(&mut filled[logical], true) {
            tether_bail!("logical column {} is filled twice", logical);
        }
        let array = decode(&column, schema.dtype(logical))?;
        out.set_column(logical, array)?;
    }
    Ok(out)
}
