//! Gateways to the engine's table operations.
//!
//! Every gateway forwards its parameters in the order the native entry point expects, checks
//! for a pending error and returns a new handle. Inputs are never consumed or modified.

use std::ffi::{CString, c_void};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use tether_dtype::PType;
use tether_error::{TetherResult, tether_bail, tether_err};
use tether_native::{AggFunc, Keep, NativeEngine, array_info, table_info};

use crate::handle::{ArrayHandle, ShuffleInfo, TableHandle, same_engine};
use crate::native::{check, check_array, check_table};

fn opaque(callback: Option<NonNull<c_void>>) -> *const c_void {
    callback.map_or(ptr::null(), |cb| cb.as_ptr().cast_const())
}

/// Pointer to the first element, or null for an empty list.
fn ptr_or_null<T>(values: &[T]) -> *const T {
    if values.is_empty() {
        ptr::null()
    } else {
        values.as_ptr()
    }
}

fn count(n: usize, what: &str) -> TetherResult<i64> {
    i64::try_from(n).map_err(|_| tether_err!("{} {} does not fit the native call", what, n))
}

fn same_engines(handles: &[&Arc<dyn NativeEngine>]) -> TetherResult<()> {
    if !handles.iter().tuple_windows().all(|(a, b)| same_engine(a, b)) {
        tether_bail!("handles of one operation must come from the same engine");
    }
    Ok(())
}

fn dummy_table(table: Option<&TableHandle>) -> *mut table_info {
    table.map_or(ptr::null_mut(), TableHandle::as_ptr)
}

/// Flatten per-column function lists into `ftypes` and `func_offsets`.
fn function_codes(funcs: &[Vec<AggFunc>]) -> TetherResult<(Vec<i32>, Vec<i32>)> {
    let mut ftypes = Vec::new();
    let mut offsets = vec![0i32];
    for column in funcs {
        ftypes.extend(column.iter().map(|&f| i32::from(f)));
        offsets.push(
            i32::try_from(ftypes.len())
                .map_err(|_| tether_err!("{} aggregations are too many", ftypes.len()))?,
        );
    }
    Ok((ftypes, offsets))
}

/// Opaque callbacks of compiled user-defined reductions, forwarded untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdfCallbacks {
    pub update: Option<NonNull<c_void>>,
    pub combine: Option<NonNull<c_void>>,
    pub eval: Option<NonNull<c_void>>,
    pub general: Option<NonNull<c_void>>,
}

/// Parameters of [`hash_join`].
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    pub left_parallel: bool,
    pub right_parallel: bool,
    /// Leading key columns of both tables.
    pub n_keys: usize,
    pub n_data_left: usize,
    pub n_data_right: usize,
    pub same_key: Vec<i64>,
    pub need_typechange: Vec<i64>,
    /// Keep unmatched left rows.
    pub is_left: bool,
    /// Keep unmatched right rows.
    pub is_right: bool,
    pub is_join: bool,
    pub optional_col: bool,
    /// Append a categorical column telling where each row came from.
    pub indicator: bool,
    /// Whether null keys match each other.
    pub na_equal: bool,
    pub cond_func: Option<NonNull<c_void>>,
    pub left_cond_columns: Vec<u64>,
    pub right_cond_columns: Vec<u64>,
}

/// Equi-join `left` and `right` on their leading key columns.
pub fn hash_join(
    left: &TableHandle,
    right: &TableHandle,
    options: &JoinOptions,
) -> TetherResult<TableHandle> {
    let engine = left.engine();
    same_engines(&[engine, right.engine()])?;
    debug!(
        "hash join on {} keys (left {}, right {})",
        options.n_keys, options.is_left, options.is_right
    );
    let ptr = unsafe {
        engine.hash_join_table(
            left.as_ptr(),
            right.as_ptr(),
            options.left_parallel,
            options.right_parallel,
            count(options.n_keys, "key count")?,
            count(options.n_data_left, "left data count")?,
            count(options.n_data_right, "right data count")?,
            ptr_or_null(&options.same_key),
            ptr_or_null(&options.need_typechange),
            options.is_left,
            options.is_right,
            options.is_join,
            options.optional_col,
            options.indicator,
            options.na_equal,
            opaque(options.cond_func),
            ptr_or_null(&options.left_cond_columns),
            count(options.left_cond_columns.len(), "condition column count")?,
            ptr_or_null(&options.right_cond_columns),
            count(options.right_cond_columns.len(), "condition column count")?,
        )
    };
    check_table(engine, "hash_join_table", ptr)
}

/// Parameters of [`groupby_and_aggregate`].
#[derive(Debug, Clone, Default)]
pub struct GroupByOptions<'a> {
    pub n_keys: usize,
    /// The last column is an index carried alongside the data.
    pub input_has_index: bool,
    /// Functions applied to each data column, in column order.
    pub funcs: Vec<Vec<AggFunc>>,
    pub udf_n_redvars: Vec<i32>,
    pub is_parallel: bool,
    /// Skip nulls instead of letting them poison a group.
    pub skipdropna: bool,
    pub shift_periods: i64,
    pub transform_func: i64,
    pub head_n: i64,
    /// Emit the key columns before the aggregates.
    pub return_keys: bool,
    pub return_index: bool,
    /// Drop groups whose key has a null.
    pub dropna: bool,
    pub callbacks: UdfCallbacks,
    pub udf_table: Option<&'a TableHandle>,
}

/// Group rows on the leading key columns and aggregate every data column.
pub fn groupby_and_aggregate(
    table: &TableHandle,
    options: &GroupByOptions<'_>,
) -> TetherResult<TableHandle> {
    let engine = table.engine();
    if let Some(udf) = options.udf_table {
        same_engines(&[engine, udf.engine()])?;
    }
    let (ftypes, offsets) = function_codes(&options.funcs)?;
    debug!(
        "group by {} keys with {} aggregations",
        options.n_keys,
        ftypes.len()
    );
    let ptr = unsafe {
        engine.groupby_and_aggregate(
            table.as_ptr(),
            count(options.n_keys, "key count")?,
            options.input_has_index,
            ftypes.as_ptr(),
            offsets.as_ptr(),
            ptr_or_null(&options.udf_n_redvars),
            options.is_parallel,
            options.skipdropna,
            options.shift_periods,
            options.transform_func,
            options.head_n,
            options.return_keys,
            options.return_index,
            options.dropna,
            opaque(options.callbacks.update),
            opaque(options.callbacks.combine),
            opaque(options.callbacks.eval),
            opaque(options.callbacks.general),
            dummy_table(options.udf_table),
        )
    };
    check_table(engine, "groupby_and_aggregate", ptr)
}

/// Parameters of [`pivot_groupby_and_aggregate`].
#[derive(Debug, Clone, Default)]
pub struct PivotOptions<'a> {
    pub n_keys: usize,
    pub input_has_index: bool,
    /// Functions applied to each data column. Ignored for a crosstab.
    pub funcs: Vec<Vec<AggFunc>>,
    pub udf_n_redvars: Vec<i32>,
    pub is_parallel: bool,
    /// Count rows per key and pivot value instead of aggregating data columns.
    pub is_crosstab: bool,
    pub skipdropna: bool,
    pub return_keys: bool,
    pub return_index: bool,
    pub callbacks: UdfCallbacks,
    pub dispatch_info: Option<&'a TableHandle>,
    pub udf_table: Option<&'a TableHandle>,
}

/// Group and aggregate, spreading every data column over the pivot values listed in the first
/// column of `dispatch`. The pivot column is the last column of `table`.
pub fn pivot_groupby_and_aggregate(
    table: &TableHandle,
    dispatch: &TableHandle,
    options: &PivotOptions<'_>,
) -> TetherResult<TableHandle> {
    let engine = table.engine();
    let mut engines = vec![engine, dispatch.engine()];
    engines.extend(options.dispatch_info.map(TableHandle::engine));
    engines.extend(options.udf_table.map(TableHandle::engine));
    same_engines(&engines)?;
    let (ftypes, offsets) = function_codes(&options.funcs)?;
    let ptr = unsafe {
        engine.pivot_groupby_and_aggregate(
            table.as_ptr(),
            count(options.n_keys, "key count")?,
            dispatch.as_ptr(),
            dummy_table(options.dispatch_info),
            options.input_has_index,
            ftypes.as_ptr(),
            offsets.as_ptr(),
            ptr_or_null(&options.udf_n_redvars),
            options.is_parallel,
            options.is_crosstab,
            options.skipdropna,
            options.return_keys,
            options.return_index,
            opaque(options.callbacks.update),
            opaque(options.callbacks.combine),
            opaque(options.callbacks.eval),
            dummy_table(options.udf_table),
        )
    };
    check_table(engine, "pivot_groupby_and_aggregate", ptr)
}

/// Parameters of [`sort_values`]. There is one key column per `ascending` entry.
#[derive(Debug, Clone, Default)]
pub struct SortOptions {
    pub ascending: Vec<bool>,
    /// Per key, whether nulls sort after every value.
    pub na_last: Vec<bool>,
    pub is_parallel: bool,
}

/// Stable sort on the leading key columns.
pub fn sort_values(table: &TableHandle, options: &SortOptions) -> TetherResult<TableHandle> {
    if options.ascending.len() != options.na_last.len() {
        tether_bail!(
            "{} sort directions for {} null positions",
            options.ascending.len(),
            options.na_last.len()
        );
    }
    let ascending = options.ascending.iter().map(|&a| i64::from(a)).collect_vec();
    let na_position = options.na_last.iter().map(|&n| i64::from(n)).collect_vec();
    let engine = table.engine();
    let ptr = unsafe {
        engine.sort_values_table(
            table.as_ptr(),
            count(ascending.len(), "key count")?,
            ascending.as_ptr(),
            na_position.as_ptr(),
            options.is_parallel,
        )
    };
    check_table(engine, "sort_values_table", ptr)
}

/// Parameters of [`drop_duplicates`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DropDuplicatesOptions {
    pub is_parallel: bool,
    pub n_keys: usize,
    pub keep: Keep,
    /// Drop rows with a null key.
    pub dropna: bool,
    pub drop_local_first: bool,
}

/// Drop rows whose leading key columns repeat.
pub fn drop_duplicates(
    table: &TableHandle,
    options: &DropDuplicatesOptions,
) -> TetherResult<TableHandle> {
    let engine = table.engine();
    let ptr = unsafe {
        engine.drop_duplicates_table(
            table.as_ptr(),
            options.is_parallel,
            count(options.n_keys, "key count")?,
            options.keep.into(),
            options.dropna,
            options.drop_local_first,
        )
    };
    check_table(engine, "drop_duplicates_table", ptr)
}

/// Parameters of [`sample`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleOptions {
    /// Number of rows, used when `frac` is `None`.
    pub n: usize,
    /// Fraction of the table's rows.
    pub frac: Option<f64>,
    pub replace: bool,
    pub is_parallel: bool,
}

/// Random rows of `table`.
pub fn sample(table: &TableHandle, options: &SampleOptions) -> TetherResult<TableHandle> {
    if options.frac.is_some_and(|frac| frac.is_nan() || frac < 0.0) {
        tether_bail!("sample fraction must be non-negative");
    }
    let engine = table.engine();
    let ptr = unsafe {
        engine.sample_table(
            table.as_ptr(),
            count(options.n, "sample size")?,
            options.frac.unwrap_or(-1.0),
            options.replace,
            options.is_parallel,
        )
    };
    check_table(engine, "sample_table", ptr)
}

/// Redistribute rows by the hash of the leading `n_keys` columns, optionally keeping the
/// metadata needed to reverse it.
pub fn shuffle_table(
    table: &TableHandle,
    n_keys: usize,
    is_parallel: bool,
    keep_comm_info: bool,
) -> TetherResult<TableHandle> {
    let engine = table.engine();
    let ptr = unsafe {
        engine.shuffle_table(
            table.as_ptr(),
            count(n_keys, "key count")?,
            is_parallel,
            i32::from(keep_comm_info),
        )
    };
    check_table(engine, "shuffle_table", ptr)
}

/// The metadata kept by a shuffle, if any.
pub fn get_shuffle_info(table: &TableHandle) -> TetherResult<Option<ShuffleInfo>> {
    let engine = table.engine();
    let ptr = unsafe { engine.get_shuffle_info(table.as_ptr()) };
    let info = NonNull::new(ptr).map(|ptr| unsafe { ShuffleInfo::from_raw(engine.clone(), ptr) });
    check(engine.as_ref(), "get_shuffle_info")?;
    Ok(info)
}

/// Send the rows of a shuffled table back to where `info` found them.
pub fn reverse_shuffle(table: &TableHandle, info: &ShuffleInfo) -> TetherResult<TableHandle> {
    let engine = table.engine();
    same_engines(&[engine, info.engine()])?;
    let ptr = unsafe { engine.reverse_shuffle_table(table.as_ptr(), info.as_ptr()) };
    check_table(engine, "reverse_shuffle_table", ptr)
}

/// Row order after [`shuffle_renormalization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Renormalization {
    /// Rows keep their order.
    #[default]
    InPlace,
    /// Rows are permuted by the engine's own generator.
    Random,
    /// Rows are permuted by a generator seeded with the given seed.
    Seeded(i64),
}

impl Renormalization {
    /// The native `random` mode and seed.
    fn codes(self) -> (i32, i64) {
        match self {
            Renormalization::InPlace => (0, 0),
            Renormalization::Random => (1, 0),
            Renormalization::Seeded(seed) => (2, seed),
        }
    }
}

/// Rebalance rows across workers.
pub fn shuffle_renormalization(
    table: &TableHandle,
    order: Renormalization,
    is_parallel: bool,
) -> TetherResult<TableHandle> {
    let (random, seed) = order.codes();
    let engine = table.engine();
    let ptr = unsafe { engine.shuffle_renormalization(table.as_ptr(), random, seed, is_parallel) };
    check_table(engine, "shuffle_renormalization", ptr)
}

/// Rebalance rows across the workers in `ranks` only.
pub fn shuffle_renormalization_group(
    table: &TableHandle,
    order: Renormalization,
    is_parallel: bool,
    ranks: &[i32],
) -> TetherResult<TableHandle> {
    if ranks.is_empty() {
        tether_bail!("a rank group needs at least one rank");
    }
    let (random, seed) = order.codes();
    let engine = table.engine();
    let ptr = unsafe {
        engine.shuffle_renormalization_group(
            table.as_ptr(),
            random,
            seed,
            is_parallel,
            count(ranks.len(), "rank count")?,
            ranks.as_ptr(),
        )
    };
    check_table(engine, "shuffle_renormalization_group", ptr)
}

/// Group labels of every row of a key table, from [`get_groupby_labels`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLabels {
    /// The group of each row, `-1` for rows dropped for a null key.
    pub labels: Vec<i64>,
    /// Rows ordered by group, dropped rows last.
    pub sort_idx: Vec<i64>,
    pub ngroups: usize,
}

/// Label the rows of `keys` with their group, groups in order of first appearance.
pub fn get_groupby_labels(
    keys: &TableHandle,
    dropna: bool,
    is_parallel: bool,
) -> TetherResult<GroupLabels> {
    let engine = keys.engine();
    let nrows = unsafe { engine.table_nrows(keys.as_ptr()) };
    check(engine.as_ref(), "table_nrows")?;
    let nrows = usize::try_from(nrows).map_err(|_| tether_err!("table reports {} rows", nrows))?;

    let mut labels = vec![0i64; nrows];
    let mut sort_idx = vec![0i64; nrows];
    let ngroups = unsafe {
        engine.get_groupby_labels(
            keys.as_ptr(),
            labels.as_mut_ptr(),
            sort_idx.as_mut_ptr(),
            dropna,
            is_parallel,
        )
    };
    check(engine.as_ref(), "get_groupby_labels")?;
    let ngroups = usize::try_from(ngroups).map_err(|_| {
        tether_err!(NativeCallFailed: "get_groupby_labels", format!("{ngroups} groups"))
    })?;
    debug!("labelled {nrows} rows with {ngroups} groups");
    Ok(GroupLabels {
        labels,
        sort_idx,
        ngroups,
    })
}

/// A native-owned string output with every row null.
pub(crate) fn alloc_string(
    engine: &Arc<dyn NativeEngine>,
    len: usize,
    n_chars: usize,
) -> TetherResult<ArrayHandle> {
    let ptr = unsafe { engine.alloc_string_array(len as u64, n_chars as u64) };
    check_array(engine, "alloc_string_array", ptr)
}

/// A zeroed native-owned output array, nullable ones with every row null.
pub(crate) fn alloc(
    engine: &Arc<dyn NativeEngine>,
    len: usize,
    ptype: PType,
    nullable: bool,
) -> TetherResult<ArrayHandle> {
    let ctype = ptype.c_type().into();
    let (entry, ptr): (&'static str, *mut array_info) = if nullable {
        ("alloc_nullable_array", unsafe {
            engine.alloc_nullable_array(len as u64, ctype)
        })
    } else {
        ("alloc_numpy", unsafe { engine.alloc_numpy(len as u64, ctype) })
    };
    check_array(engine, entry, ptr)
}

/// Whether each of the `len` rows of `input` occurs in `values`, as a boolean array.
pub fn isin(
    input: &ArrayHandle,
    len: usize,
    values: &ArrayHandle,
    is_parallel: bool,
) -> TetherResult<ArrayHandle> {
    let engine = input.engine();
    same_engines(&[engine, values.engine()])?;
    let out = alloc(engine, len, PType::Bool, false)?;
    unsafe { engine.array_isin(out.as_ptr(), input.as_ptr(), values.as_ptr(), is_parallel) };
    check(engine.as_ref(), "array_isin")?;
    Ok(out)
}

/// Whether each of the `len` string rows of `input` matches `pattern`, as a nullable boolean
/// array. Null rows stay null.
pub fn search_regex(
    input: &ArrayHandle,
    len: usize,
    pattern: &str,
    case_sensitive: bool,
) -> TetherResult<ArrayHandle> {
    let pattern = CString::new(pattern)?;
    let engine = input.engine();
    let out = alloc(engine, len, PType::Bool, true)?;
    unsafe {
        engine.get_search_regex(input.as_ptr(), case_sensitive, pattern.as_ptr(), out.as_ptr())
    };
    check(engine.as_ref(), "get_search_regex")?;
    Ok(out)
}
