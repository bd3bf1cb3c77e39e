//! The call protocol between the marshaling layer and a native compute engine.
//!
//! Every entry point takes and returns raw pointers in a fixed positional order. Failures are
//! never signalled through return values alone: an entry point that fails records a message in
//! the engine's pending-error slot, which the caller must drain with
//! [`NativeEngine::take_pending_error`] immediately after the call.
//!
//! Ownership tokens cross the boundary as `*const Allocation` pointers produced by
//! [`Allocation::into_raw`](tether_buffer::Allocation::into_raw). A token handed to a
//! constructor is always adopted by the engine, whether or not the call succeeds. A token
//! written to an accessor's out-parameter is a new strong reference owned by the caller.

use std::ffi::{c_char, c_void};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tether_buffer::Allocation;

/// Opaque native descriptor of one array.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct array_info {
    _private: [u8; 0],
}

/// Opaque native descriptor of an ordered list of arrays.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct table_info {
    _private: [u8; 0],
}

/// Opaque metadata that allows a shuffle to be reversed.
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct shuffle_info {
    _private: [u8; 0],
}

/// Selector for the values of a dictionary-encoded array in [`NativeEngine::get_nested_info`].
pub const DICT_VALUES: i32 = 1;
/// Selector for the indices of a dictionary-encoded array in [`NativeEngine::get_nested_info`].
pub const DICT_INDICES: i32 = 2;

/// Aggregation function codes understood by the group-by entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum AggFunc {
    NoOp = 0,
    Head,
    Transform,
    Size,
    Shift,
    Sum,
    Count,
    Nunique,
    Median,
    Cumsum,
    Cumprod,
    Cummin,
    Cummax,
    Mean,
    Min,
    Max,
    Prod,
    First,
    Last,
    Idxmin,
    Idxmax,
    Var,
    Std,
    Udf,
    GenUdf,
}

/// Which rows survive [`NativeEngine::drop_duplicates_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum Keep {
    /// The first row of each duplicate set.
    #[default]
    First = 0,
    /// The last row of each duplicate set.
    Last = 1,
    /// No row of a duplicated key.
    None = 2,
}

/// A native compute engine.
///
/// All methods taking raw pointers are `unsafe`: callers must pass pointers obtained from the
/// same engine (or null where documented) and honor the ownership rules of each entry point.
#[allow(clippy::too_many_arguments, clippy::missing_safety_doc)]
pub trait NativeEngine: Send + Sync {
    /// Drain the pending-error slot, returning the message of the first failure since the
    /// last call.
    fn take_pending_error(&self) -> Option<String>;

    // Leaf constructors.

    /// Borrow a fixed-width array with no validity.
    unsafe fn numpy_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        meminfo: *const Allocation,
    ) -> *mut array_info;

    /// Borrow the codes of a categorical array.
    unsafe fn categorical_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        num_categories: i64,
        meminfo: *const Allocation,
    ) -> *mut array_info;

    /// Borrow a fixed-width array and its validity bitmap.
    unsafe fn nullable_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        null_bitmap: *const u8,
        meminfo: *const Allocation,
        meminfo_bitmask: *const Allocation,
    ) -> *mut array_info;

    /// Borrow 128-bit decimals and their validity bitmap.
    unsafe fn decimal_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        null_bitmap: *const u8,
        meminfo: *const Allocation,
        meminfo_bitmask: *const Allocation,
        precision: i32,
        scale: i32,
    ) -> *mut array_info;

    /// Borrow the left and right bounds of an interval array.
    unsafe fn interval_array_to_info(
        &self,
        length: u64,
        left: *const u8,
        right: *const u8,
        ctype: i32,
        left_meminfo: *const Allocation,
        right_meminfo: *const Allocation,
    ) -> *mut array_info;

    /// Borrow a string or binary array. One token keeps all three buffers alive.
    unsafe fn string_array_to_info(
        &self,
        n_items: u64,
        n_chars: u64,
        chars: *const u8,
        offsets: *const u64,
        null_bitmap: *const u8,
        meminfo: *const Allocation,
        is_bytes: bool,
    ) -> *mut array_info;

    /// Combine a string values array and nullable `i32` indices into a dictionary array.
    ///
    /// Takes ownership of both input descriptors.
    unsafe fn dict_str_array_to_info(
        &self,
        values: *mut array_info,
        indices: *mut array_info,
        has_global_dictionary: bool,
    ) -> *mut array_info;

    /// Borrow a nested array described by flattened tags, buffers, lengths and field names.
    ///
    /// The number of entries read from each list is determined by walking `types`.
    unsafe fn nested_array_to_info(
        &self,
        types: *const i32,
        buffers: *const *const u8,
        lengths: *const i64,
        field_names: *const *const c_char,
        meminfo: *const Allocation,
    ) -> *mut array_info;

    // Accessors. None of them consume the descriptor.

    /// Read a fixed-width array with no nulls.
    unsafe fn info_to_numpy_array(
        &self,
        info: *mut array_info,
        ctype: *mut i32,
        n_items: *mut u64,
        data: *mut *const u8,
        meminfo: *mut *const Allocation,
    );

    /// Read a fixed-width or decimal array and its validity. A null bitmap means no nulls.
    unsafe fn info_to_nullable_array(
        &self,
        info: *mut array_info,
        ctype: *mut i32,
        n_items: *mut u64,
        data: *mut *const u8,
        null_bitmap: *mut *const u8,
        meminfo: *mut *const Allocation,
        meminfo_bitmask: *mut *const Allocation,
    );

    /// Read the bounds of an interval array.
    unsafe fn info_to_interval_array(
        &self,
        info: *mut array_info,
        ctype: *mut i32,
        n_items: *mut u64,
        left: *mut *const u8,
        right: *mut *const u8,
        left_meminfo: *mut *const Allocation,
        right_meminfo: *mut *const Allocation,
    );

    /// Read a string or binary array.
    unsafe fn info_to_string_array(
        &self,
        info: *mut array_info,
        n_items: *mut u64,
        n_chars: *mut u64,
        chars: *mut *const u8,
        offsets: *mut *const u64,
        null_bitmap: *mut *const u8,
        meminfo: *mut *const Allocation,
    );

    /// Read a nested array in the flattened layout of [`NativeEngine::nested_array_to_info`].
    ///
    /// `types` is the tag sequence the caller expects; a descriptor of any other shape is a
    /// failure. `n_lengths` and `n_buffers` hold the capacities of the output lists on entry
    /// and the number of entries written on return.
    unsafe fn info_to_nested_array(
        &self,
        info: *mut array_info,
        types: *const i32,
        n_types: u64,
        lengths: *mut i64,
        n_lengths: *mut u64,
        buffers: *mut *const u8,
        n_buffers: *mut u64,
        meminfo: *mut *const Allocation,
    );

    /// A new descriptor for the values ([`DICT_VALUES`]) or the indices ([`DICT_INDICES`]) of
    /// a dictionary array.
    unsafe fn get_nested_info(&self, info: *mut array_info, kind: i32) -> *mut array_info;

    /// Whether a dictionary array's values are a global dictionary.
    unsafe fn get_has_global_dictionary(&self, info: *mut array_info) -> bool;

    // Native-owned output allocation.

    /// Allocate a zeroed fixed-width array.
    unsafe fn alloc_numpy(&self, length: u64, ctype: i32) -> *mut array_info;

    /// Allocate a zeroed fixed-width array with every row null.
    unsafe fn alloc_nullable_array(&self, length: u64, ctype: i32) -> *mut array_info;

    /// Allocate a string array of `length` null rows with room for `n_chars` bytes.
    unsafe fn alloc_string_array(&self, length: u64, n_chars: u64) -> *mut array_info;

    // Tables and lifecycle.

    /// Assemble a table. Takes ownership of every descriptor, even on failure.
    unsafe fn arr_info_list_to_table(
        &self,
        infos: *const *mut array_info,
        n_infos: u64,
    ) -> *mut table_info;

    /// Column `index` of `table`. The returned descriptor is still owned by the table.
    unsafe fn info_from_table(&self, table: *mut table_info, index: u64) -> *mut array_info;

    /// Number of columns in `table`.
    unsafe fn table_ncols(&self, table: *mut table_info) -> u64;

    /// Number of rows in `table`.
    unsafe fn table_nrows(&self, table: *mut table_info) -> u64;

    /// Release a descriptor and the references it holds on its buffers.
    unsafe fn delete_info_decref_array(&self, info: *mut array_info);

    /// Release a table and every descriptor it owns.
    unsafe fn delete_table_decref_arrays(&self, table: *mut table_info);

    /// Release only the table's bookkeeping, leaving its descriptors alive.
    unsafe fn delete_table(&self, table: *mut table_info);

    /// Release shuffle metadata.
    unsafe fn delete_shuffle_info(&self, info: *mut shuffle_info);

    // Operations. Inputs are never consumed; every output is a new table or array.

    /// Redistribute rows by the hash of the first `n_keys` columns.
    unsafe fn shuffle_table(
        &self,
        table: *mut table_info,
        n_keys: i64,
        is_parallel: bool,
        keep_comm_info: i32,
    ) -> *mut table_info;

    /// The metadata kept by a shuffle, or null if none was kept.
    unsafe fn get_shuffle_info(&self, table: *mut table_info) -> *mut shuffle_info;

    /// Send rows back to where a shuffle found them.
    unsafe fn reverse_shuffle_table(
        &self,
        table: *mut table_info,
        info: *mut shuffle_info,
    ) -> *mut table_info;

    /// Equi-join two tables on their leading key columns.
    unsafe fn hash_join_table(
        &self,
        left: *mut table_info,
        right: *mut table_info,
        left_parallel: bool,
        right_parallel: bool,
        n_keys: i64,
        n_data_left: i64,
        n_data_right: i64,
        vect_same_key: *const i64,
        vect_need_typechange: *const i64,
        is_left: bool,
        is_right: bool,
        is_join: bool,
        optional_col: bool,
        indicator: bool,
        is_na_equal: bool,
        cond_func: *const c_void,
        left_cond_columns: *const u64,
        n_left_cond_columns: i64,
        right_cond_columns: *const u64,
        n_right_cond_columns: i64,
    ) -> *mut table_info;

    /// Stable sort on the leading key columns.
    unsafe fn sort_values_table(
        &self,
        table: *mut table_info,
        n_keys: i64,
        vect_ascending: *const i64,
        na_position: *const i64,
        is_parallel: bool,
    ) -> *mut table_info;

    /// Random rows, `n` of them or a fraction `frac` of the table when `frac` is non-negative.
    unsafe fn sample_table(
        &self,
        table: *mut table_info,
        n: i64,
        frac: f64,
        replace: bool,
        is_parallel: bool,
    ) -> *mut table_info;

    /// Rebalance rows across workers, optionally in random order.
    unsafe fn shuffle_renormalization(
        &self,
        table: *mut table_info,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
    ) -> *mut table_info;

    /// Rebalance rows across the `num_ranks` workers listed in `ranks`, leaving other workers
    /// without rows.
    unsafe fn shuffle_renormalization_group(
        &self,
        table: *mut table_info,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
        num_ranks: i64,
        ranks: *const i32,
    ) -> *mut table_info;

    /// Drop rows whose leading `n_keys` columns repeat.
    unsafe fn drop_duplicates_table(
        &self,
        table: *mut table_info,
        is_parallel: bool,
        n_keys: i64,
        keep: i64,
        dropna: bool,
        drop_local_first: bool,
    ) -> *mut table_info;

    /// Group rows by the leading key columns and aggregate each data column.
    unsafe fn groupby_and_aggregate(
        &self,
        table: *mut table_info,
        n_keys: i64,
        input_has_index: bool,
        ftypes: *const i32,
        func_offsets: *const i32,
        udf_n_redvars: *const i32,
        is_parallel: bool,
        skipdropna: bool,
        shift_periods: i64,
        transform_func: i64,
        head_n: i64,
        return_keys: bool,
        return_index: bool,
        dropna: bool,
        update_cb: *const c_void,
        combine_cb: *const c_void,
        eval_cb: *const c_void,
        general_udfs_cb: *const c_void,
        udf_table_dummy: *mut table_info,
    ) -> *mut table_info;

    /// Group and aggregate, spreading each data column over the values of a pivot column.
    unsafe fn pivot_groupby_and_aggregate(
        &self,
        table: *mut table_info,
        n_keys: i64,
        dispatch_table: *mut table_info,
        dispatch_info: *mut table_info,
        input_has_index: bool,
        ftypes: *const i32,
        func_offsets: *const i32,
        udf_n_redvars: *const i32,
        is_parallel: bool,
        is_crosstab: bool,
        skipdropna: bool,
        return_keys: bool,
        return_index: bool,
        update_cb: *const c_void,
        combine_cb: *const c_void,
        eval_cb: *const c_void,
        udf_table_dummy: *mut table_info,
    ) -> *mut table_info;

    /// Label every row of the key table with its group, groups numbered in order of first
    /// appearance.
    ///
    /// `group_labels` and `sort_idx` must each have room for one entry per row. Rows dropped
    /// for a null key under `dropna` get label `-1`. `sort_idx` lists the rows of group 0, then
    /// group 1 and so on, dropped rows last. Returns the number of groups, or `-1` on failure.
    unsafe fn get_groupby_labels(
        &self,
        table: *mut table_info,
        group_labels: *mut i64,
        sort_idx: *mut i64,
        dropna: bool,
        is_parallel: bool,
    ) -> i64;

    /// Write into the boolean array `out` whether each row of `input` occurs in `values`.
    unsafe fn array_isin(
        &self,
        out: *mut array_info,
        input: *mut array_info,
        values: *mut array_info,
        is_parallel: bool,
    );

    /// Write into the nullable boolean array `out` whether each row of `input` matches the
    /// regular expression `pattern`.
    unsafe fn get_search_regex(
        &self,
        input: *mut array_info,
        case_sensitive: bool,
        pattern: *const c_char,
        out: *mut array_info,
    );
}
