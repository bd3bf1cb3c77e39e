//! An in-process engine implementing the call protocol over engine-owned array nodes.
//!
//! The reference engine borrows caller memory exactly the way an out-of-process engine would:
//! every constructor adopts its ownership tokens, accessors hand out fresh tokens, and a
//! descriptor keeps the memory it views alive until it is released. Counters for live
//! descriptors, call counts and injected faults make the marshaling layer's ownership and
//! error handling observable in tests.

mod array;
mod datum;
mod groupby;
mod join;
mod nested;
mod search;
mod shuffle;
mod sort;
mod take;

use std::ffi::{CStr, c_char, c_void};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use itertools::Itertools;
use log::{debug, trace};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxBuildHasher;
use tether_buffer::{Allocation, Bitmap, Buffer, MemInfo};
use tether_dtype::{CTypeEnum, PType};
use tether_error::{TetherError, TetherResult, tether_bail, tether_err};

use crate::abi::{
    AggFunc, DICT_INDICES, DICT_VALUES, Keep, NativeEngine, array_info, shuffle_info, table_info,
};
use crate::reference::array::{
    ArrayInfo, LiveCount, NativeArray, ShuffleInfo, TableInfo, borrow, borrow_fixed,
    borrow_validity, leaf_ptype, zeroed,
};
use crate::reference::groupby::{GroupOptions, groupby, label_rows, pivot};
use crate::reference::join::{JoinPlan, hash_join};
use crate::reference::nested::{Flattened, NestedReader};
use crate::reference::search::{isin, search_regex};
use crate::reference::shuffle::{
    check_rank_group, renormalization_order, reverse_order, sample_rows, shuffle_order,
};
use crate::reference::sort::{drop_duplicates, sort_values};
use crate::reference::take::take_all;

/// Configuration of a [`ReferenceEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceEngineOptions {
    num_ranks: usize,
    seed: u64,
}

impl Default for ReferenceEngineOptions {
    fn default() -> Self {
        Self {
            num_ranks: 1,
            seed: 0,
        }
    }
}

impl ReferenceEngineOptions {
    /// The number of workers parallel shuffles distribute rows across.
    pub fn with_num_ranks(mut self, num_ranks: usize) -> Self {
        self.num_ranks = num_ranks;
        self
    }

    /// The seed of the engine's random generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The number of workers parallel shuffles distribute rows across.
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// The seed of the engine's random generator.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// A single-process [`NativeEngine`].
#[derive(Debug)]
pub struct ReferenceEngine {
    options: ReferenceEngineOptions,
    pending: Mutex<Option<String>>,
    faults: Mutex<HashMap<&'static str, String, FxBuildHasher>>,
    rng: Mutex<StdRng>,
    calls: AtomicUsize,
    live_arrays: LiveCount,
    live_tables: LiveCount,
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new(ReferenceEngineOptions::default())
    }
}

impl ReferenceEngine {
    /// Create an engine.
    pub fn new(options: ReferenceEngineOptions) -> Self {
        Self {
            options,
            pending: Mutex::new(None),
            faults: Mutex::new(HashMap::default()),
            rng: Mutex::new(StdRng::seed_from_u64(options.seed)),
            calls: AtomicUsize::new(0),
            live_arrays: LiveCount::default(),
            live_tables: LiveCount::default(),
        }
    }

    /// The options the engine was created with.
    pub fn options(&self) -> &ReferenceEngineOptions {
        &self.options
    }

    /// Array descriptors created by this engine and not yet released.
    pub fn live_arrays(&self) -> usize {
        self.live_arrays.get()
    }

    /// Table descriptors created by this engine and not yet released.
    pub fn live_tables(&self) -> usize {
        self.live_tables.get()
    }

    /// Entry points invoked so far, releases included.
    pub fn native_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next call to `entry_point` fail with `message` before doing any work.
    pub fn fail_next(&self, entry_point: &'static str, message: impl Into<String>) {
        self.faults.lock().insert(entry_point, message.into());
    }

    fn count(&self, entry: &'static str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        trace!("native call {entry}");
    }

    /// Count the call and fire any fault injected for it.
    fn enter(&self, entry: &'static str) -> bool {
        self.count(entry);
        let fault = self.faults.lock().remove(entry);
        match fault {
            Some(message) => {
                self.raise(entry, message);
                false
            }
            None => true,
        }
    }

    fn raise(&self, entry: &'static str, message: String) {
        debug!("{entry} failed: {message}");
        let mut pending = self.pending.lock();
        if pending.is_none() {
            *pending = Some(message);
        }
    }

    /// Run an entry point, recording its failure in the pending-error slot.
    fn call<T>(&self, entry: &'static str, f: impl FnOnce() -> TetherResult<T>) -> Option<T> {
        if !self.enter(entry) {
            return None;
        }
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                self.raise(entry, first_line(&err));
                None
            }
        }
    }

    fn create(
        &self,
        entry: &'static str,
        f: impl FnOnce() -> TetherResult<NativeArray>,
    ) -> *mut array_info {
        self.call(entry, f)
            .map_or(ptr::null_mut(), |array| ArrayInfo::into_raw(array, &self.live_arrays))
    }

    fn create_table(
        &self,
        entry: &'static str,
        f: impl FnOnce() -> TetherResult<(Vec<NativeArray>, Option<Vec<usize>>)>,
    ) -> *mut table_info {
        self.call(entry, f)
            .map_or(ptr::null_mut(), |(columns, shuffle)| {
                self.table(columns, shuffle)
            })
    }

    fn table(&self, columns: Vec<NativeArray>, shuffle: Option<Vec<usize>>) -> *mut table_info {
        let columns = columns
            .into_iter()
            .map(|array| ArrayInfo::into_raw(array, &self.live_arrays))
            .collect();
        TableInfo::into_raw(columns, shuffle, &self.live_tables)
    }
}

fn first_line(err: &TetherError) -> String {
    err.to_string().lines().next().unwrap_or_default().to_string()
}

/// # Safety
///
/// A non-null `meminfo` must come from [`Allocation::into_raw`].
unsafe fn adopt(meminfo: *const Allocation) -> Option<MemInfo> {
    (!meminfo.is_null()).then(|| unsafe { Allocation::from_raw(meminfo) })
}

fn owned(token: Option<MemInfo>) -> TetherResult<MemInfo> {
    token.ok_or_else(|| tether_err!("missing ownership token"))
}

/// # Safety
///
/// As for [`borrow_validity`].
unsafe fn adopt_validity(
    bitmap: *const u8,
    len: usize,
    token: Option<MemInfo>,
) -> TetherResult<Bitmap> {
    match token {
        Some(token) => unsafe { borrow_validity(bitmap, len, &token) },
        None if bitmap.is_null() => Ok(Bitmap::new_valid(len)),
        None => tether_bail!("missing ownership token for a validity bitmap"),
    }
}

fn to_usize(value: i64, what: &str) -> TetherResult<usize> {
    usize::try_from(value).map_err(|_| tether_err!("{} must not be negative, got {}", what, value))
}

fn all_rows(order: &[usize]) -> Vec<Option<usize>> {
    order.iter().copied().map(Some).collect()
}

/// # Safety
///
/// A non-null `ptr` must come from [`ArrayInfo::into_raw`] and still be alive.
unsafe fn array<'a>(ptr: *mut array_info) -> TetherResult<&'a NativeArray> {
    unsafe { ArrayInfo::from_ptr(ptr) }
        .map(|info| &info.array)
        .ok_or_else(|| tether_err!("null array descriptor"))
}

/// # Safety
///
/// A non-null `ptr` must come from [`TableInfo::into_raw`] and still be alive.
unsafe fn table<'a>(ptr: *mut table_info) -> TetherResult<&'a TableInfo> {
    unsafe { TableInfo::from_ptr(ptr) }.ok_or_else(|| tether_err!("null table descriptor"))
}

/// # Safety
///
/// As for [`table`].
unsafe fn columns<'a>(ptr: *mut table_info) -> TetherResult<Vec<&'a NativeArray>> {
    Ok(unsafe { table(ptr)?.arrays() })
}

fn table_len(columns: &[&NativeArray]) -> usize {
    columns.first().map_or(0, |c| c.len())
}

/// # Safety
///
/// A non-null `ptr` must point to `len` initialized items.
unsafe fn slice<'a, T>(ptr: *const T, len: usize) -> TetherResult<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        tether_bail!("null list of {} entries", len);
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

fn no_callbacks(callbacks: &[*const c_void]) -> TetherResult<()> {
    if callbacks.iter().any(|cb| !cb.is_null()) {
        tether_bail!("user-defined aggregation callbacks are not supported");
    }
    Ok(())
}

/// The functions of each of `n_data` data columns.
///
/// # Safety
///
/// `func_offsets` must hold `n_data + 1` entries and `ftypes` as many as the last offset.
unsafe fn aggregations(
    ftypes: *const i32,
    func_offsets: *const i32,
    n_data: usize,
) -> TetherResult<Vec<Vec<AggFunc>>> {
    let offsets: Vec<usize> = unsafe { slice(func_offsets, n_data + 1)? }
        .iter()
        .map(|&offset| to_usize(offset.into(), "function offset"))
        .try_collect()?;
    if !offsets.is_sorted() {
        tether_bail!("function offsets {:?} are not ascending", offsets);
    }
    let funcs: Vec<AggFunc> = unsafe { slice(ftypes, offsets.last().copied().unwrap_or(0))? }
        .iter()
        .map(|&code| {
            AggFunc::try_from(code).map_err(|_| tether_err!("unknown aggregation code {}", code))
        })
        .try_collect()?;
    Ok(offsets
        .iter()
        .tuple_windows()
        .map(|(&start, &end)| funcs[start..end].to_vec())
        .collect())
}

/// Replace the contents of a caller-allocated output with `result`.
///
/// # Safety
///
/// As for [`array`].
unsafe fn store(out: *mut array_info, result: NativeArray) -> TetherResult<()> {
    let Some(out) = (unsafe { ArrayInfo::from_ptr(out) }) else {
        tether_bail!("null output descriptor");
    };
    if out.array.kind() != result.kind()
        || out.array.ctype() != result.ctype()
        || out.array.len() != result.len()
    {
        tether_bail!(
            "output is a {} {} array of {} rows, result is a {} {} array of {} rows",
            out.array.kind(),
            out.array.ctype(),
            out.array.len(),
            result.kind(),
            result.ctype(),
            result.len()
        );
    }
    out.array = result;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
impl NativeEngine for ReferenceEngine {
    fn take_pending_error(&self) -> Option<String> {
        self.pending.lock().take()
    }

    unsafe fn numpy_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        meminfo: *const Allocation,
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        self.create("numpy_array_to_info", || {
            let ptype = leaf_ptype(ctype)?;
            let data = unsafe { borrow_fixed(data, length as usize, ptype, &owned(token)?)? };
            Ok(NativeArray::Numpy { ptype, data })
        })
    }

    unsafe fn categorical_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        num_categories: i64,
        meminfo: *const Allocation,
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        self.create("categorical_array_to_info", || {
            let ptype = leaf_ptype(ctype)?;
            if ptype.is_float() || !ptype.is_signed() {
                tether_bail!("categorical codes must be signed integers, got {}", ptype);
            }
            let data = unsafe { borrow_fixed(data, length as usize, ptype, &owned(token)?)? };
            Ok(NativeArray::Categorical {
                ptype,
                data,
                num_categories,
            })
        })
    }

    unsafe fn nullable_array_to_info(
        &self,
        length: u64,
        data: *const u8,
        ctype: i32,
        null_bitmap: *const u8,
        meminfo: *const Allocation,
        meminfo_bitmask: *const Allocation,
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        let mask_token = unsafe { adopt(meminfo_bitmask) };
        self.create("nullable_array_to_info", || {
            let ptype = leaf_ptype(ctype)?;
            let len = length as usize;
            Ok(NativeArray::Nullable {
                ptype,
                data: unsafe { borrow_fixed(data, len, ptype, &owned(token)?)? },
                validity: unsafe { adopt_validity(null_bitmap, len, mask_token)? },
            })
        })
    }

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
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        let mask_token = unsafe { adopt(meminfo_bitmask) };
        self.create("decimal_array_to_info", || {
            if ctype != i32::from(CTypeEnum::Decimal) {
                tether_bail!("decimal arrays must be tagged {}, got {}", CTypeEnum::Decimal, ctype);
            }
            let len = length as usize;
            Ok(NativeArray::Decimal {
                precision,
                scale,
                data: unsafe { borrow(data.cast::<i128>(), len, &owned(token)?)? },
                validity: unsafe { adopt_validity(null_bitmap, len, mask_token)? },
            })
        })
    }

    unsafe fn interval_array_to_info(
        &self,
        length: u64,
        left: *const u8,
        right: *const u8,
        ctype: i32,
        left_meminfo: *const Allocation,
        right_meminfo: *const Allocation,
    ) -> *mut array_info {
        let left_token = unsafe { adopt(left_meminfo) };
        let right_token = unsafe { adopt(right_meminfo) };
        self.create("interval_array_to_info", || {
            let ptype = leaf_ptype(ctype)?;
            let len = length as usize;
            Ok(NativeArray::Interval {
                ptype,
                left: unsafe { borrow_fixed(left, len, ptype, &owned(left_token)?)? },
                right: unsafe { borrow_fixed(right, len, ptype, &owned(right_token)?)? },
            })
        })
    }

    unsafe fn string_array_to_info(
        &self,
        n_items: u64,
        n_chars: u64,
        chars: *const u8,
        offsets: *const u64,
        null_bitmap: *const u8,
        meminfo: *const Allocation,
        is_bytes: bool,
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        self.create("string_array_to_info", || {
            let token = owned(token)?;
            let len = n_items as usize;
            let offsets = unsafe { borrow(offsets, len + 1, &token)? };
            if !offsets.is_sorted() || offsets.last().copied() != Some(n_chars) {
                tether_bail!("string offsets must ascend to {} characters", n_chars);
            }
            Ok(NativeArray::String {
                binary: is_bytes,
                offsets,
                chars: unsafe { borrow(chars, n_chars as usize, &token)? },
                validity: unsafe { borrow_validity(null_bitmap, len, &token)? },
            })
        })
    }

    unsafe fn dict_str_array_to_info(
        &self,
        values: *mut array_info,
        indices: *mut array_info,
        has_global_dictionary: bool,
    ) -> *mut array_info {
        let values = unsafe { ArrayInfo::take(values) };
        let indices = unsafe { ArrayInfo::take(indices) };
        self.create("dict_str_array_to_info", || {
            let (Some(values), Some(indices)) = (values, indices) else {
                tether_bail!("null dictionary part");
            };
            let values = values.into_array();
            if !matches!(values, NativeArray::String { .. }) {
                tether_bail!("dictionary values must be strings, got {}", values.kind());
            }
            let (data, validity) = match indices.into_array() {
                NativeArray::Nullable {
                    ptype: PType::I32,
                    data,
                    validity,
                } => (data, validity),
                NativeArray::Numpy {
                    ptype: PType::I32,
                    data,
                } => {
                    let len = data.len() / 4;
                    (data, Bitmap::new_valid(len))
                }
                other => tether_bail!(
                    "dictionary indices must be i32, got {} {}",
                    other.kind(),
                    other.ctype()
                ),
            };
            let codes = Buffer::<i32>::from_byte_buffer(data);
            let out_of_range = codes
                .iter()
                .zip(validity.iter())
                .any(|(&code, valid)| valid && (code < 0 || code as usize >= values.len()));
            if out_of_range {
                tether_bail!("dictionary index outside {} values", values.len());
            }
            Ok(NativeArray::Dict {
                values: Arc::new(values),
                indices: codes,
                validity,
                global: has_global_dictionary,
            })
        })
    }

    unsafe fn nested_array_to_info(
        &self,
        types: *const i32,
        buffers: *const *const u8,
        lengths: *const i64,
        field_names: *const *const c_char,
        meminfo: *const Allocation,
    ) -> *mut array_info {
        let token = unsafe { adopt(meminfo) };
        self.create("nested_array_to_info", || {
            if types.is_null() || buffers.is_null() || lengths.is_null() || field_names.is_null() {
                tether_bail!("null nested description");
            }
            let token = owned(token)?;
            let array =
                unsafe { NestedReader::new(types, buffers, lengths, field_names, token).read()? };
            if !matches!(array, NativeArray::List { .. } | NativeArray::Struct { .. }) {
                tether_bail!("nested description of a {} array", array.kind());
            }
            Ok(array)
        })
    }

    unsafe fn info_to_numpy_array(
        &self,
        info: *mut array_info,
        ctype_out: *mut i32,
        n_items: *mut u64,
        data_out: *mut *const u8,
        meminfo: *mut *const Allocation,
    ) {
        self.call("info_to_numpy_array", || {
            let array = unsafe { array(info)? };
            let (ptype, data) = match array {
                NativeArray::Numpy { ptype, data }
                | NativeArray::Categorical { ptype, data, .. } => (ptype, data),
                NativeArray::Nullable {
                    ptype,
                    data,
                    validity,
                } if validity.null_count() == 0 => (ptype, data),
                other => tether_bail!("a {} array cannot be read as numpy", other.kind()),
            };
            unsafe {
                *ctype_out = ptype.c_type().into();
                *n_items = array.len() as u64;
                *data_out = data.as_ptr();
                *meminfo = Allocation::into_raw(data.meminfo());
            }
            Ok(())
        });
    }

    unsafe fn info_to_nullable_array(
        &self,
        info: *mut array_info,
        ctype_out: *mut i32,
        n_items: *mut u64,
        data_out: *mut *const u8,
        null_bitmap: *mut *const u8,
        meminfo: *mut *const Allocation,
        meminfo_bitmask: *mut *const Allocation,
    ) {
        self.call("info_to_nullable_array", || {
            let array = unsafe { array(info)? };
            let (ctype, data, validity) = match array {
                NativeArray::Numpy { ptype, data } => (ptype.c_type(), data.clone(), None),
                NativeArray::Nullable {
                    ptype,
                    data,
                    validity,
                } => (ptype.c_type(), data.clone(), Some(validity)),
                NativeArray::Decimal { data, validity, .. } => (
                    CTypeEnum::Decimal,
                    data.clone().into_byte_buffer(),
                    Some(validity),
                ),
                other => tether_bail!("a {} array cannot be read as nullable", other.kind()),
            };
            unsafe {
                *ctype_out = ctype.into();
                *n_items = array.len() as u64;
                *data_out = data.as_ptr();
                *meminfo = Allocation::into_raw(data.into_meminfo());
                *null_bitmap = validity.map_or(ptr::null(), |v| v.buffer().as_ptr());
                *meminfo_bitmask =
                    validity.map_or(ptr::null(), |v| Allocation::into_raw(v.buffer().meminfo()));
            }
            Ok(())
        });
    }

    unsafe fn info_to_interval_array(
        &self,
        info: *mut array_info,
        ctype_out: *mut i32,
        n_items: *mut u64,
        left_out: *mut *const u8,
        right_out: *mut *const u8,
        left_meminfo: *mut *const Allocation,
        right_meminfo: *mut *const Allocation,
    ) {
        self.call("info_to_interval_array", || {
            let NativeArray::Interval { ptype, left, right } = (unsafe { array(info)? }) else {
                tether_bail!("not an interval array");
            };
            unsafe {
                *ctype_out = ptype.c_type().into();
                *n_items = (left.len() / ptype.byte_width()) as u64;
                *left_out = left.as_ptr();
                *right_out = right.as_ptr();
                *left_meminfo = Allocation::into_raw(left.meminfo());
                *right_meminfo = Allocation::into_raw(right.meminfo());
            }
            Ok(())
        });
    }

    unsafe fn info_to_string_array(
        &self,
        info: *mut array_info,
        n_items: *mut u64,
        n_chars: *mut u64,
        chars_out: *mut *const u8,
        offsets_out: *mut *const u64,
        null_bitmap: *mut *const u8,
        meminfo: *mut *const Allocation,
    ) {
        self.call("info_to_string_array", || {
            let array = unsafe { array(info)? };
            let NativeArray::String {
                offsets,
                chars,
                validity,
                ..
            } = array
            else {
                tether_bail!("a {} array cannot be read as strings", array.kind());
            };
            let token = Allocation::new((offsets.clone(), chars.clone(), validity.clone()));
            unsafe {
                *n_items = validity.len() as u64;
                *n_chars = offsets.last().copied().unwrap_or(0);
                *chars_out = chars.as_ptr();
                *offsets_out = offsets.as_ptr();
                *null_bitmap = validity.buffer().as_ptr();
                *meminfo = Allocation::into_raw(token);
            }
            Ok(())
        });
    }

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
    ) {
        self.call("info_to_nested_array", || {
            let array = unsafe { array(info)? };
            if !matches!(array, NativeArray::List { .. } | NativeArray::Struct { .. }) {
                tether_bail!("a {} array is not nested", array.kind());
            }
            let flat = Flattened::of(array)?;
            let expected = unsafe { slice(types, n_types as usize)? };
            if expected != flat.types.as_slice() {
                tether_bail!(
                    MismatchedTypes: format!("tags {expected:?}"),
                    format!("tags {:?}", flat.types)
                );
            }
            let (lengths_capacity, buffers_capacity) = unsafe { (*n_lengths, *n_buffers) };
            if flat.lengths.len() as u64 > lengths_capacity
                || flat.buffers.len() as u64 > buffers_capacity
            {
                tether_bail!(
                    "room for {} lengths and {} buffers, need {} and {}",
                    lengths_capacity,
                    buffers_capacity,
                    flat.lengths.len(),
                    flat.buffers.len()
                );
            }
            unsafe {
                ptr::copy_nonoverlapping(flat.lengths.as_ptr(), lengths, flat.lengths.len());
                ptr::copy_nonoverlapping(flat.buffers.as_ptr(), buffers, flat.buffers.len());
                *n_lengths = flat.lengths.len() as u64;
                *n_buffers = flat.buffers.len() as u64;
                *meminfo = Allocation::into_raw(Allocation::new(array.clone()));
            }
            Ok(())
        });
    }

    unsafe fn get_nested_info(&self, info: *mut array_info, kind: i32) -> *mut array_info {
        self.create("get_nested_info", || match unsafe { array(info)? } {
            NativeArray::Dict {
                values,
                indices,
                validity,
                ..
            } => match kind {
                DICT_VALUES => Ok(values.as_ref().clone()),
                DICT_INDICES => Ok(NativeArray::Nullable {
                    ptype: PType::I32,
                    data: indices.clone().into_byte_buffer(),
                    validity: validity.clone(),
                }),
                other => tether_bail!("unknown nested selector {}", other),
            },
            other => tether_bail!("a {} array has no nested descriptors", other.kind()),
        })
    }

    unsafe fn get_has_global_dictionary(&self, info: *mut array_info) -> bool {
        self.call("get_has_global_dictionary", || match unsafe { array(info)? } {
            NativeArray::Dict { global, .. } => Ok(*global),
            other => tether_bail!("a {} array is not dictionary-encoded", other.kind()),
        })
        .unwrap_or(false)
    }

    unsafe fn alloc_numpy(&self, length: u64, ctype: i32) -> *mut array_info {
        self.create("alloc_numpy", || {
            let ptype = leaf_ptype(ctype)?;
            Ok(NativeArray::Numpy {
                ptype,
                data: zeroed(ptype, length as usize),
            })
        })
    }

    unsafe fn alloc_nullable_array(&self, length: u64, ctype: i32) -> *mut array_info {
        self.create("alloc_nullable_array", || {
            let ptype = leaf_ptype(ctype)?;
            let len = length as usize;
            Ok(NativeArray::Nullable {
                ptype,
                data: zeroed(ptype, len),
                validity: std::iter::repeat_n(false, len).collect(),
            })
        })
    }

    unsafe fn alloc_string_array(&self, length: u64, n_chars: u64) -> *mut array_info {
        self.create("alloc_string_array", || {
            let len = length as usize;
            Ok(NativeArray::String {
                binary: false,
                offsets: Buffer::full(0, len + 1),
                chars: Buffer::full(0, n_chars as usize),
                validity: std::iter::repeat_n(false, len).collect(),
            })
        })
    }

    unsafe fn arr_info_list_to_table(
        &self,
        infos: *const *mut array_info,
        n_infos: u64,
    ) -> *mut table_info {
        let infos = if infos.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(infos, n_infos as usize) }.to_vec()
        };
        let release = |infos: &[*mut array_info]| {
            for &info in infos {
                drop(unsafe { ArrayInfo::take(info) });
            }
        };
        let table = self.call("arr_info_list_to_table", || {
            if infos.len() as u64 != n_infos || infos.iter().any(|info| info.is_null()) {
                tether_bail!("null column descriptor");
            }
            let columns: Vec<&NativeArray> = infos
                .iter()
                .map(|&info| unsafe { array(info) })
                .try_collect()?;
            if !columns.iter().map(|c| c.len()).all_equal() {
                tether_bail!(
                    "columns of unequal length {:?}",
                    columns.iter().map(|c| c.len()).collect_vec()
                );
            }
            Ok(TableInfo::into_raw(infos.clone(), None, &self.live_tables))
        });
        table.unwrap_or_else(|| {
            release(&infos);
            ptr::null_mut()
        })
    }

    unsafe fn info_from_table(&self, table_ptr: *mut table_info, index: u64) -> *mut array_info {
        self.call("info_from_table", || {
            let table = unsafe { table(table_ptr)? };
            match table.columns.get(index as usize) {
                Some(&column) => Ok(column),
                None => tether_bail!(OutOfBounds: index as usize, 0, table.columns.len()),
            }
        })
        .unwrap_or(ptr::null_mut())
    }

    unsafe fn table_ncols(&self, table_ptr: *mut table_info) -> u64 {
        self.call("table_ncols", || {
            Ok(unsafe { table(table_ptr)? }.columns.len() as u64)
        })
        .unwrap_or(0)
    }

    unsafe fn table_nrows(&self, table_ptr: *mut table_info) -> u64 {
        self.call("table_nrows", || {
            Ok(table_len(&unsafe { columns(table_ptr)? }) as u64)
        })
        .unwrap_or(0)
    }

    unsafe fn delete_info_decref_array(&self, info: *mut array_info) {
        self.count("delete_info_decref_array");
        drop(unsafe { ArrayInfo::take(info) });
    }

    unsafe fn delete_table_decref_arrays(&self, table: *mut table_info) {
        self.count("delete_table_decref_arrays");
        if let Some(table) = unsafe { TableInfo::take(table) } {
            for &column in &table.columns {
                drop(unsafe { ArrayInfo::take(column) });
            }
        }
    }

    unsafe fn delete_table(&self, table: *mut table_info) {
        self.count("delete_table");
        drop(unsafe { TableInfo::take(table) });
    }

    unsafe fn delete_shuffle_info(&self, info: *mut shuffle_info) {
        self.count("delete_shuffle_info");
        drop(unsafe { ShuffleInfo::take(info) });
    }

    unsafe fn shuffle_table(
        &self,
        table: *mut table_info,
        n_keys: i64,
        is_parallel: bool,
        keep_comm_info: i32,
    ) -> *mut table_info {
        self.create_table("shuffle_table", || {
            let columns = unsafe { columns(table)? };
            let order = shuffle_order(
                &columns,
                to_usize(n_keys, "key count")?,
                self.options.num_ranks,
                is_parallel,
            )?;
            let out = take_all(&columns, &all_rows(&order))?;
            Ok((out, (keep_comm_info != 0).then_some(order)))
        })
    }

    unsafe fn get_shuffle_info(&self, table_ptr: *mut table_info) -> *mut shuffle_info {
        self.call("get_shuffle_info", || {
            Ok(unsafe { table(table_ptr)? }
                .shuffle
                .clone()
                .map_or(ptr::null_mut(), ShuffleInfo::into_raw))
        })
        .unwrap_or(ptr::null_mut())
    }

    unsafe fn reverse_shuffle_table(
        &self,
        table: *mut table_info,
        info: *mut shuffle_info,
    ) -> *mut table_info {
        self.create_table("reverse_shuffle_table", || {
            let Some(info) = (unsafe { ShuffleInfo::from_ptr(info) }) else {
                tether_bail!("null shuffle metadata");
            };
            let columns = unsafe { columns(table)? };
            let order = reverse_order(&info.source_rows, table_len(&columns))?;
            Ok((take_all(&columns, &all_rows(&order))?, None))
        })
    }

    unsafe fn hash_join_table(
        &self,
        left: *mut table_info,
        right: *mut table_info,
        _left_parallel: bool,
        _right_parallel: bool,
        n_keys: i64,
        n_data_left: i64,
        n_data_right: i64,
        _vect_same_key: *const i64,
        _vect_need_typechange: *const i64,
        is_left: bool,
        is_right: bool,
        _is_join: bool,
        _optional_col: bool,
        indicator: bool,
        is_na_equal: bool,
        cond_func: *const c_void,
        _left_cond_columns: *const u64,
        n_left_cond_columns: i64,
        _right_cond_columns: *const u64,
        n_right_cond_columns: i64,
    ) -> *mut table_info {
        self.create_table("hash_join_table", || {
            if !cond_func.is_null() || n_left_cond_columns > 0 || n_right_cond_columns > 0 {
                tether_bail!("non-equality join conditions are not supported");
            }
            let plan = JoinPlan {
                n_keys: to_usize(n_keys, "key count")?,
                n_data_left: to_usize(n_data_left, "left data count")?,
                n_data_right: to_usize(n_data_right, "right data count")?,
                is_left,
                is_right,
                indicator,
                na_equal: is_na_equal,
            };
            let out = hash_join(&unsafe { columns(left)? }, &unsafe { columns(right)? }, plan)?;
            Ok((out, None))
        })
    }

    unsafe fn sort_values_table(
        &self,
        table: *mut table_info,
        n_keys: i64,
        vect_ascending: *const i64,
        na_position: *const i64,
        _is_parallel: bool,
    ) -> *mut table_info {
        self.create_table("sort_values_table", || {
            let n_keys = to_usize(n_keys, "key count")?;
            let ascending = unsafe { slice(vect_ascending, n_keys)? }
                .iter()
                .map(|&a| a != 0)
                .collect_vec();
            let na_last = unsafe { slice(na_position, n_keys)? }
                .iter()
                .map(|&p| p != 0)
                .collect_vec();
            let out = sort_values(&unsafe { columns(table)? }, n_keys, &ascending, &na_last)?;
            Ok((out, None))
        })
    }

    unsafe fn sample_table(
        &self,
        table: *mut table_info,
        n: i64,
        frac: f64,
        replace: bool,
        _is_parallel: bool,
    ) -> *mut table_info {
        self.create_table("sample_table", || {
            let columns = unsafe { columns(table)? };
            let rows = sample_rows(table_len(&columns), n, frac, replace, &mut self.rng.lock())?;
            Ok((take_all(&columns, &all_rows(&rows))?, None))
        })
    }

    unsafe fn shuffle_renormalization(
        &self,
        table: *mut table_info,
        random: i32,
        random_seed: i64,
        _is_parallel: bool,
    ) -> *mut table_info {
        self.create_table("shuffle_renormalization", || {
            let columns = unsafe { columns(table)? };
            let order = renormalization_order(
                table_len(&columns),
                random,
                random_seed,
                &mut self.rng.lock(),
            )?;
            Ok((take_all(&columns, &all_rows(&order))?, None))
        })
    }

    unsafe fn shuffle_renormalization_group(
        &self,
        table: *mut table_info,
        random: i32,
        random_seed: i64,
        _is_parallel: bool,
        num_ranks: i64,
        ranks: *const i32,
    ) -> *mut table_info {
        self.create_table("shuffle_renormalization_group", || {
            let ranks = unsafe { slice(ranks, to_usize(num_ranks, "rank count")?)? };
            check_rank_group(ranks, self.options.num_ranks)?;
            let columns = unsafe { columns(table)? };
            let order = renormalization_order(
                table_len(&columns),
                random,
                random_seed,
                &mut self.rng.lock(),
            )?;
            Ok((take_all(&columns, &all_rows(&order))?, None))
        })
    }

    unsafe fn drop_duplicates_table(
        &self,
        table: *mut table_info,
        _is_parallel: bool,
        n_keys: i64,
        keep: i64,
        dropna: bool,
        _drop_local_first: bool,
    ) -> *mut table_info {
        self.create_table("drop_duplicates_table", || {
            let keep = Keep::try_from(keep).map_err(|_| tether_err!("unknown keep mode {}", keep))?;
            let out = drop_duplicates(
                &unsafe { columns(table)? },
                to_usize(n_keys, "key count")?,
                keep,
                dropna,
            )?;
            Ok((out, None))
        })
    }

    unsafe fn groupby_and_aggregate(
        &self,
        table: *mut table_info,
        n_keys: i64,
        input_has_index: bool,
        ftypes: *const i32,
        func_offsets: *const i32,
        _udf_n_redvars: *const i32,
        _is_parallel: bool,
        skipdropna: bool,
        _shift_periods: i64,
        _transform_func: i64,
        _head_n: i64,
        return_keys: bool,
        return_index: bool,
        dropna: bool,
        update_cb: *const c_void,
        combine_cb: *const c_void,
        eval_cb: *const c_void,
        general_udfs_cb: *const c_void,
        _udf_table_dummy: *mut table_info,
    ) -> *mut table_info {
        self.create_table("groupby_and_aggregate", || {
            no_callbacks(&[update_cb, combine_cb, eval_cb, general_udfs_cb])?;
            if return_index {
                tether_bail!("returning the group index is not supported");
            }
            let columns = unsafe { columns(table)? };
            let n_keys = to_usize(n_keys, "key count")?;
            let end = columns.len().saturating_sub(usize::from(input_has_index));
            if n_keys > end {
                tether_bail!("{} key columns requested from {} columns", n_keys, end);
            }
            let funcs = unsafe { aggregations(ftypes, func_offsets, end - n_keys)? };
            let options = GroupOptions {
                skipdropna,
                dropna,
                return_keys,
            };
            let out = groupby(&columns[..n_keys], &columns[n_keys..end], &funcs, options)?;
            Ok((out, None))
        })
    }

    unsafe fn pivot_groupby_and_aggregate(
        &self,
        table: *mut table_info,
        n_keys: i64,
        dispatch_table: *mut table_info,
        _dispatch_info: *mut table_info,
        input_has_index: bool,
        ftypes: *const i32,
        func_offsets: *const i32,
        _udf_n_redvars: *const i32,
        _is_parallel: bool,
        is_crosstab: bool,
        skipdropna: bool,
        return_keys: bool,
        return_index: bool,
        update_cb: *const c_void,
        combine_cb: *const c_void,
        eval_cb: *const c_void,
        _udf_table_dummy: *mut table_info,
    ) -> *mut table_info {
        self.create_table("pivot_groupby_and_aggregate", || {
            no_callbacks(&[update_cb, combine_cb, eval_cb])?;
            if input_has_index || return_index {
                tether_bail!("pivot tables over an index are not supported");
            }
            let input = unsafe { columns(table)? };
            let n_keys = to_usize(n_keys, "key count")?;
            let Some((&pivot_column, rest)) = input.split_last() else {
                tether_bail!("pivot needs a pivot column");
            };
            if n_keys > rest.len() {
                tether_bail!("{} key columns requested from {} columns", n_keys, rest.len());
            }
            let Some(&targets) = unsafe { columns(dispatch_table)? }.first() else {
                tether_bail!("pivot dispatch table has no columns");
            };
            let (keys, data) = rest.split_at(n_keys);
            let funcs = if is_crosstab {
                Vec::new()
            } else {
                unsafe { aggregations(ftypes, func_offsets, data.len())? }
            };
            let options = GroupOptions {
                skipdropna,
                dropna: true,
                return_keys,
            };
            let out = pivot(keys, data, pivot_column, targets, &funcs, is_crosstab, options)?;
            Ok((out, None))
        })
    }

    unsafe fn get_groupby_labels(
        &self,
        table: *mut table_info,
        group_labels: *mut i64,
        sort_idx: *mut i64,
        dropna: bool,
        _is_parallel: bool,
    ) -> i64 {
        self.call("get_groupby_labels", || {
            if group_labels.is_null() || sort_idx.is_null() {
                tether_bail!("null group label output");
            }
            let keys = unsafe { columns(table)? };
            let (labels, order, ngroups) = label_rows(&keys, dropna);
            unsafe {
                ptr::copy_nonoverlapping(labels.as_ptr(), group_labels, labels.len());
                for (i, &row) in order.iter().enumerate() {
                    *sort_idx.add(i) = row as i64;
                }
            }
            Ok(ngroups as i64)
        })
        .unwrap_or(-1)
    }

    unsafe fn array_isin(
        &self,
        out: *mut array_info,
        input: *mut array_info,
        values: *mut array_info,
        _is_parallel: bool,
    ) {
        self.call("array_isin", || {
            let result = isin(unsafe { array(input)? }, unsafe { array(values)? });
            unsafe { store(out, result) }
        });
    }

    unsafe fn get_search_regex(
        &self,
        input: *mut array_info,
        case_sensitive: bool,
        pattern: *const c_char,
        out: *mut array_info,
    ) {
        self.call("get_search_regex", || {
            if pattern.is_null() {
                tether_bail!("null pattern");
            }
            let pattern = unsafe { CStr::from_ptr(pattern) }
                .to_str()
                .map_err(|err| tether_err!("pattern is not UTF-8: {}", err))?;
            let result = search_regex(unsafe { array(input)? }, pattern, case_sensitive)?;
            unsafe { store(out, result) }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use rstest::rstest;

    use super::*;

    fn numpy(engine: &ReferenceEngine, values: Vec<i64>) -> (*mut array_info, Buffer<i64>) {
        let buffer = Buffer::from_vec(values);
        let info = unsafe {
            engine.numpy_array_to_info(
                buffer.len() as u64,
                buffer.as_ptr().cast(),
                CTypeEnum::Int64.into(),
                Allocation::into_raw(buffer.meminfo()),
            )
        };
        (info, buffer)
    }

    #[test]
    fn descriptors_keep_memory_alive() {
        let engine = ReferenceEngine::default();
        let (info, buffer) = numpy(&engine, vec![1, 2, 3]);
        assert!(!info.is_null());
        assert_eq!(buffer.strong_count(), 2);
        assert_eq!(engine.live_arrays(), 1);

        let (mut ctype, mut len, mut data, mut token) = (0, 0, ptr::null(), ptr::null());
        unsafe { engine.info_to_numpy_array(info, &mut ctype, &mut len, &mut data, &mut token) };
        assert_eq!(engine.take_pending_error(), None);
        assert_eq!((ctype, len, data), (i32::from(CTypeEnum::Int64), 3, buffer.as_ptr().cast()));
        assert_eq!(buffer.strong_count(), 3);
        drop(unsafe { Allocation::from_raw(token) });

        unsafe { engine.delete_info_decref_array(info) };
        assert_eq!(buffer.strong_count(), 1);
        assert_eq!(engine.live_arrays(), 0);
    }

    #[test]
    fn failed_constructor_adopts_token() {
        let engine = ReferenceEngine::default();
        let buffer = Buffer::from_vec(vec![1i64]);
        let info = unsafe {
            engine.numpy_array_to_info(1, buffer.as_ptr().cast(), 99, Allocation::into_raw(buffer.meminfo()))
        };
        assert!(info.is_null());
        assert!(engine.take_pending_error().is_some());
        assert_eq!(engine.take_pending_error(), None);
        assert_eq!(buffer.strong_count(), 1);
    }

    #[test]
    fn injected_fault_fires_once() {
        let engine = ReferenceEngine::default();
        engine.fail_next("numpy_array_to_info", "boom");
        let (info, buffer) = numpy(&engine, vec![1]);
        assert!(info.is_null());
        assert_eq!(engine.take_pending_error().as_deref(), Some("boom"));
        assert_eq!(buffer.strong_count(), 1);

        let (info, _buffer) = numpy(&engine, vec![1]);
        assert!(!info.is_null());
        assert_eq!(engine.native_calls(), 2);
        unsafe { engine.delete_info_decref_array(info) };
    }

    #[test]
    fn table_assembly_releases_on_failure() {
        let engine = ReferenceEngine::default();
        let (a, _) = numpy(&engine, vec![1, 2]);
        let (b, _) = numpy(&engine, vec![1]);
        let table = unsafe { engine.arr_info_list_to_table([a, b].as_ptr(), 2) };
        assert!(table.is_null());
        assert!(engine.take_pending_error().is_some());
        assert_eq!(engine.live_arrays(), 0);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn sorts_a_table(#[case] ascending: bool) {
        let engine = ReferenceEngine::default();
        let (a, _) = numpy(&engine, vec![2, 1, 3]);
        let table = unsafe { engine.arr_info_list_to_table([a].as_ptr(), 1) };
        let sorted =
            unsafe { engine.sort_values_table(table, 1, &i64::from(ascending), &1, false) };
        assert!(!sorted.is_null());
        let column = unsafe { engine.info_from_table(sorted, 0) };
        let datums = datum::column_datums(unsafe { array(column) }.unwrap());
        let expected = if ascending { [1, 2, 3] } else { [3, 2, 1] };
        assert_eq!(datums, expected.map(datum::Datum::Int).to_vec());

        unsafe {
            engine.delete_table_decref_arrays(sorted);
            engine.delete_table_decref_arrays(table);
        }
        assert_eq!((engine.live_arrays(), engine.live_tables()), (0, 0));
    }

    #[test]
    fn regex_writes_into_output() {
        let engine = ReferenceEngine::default();
        let offsets = Buffer::from_vec(vec![0u64, 3, 6]);
        let chars = Buffer::copy_from(b"abcxyz");
        let token = Allocation::new((offsets.clone(), chars.clone()));
        let input = unsafe {
            engine.string_array_to_info(
                2,
                6,
                chars.as_ptr(),
                offsets.as_ptr(),
                ptr::null(),
                Allocation::into_raw(token),
                false,
            )
        };
        let out = unsafe { engine.alloc_nullable_array(2, CTypeEnum::Bool.into()) };
        let pattern = CString::new("^x").unwrap();
        unsafe { engine.get_search_regex(input, true, pattern.as_ptr(), out) };
        assert_eq!(engine.take_pending_error(), None);
        let datums = datum::column_datums(unsafe { array(out) }.unwrap());
        assert_eq!(datums, vec![datum::Datum::Int(0), datum::Datum::Int(1)]);
        unsafe {
            engine.delete_info_decref_array(input);
            engine.delete_info_decref_array(out);
        }
    }
}
