use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use tether_buffer::{Bitmap, Buffer, ByteBuffer, MemInfo};
use tether_dtype::{CTypeEnum, PType};
use tether_error::{TetherResult, tether_bail};

use crate::abi::{array_info, shuffle_info, table_info};

/// The engine's own view of an array. Every buffer is either borrowed from the caller, kept
/// alive by an adopted token, or allocated by the engine.
#[derive(Debug, Clone)]
pub(crate) enum NativeArray {
    Numpy {
        ptype: PType,
        data: ByteBuffer,
    },
    Categorical {
        ptype: PType,
        data: ByteBuffer,
        num_categories: i64,
    },
    Nullable {
        ptype: PType,
        data: ByteBuffer,
        validity: Bitmap,
    },
    Decimal {
        precision: i32,
        scale: i32,
        data: Buffer<i128>,
        validity: Bitmap,
    },
    Interval {
        ptype: PType,
        left: ByteBuffer,
        right: ByteBuffer,
    },
    String {
        binary: bool,
        offsets: Buffer<u64>,
        chars: ByteBuffer,
        validity: Bitmap,
    },
    Dict {
        values: Arc<NativeArray>,
        indices: Buffer<i32>,
        validity: Bitmap,
        global: bool,
    },
    List {
        offsets: Buffer<u64>,
        validity: Bitmap,
        child: Box<NativeArray>,
    },
    Struct {
        names: Vec<String>,
        validity: Bitmap,
        fields: Vec<NativeArray>,
    },
}

impl NativeArray {
    pub fn len(&self) -> usize {
        match self {
            NativeArray::Numpy { ptype, data } | NativeArray::Categorical { ptype, data, .. } => {
                data.len() / ptype.byte_width()
            }
            NativeArray::Interval { ptype, left, .. } => left.len() / ptype.byte_width(),
            NativeArray::Nullable { validity, .. }
            | NativeArray::Decimal { validity, .. }
            | NativeArray::String { validity, .. }
            | NativeArray::Dict { validity, .. }
            | NativeArray::List { validity, .. }
            | NativeArray::Struct { validity, .. } => validity.len(),
        }
    }

    /// The name of this node's layout.
    pub fn kind(&self) -> &'static str {
        match self {
            NativeArray::Numpy { .. } => "numpy",
            NativeArray::Categorical { .. } => "categorical",
            NativeArray::Nullable { .. } => "nullable",
            NativeArray::Decimal { .. } => "decimal",
            NativeArray::Interval { .. } => "interval",
            NativeArray::String { binary: false, .. } => "string",
            NativeArray::String { binary: true, .. } => "binary",
            NativeArray::Dict { .. } => "dictionary",
            NativeArray::List { .. } => "list",
            NativeArray::Struct { .. } => "struct",
        }
    }

    /// Whether row `index` holds a value.
    pub fn is_valid(&self, index: usize) -> bool {
        match self {
            NativeArray::Numpy { .. } | NativeArray::Interval { .. } => true,
            NativeArray::Categorical { .. } => self.code(index) >= 0,
            NativeArray::Nullable { validity, .. }
            | NativeArray::Decimal { validity, .. }
            | NativeArray::String { validity, .. }
            | NativeArray::Dict { validity, .. }
            | NativeArray::List { validity, .. }
            | NativeArray::Struct { validity, .. } => validity.is_valid(index),
        }
    }

    /// The tag describing this array's element type, without container children.
    pub fn ctype(&self) -> CTypeEnum {
        match self {
            NativeArray::Numpy { ptype, .. }
            | NativeArray::Categorical { ptype, .. }
            | NativeArray::Nullable { ptype, .. }
            | NativeArray::Interval { ptype, .. } => ptype.c_type(),
            NativeArray::Decimal { .. } => CTypeEnum::Decimal,
            NativeArray::String { binary: true, .. } => CTypeEnum::Binary,
            NativeArray::String { binary: false, .. } | NativeArray::Dict { .. } => {
                CTypeEnum::String
            }
            NativeArray::List { .. } => CTypeEnum::List,
            NativeArray::Struct { .. } => CTypeEnum::Struct,
        }
    }

    /// The bytes of string row `index`, or `None` if it is null.
    pub fn bytes_at(&self, index: usize) -> Option<&[u8]> {
        match self {
            NativeArray::String {
                offsets,
                chars,
                validity,
                ..
            } => validity
                .is_valid(index)
                .then(|| &chars[offsets[index] as usize..offsets[index + 1] as usize]),
            NativeArray::Dict {
                values,
                indices,
                validity,
                ..
            } => {
                if validity.is_valid(index) {
                    values.bytes_at(indices[index] as usize)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn code(&self, index: usize) -> i64 {
        match self {
            NativeArray::Categorical { ptype, data, .. } => {
                tether_dtype::match_each_native_ptype!(ptype, |$T| {
                    Buffer::<$T>::from_byte_buffer(data.clone())[index] as i64
                })
            }
            _ => 0,
        }
    }
}

/// Allocate a zeroed fixed-width buffer of `len` elements.
pub(crate) fn zeroed(ptype: PType, len: usize) -> ByteBuffer {
    tether_dtype::match_each_native_ptype!(ptype, |$T| {
        Buffer::<$T>::full(<$T>::default(), len).into_byte_buffer()
    })
}

pub(crate) fn leaf_ptype(ctype: i32) -> TetherResult<PType> {
    let Ok(ctype) = CTypeEnum::try_from(ctype) else {
        tether_bail!("unknown type tag {}", ctype);
    };
    match PType::from_c_type(ctype) {
        Some(ptype) => Ok(ptype),
        None => tether_bail!("type tag {} is not a fixed-width kind", ctype),
    }
}

/// View `len` items at `ptr` kept alive by `token`.
///
/// # Safety
///
/// A non-null `ptr` must point to `len` initialized items that live as long as `token`.
pub(crate) unsafe fn borrow<T>(ptr: *const T, len: usize, token: &MemInfo) -> TetherResult<Buffer<T>> {
    if ptr.is_null() && len > 0 {
        tether_bail!("null buffer for {} items", len);
    }
    if !ptr.is_null() && ptr.align_offset(align_of::<T>()) != 0 {
        tether_bail!("buffer is not aligned to {} bytes", align_of::<T>());
    }
    Ok(unsafe { Buffer::from_raw_parts(ptr, len, token.clone()) })
}

/// View `len` fixed-width values of `ptype` at `ptr` kept alive by `token`.
///
/// # Safety
///
/// As for [`borrow`].
pub(crate) unsafe fn borrow_fixed(
    ptr: *const u8,
    len: usize,
    ptype: PType,
    token: &MemInfo,
) -> TetherResult<ByteBuffer> {
    let width = ptype.byte_width();
    if !ptr.is_null() && ptr.align_offset(width) != 0 {
        tether_bail!("{} buffer is not aligned to {} bytes", ptype, width);
    }
    unsafe { borrow(ptr, len * width, token) }
}

/// View a validity bitmap of `len` rows, all valid when `ptr` is null.
///
/// # Safety
///
/// As for [`borrow`].
pub(crate) unsafe fn borrow_validity(
    ptr: *const u8,
    len: usize,
    token: &MemInfo,
) -> TetherResult<Bitmap> {
    if ptr.is_null() {
        return Ok(Bitmap::new_valid(len));
    }
    Bitmap::try_new(unsafe { borrow(ptr, Bitmap::byte_len(len), token)? }, len)
}

/// A live-handle counter shared by an engine and every descriptor it created.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveCount(Arc<AtomicIsize>);

impl LiveCount {
    pub fn get(&self) -> usize {
        usize::try_from(self.0.load(Ordering::SeqCst)).unwrap_or(0)
    }

    fn guard(&self) -> LiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveGuard(self.0.clone())
    }
}

#[derive(Debug)]
struct LiveGuard(Arc<AtomicIsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The boxed value behind an `*mut array_info`.
#[derive(Debug)]
pub(crate) struct ArrayInfo {
    pub array: NativeArray,
    _live: LiveGuard,
}

impl ArrayInfo {
    pub fn into_raw(array: NativeArray, live: &LiveCount) -> *mut array_info {
        Box::into_raw(Box::new(Self {
            array,
            _live: live.guard(),
        }))
        .cast()
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`ArrayInfo::into_raw`] and still be alive.
    pub unsafe fn from_ptr<'a>(ptr: *mut array_info) -> Option<&'a mut ArrayInfo> {
        unsafe { ptr.cast::<ArrayInfo>().as_mut() }
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`ArrayInfo::into_raw`], and is consumed.
    pub unsafe fn take(ptr: *mut array_info) -> Option<Box<ArrayInfo>> {
        (!ptr.is_null()).then(|| unsafe { Box::from_raw(ptr.cast::<ArrayInfo>()) })
    }

    pub fn into_array(self: Box<Self>) -> NativeArray {
        self.array
    }
}

/// The boxed value behind an `*mut table_info`: borrowed pointers to descriptors it owns.
#[derive(Debug)]
pub(crate) struct TableInfo {
    pub columns: Vec<*mut array_info>,
    pub shuffle: Option<Vec<usize>>,
    _live: LiveGuard,
}

impl TableInfo {
    pub fn into_raw(
        columns: Vec<*mut array_info>,
        shuffle: Option<Vec<usize>>,
        live: &LiveCount,
    ) -> *mut table_info {
        Box::into_raw(Box::new(Self {
            columns,
            shuffle,
            _live: live.guard(),
        }))
        .cast()
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`TableInfo::into_raw`] and still be alive.
    pub unsafe fn from_ptr<'a>(ptr: *mut table_info) -> Option<&'a TableInfo> {
        unsafe { ptr.cast::<TableInfo>().as_ref() }
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`TableInfo::into_raw`], and is consumed.
    pub unsafe fn take(ptr: *mut table_info) -> Option<Box<TableInfo>> {
        (!ptr.is_null()).then(|| unsafe { Box::from_raw(ptr.cast::<TableInfo>()) })
    }

    /// The arrays of every column.
    ///
    /// # Safety
    ///
    /// Every column pointer must still be alive.
    pub unsafe fn arrays(&self) -> Vec<&NativeArray> {
        self.columns
            .iter()
            .filter_map(|&c| unsafe { ArrayInfo::from_ptr(c) })
            .map(|info| &info.array)
            .collect()
    }
}

/// The boxed value behind an `*mut shuffle_info`: for each shuffled row, the row it came from.
#[derive(Debug)]
pub(crate) struct ShuffleInfo {
    pub source_rows: Vec<usize>,
}

impl ShuffleInfo {
    pub fn into_raw(source_rows: Vec<usize>) -> *mut shuffle_info {
        Box::into_raw(Box::new(Self { source_rows })).cast()
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`ShuffleInfo::into_raw`] and still be alive.
    pub unsafe fn from_ptr<'a>(ptr: *mut shuffle_info) -> Option<&'a ShuffleInfo> {
        unsafe { ptr.cast::<ShuffleInfo>().as_ref() }
    }

    /// # Safety
    ///
    /// `ptr` must be null or come from [`ShuffleInfo::into_raw`], and is consumed.
    pub unsafe fn take(ptr: *mut shuffle_info) -> Option<Box<ShuffleInfo>> {
        (!ptr.is_null()).then(|| unsafe { Box::from_raw(ptr.cast::<ShuffleInfo>()) })
    }
}
