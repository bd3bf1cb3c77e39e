//! Handle to array.
//!
//! The exact inverse of [`encode`](crate::encode): every accessor hands back raw pointers and
//! ownership tokens, which become zero-copy buffers that keep the native memory alive.

use std::ptr;
use std::slice::Iter;
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use tether_array::Array;
use tether_array::arrays::{
    CategoricalArray, DatetimeTzArray, DecimalArray, DictArray, IntervalArray, ListArray,
    MapArray, NullableArray, PrimitiveArray, StructArray, VarBinArray,
};
use tether_buffer::{Allocation, Bitmap, Buffer, ByteBuffer, MemInfo};
use tether_dtype::{CTypeEnum, DType, PType, StructFields};
use tether_error::{TetherResult, tether_bail, tether_err};
use tether_native::{DICT_INDICES, DICT_VALUES};

use crate::encode::check_supported;
use crate::flatten::{num_buffers, num_lengths, tags_of};
use crate::handle::ArrayHandle;
use crate::native::{adopt, check, check_array, token};

/// Views over memory returned by one accessor call and kept alive by one token.
struct Views {
    entry: &'static str,
    token: MemInfo,
}

impl Views {
    /// `n_bytes` bytes at `ptr`, which must be aligned to `align`.
    unsafe fn bytes(&self, ptr: *const u8, n_bytes: usize, align: usize) -> TetherResult<ByteBuffer> {
        if ptr.is_null() && n_bytes > 0 {
            tether_bail!(NativeCallFailed: self.entry, format!("null buffer for {n_bytes} bytes"));
        }
        if !ptr.is_null() && ptr.align_offset(align) != 0 {
            tether_bail!(
                NativeCallFailed: self.entry,
                format!("buffer is not aligned to {align} bytes")
            );
        }
        Ok(unsafe { Buffer::from_raw_parts(ptr, n_bytes, self.token.clone()) })
    }

    unsafe fn fixed(&self, ptr: *const u8, len: usize, ptype: PType) -> TetherResult<PrimitiveArray> {
        let width = ptype.byte_width();
        let bytes = unsafe { self.bytes(ptr, len * width, width)? };
        PrimitiveArray::try_from_byte_buffer(bytes, ptype)
    }

    unsafe fn typed<T>(&self, ptr: *const T, len: usize) -> TetherResult<Buffer<T>>
    where
        T: Copy + Send + Sync + 'static,
    {
        let bytes = unsafe { self.bytes(ptr.cast(), len * size_of::<T>(), align_of::<T>())? };
        Ok(Buffer::from_byte_buffer(bytes))
    }

    /// A validity bitmap, all valid when `ptr` is null.
    unsafe fn validity(&self, ptr: *const u8, len: usize) -> TetherResult<Bitmap> {
        if ptr.is_null() {
            return Ok(Bitmap::new_valid(len));
        }
        Bitmap::try_new(unsafe { self.bytes(ptr, Bitmap::byte_len(len), 1)? }, len)
    }

    unsafe fn varbin(
        &self,
        len: usize,
        offsets: *const u64,
        bitmap: *const u8,
        chars: *const u8,
        binary: bool,
    ) -> TetherResult<VarBinArray> {
        let offsets = unsafe { self.typed(offsets, len + 1)? };
        let n_chars = to_usize(self.entry, offsets.last().copied().unwrap_or(0))?;
        let bytes = unsafe { self.bytes(chars, n_chars, 1)? };
        let validity = unsafe { self.validity(bitmap, len)? };
        VarBinArray::try_new(offsets, bytes, validity, binary)
    }
}

fn to_usize(entry: &'static str, n: u64) -> TetherResult<usize> {
    usize::try_from(n).map_err(|_| tether_err!(NativeCallFailed: entry, format!("length {n}")))
}

fn wire_ctype(entry: &'static str, ctype: i32) -> TetherResult<CTypeEnum> {
    CTypeEnum::try_from(ctype)
        .map_err(|_| tether_err!(NativeCallFailed: entry, format!("unexpected type tag {ctype}")))
}

fn wire_ptype(entry: &'static str, ctype: i32) -> TetherResult<PType> {
    let ctype = wire_ctype(entry, ctype)?;
    PType::from_c_type(ctype)
        .ok_or_else(|| tether_err!(NativeCallFailed: entry, format!("{ctype} is not fixed-width")))
}

fn expect_ptype(dtype: &DType, expected: PType, actual: PType) -> TetherResult<()> {
    if expected != actual {
        tether_bail!(MismatchedTypes: dtype, actual);
    }
    Ok(())
}

fn read_numpy(handle: &ArrayHandle) -> TetherResult<PrimitiveArray> {
    const ENTRY: &str = "info_to_numpy_array";
    let engine = handle.engine();
    let (mut ctype, mut len) = (0i32, 0u64);
    let (mut data, mut meminfo) = (ptr::null::<u8>(), ptr::null::<Allocation>());
    unsafe {
        engine.info_to_numpy_array(handle.as_ptr(), &mut ctype, &mut len, &mut data, &mut meminfo)
    };
    let meminfo = unsafe { adopt(meminfo) };
    check(engine.as_ref(), ENTRY)?;

    let views = Views {
        entry: ENTRY,
        token: token(ENTRY, meminfo)?,
    };
    unsafe { views.fixed(data, to_usize(ENTRY, len)?, wire_ptype(ENTRY, ctype)?) }
}

/// Fixed-width values and their validity, as read by `info_to_nullable_array`.
struct NullableParts {
    ctype: CTypeEnum,
    len: usize,
    data: ByteBuffer,
    validity: Bitmap,
}

fn read_nullable(handle: &ArrayHandle) -> TetherResult<NullableParts> {
    const ENTRY: &str = "info_to_nullable_array";
    let engine = handle.engine();
    let (mut ctype, mut len) = (0i32, 0u64);
    let (mut data, mut bitmap) = (ptr::null::<u8>(), ptr::null::<u8>());
    let (mut meminfo, mut meminfo_bitmask) = (ptr::null::<Allocation>(), ptr::null::<Allocation>());
    unsafe {
        engine.info_to_nullable_array(
            handle.as_ptr(),
            &mut ctype,
            &mut len,
            &mut data,
            &mut bitmap,
            &mut meminfo,
            &mut meminfo_bitmask,
        )
    };
    let (meminfo, meminfo_bitmask) = unsafe { (adopt(meminfo), adopt(meminfo_bitmask)) };
    check(engine.as_ref(), ENTRY)?;

    let ctype = wire_ctype(ENTRY, ctype)?;
    let width = ctype
        .byte_width()
        .ok_or_else(|| tether_err!(NativeCallFailed: ENTRY, format!("{ctype} is not fixed-width")))?;
    let len = to_usize(ENTRY, len)?;
    let data_views = Views {
        entry: ENTRY,
        token: token(ENTRY, meminfo)?,
    };
    let data = unsafe { data_views.bytes(data, len * width, width)? };
    let validity = match meminfo_bitmask {
        Some(bitmask) => {
            let bitmap_views = Views {
                entry: ENTRY,
                token: bitmask,
            };
            unsafe { bitmap_views.validity(bitmap, len)? }
        }
        None if bitmap.is_null() => Bitmap::new_valid(len),
        None => tether_bail!(NativeCallFailed: ENTRY, "bitmap returned without a token"),
    };
    Ok(NullableParts {
        ctype,
        len,
        data,
        validity,
    })
}

fn read_interval(handle: &ArrayHandle) -> TetherResult<IntervalArray> {
    const ENTRY: &str = "info_to_interval_array";
    let engine = handle.engine();
    let (mut ctype, mut len) = (0i32, 0u64);
    let (mut left, mut right) = (ptr::null::<u8>(), ptr::null::<u8>());
    let (mut left_meminfo, mut right_meminfo) = (ptr::null::<Allocation>(), ptr::null::<Allocation>());
    unsafe {
        engine.info_to_interval_array(
            handle.as_ptr(),
            &mut ctype,
            &mut len,
            &mut left,
            &mut right,
            &mut left_meminfo,
            &mut right_meminfo,
        )
    };
    let (left_meminfo, right_meminfo) = unsafe { (adopt(left_meminfo), adopt(right_meminfo)) };
    check(engine.as_ref(), ENTRY)?;

    let ptype = wire_ptype(ENTRY, ctype)?;
    let len = to_usize(ENTRY, len)?;
    let left_views = Views {
        entry: ENTRY,
        token: token(ENTRY, left_meminfo)?,
    };
    let right_views = Views {
        entry: ENTRY,
        token: token(ENTRY, right_meminfo)?,
    };
    IntervalArray::try_new(
        unsafe { left_views.fixed(left, len, ptype)? },
        unsafe { right_views.fixed(right, len, ptype)? },
    )
}

fn read_string(handle: &ArrayHandle, binary: bool) -> TetherResult<VarBinArray> {
    const ENTRY: &str = "info_to_string_array";
    let engine = handle.engine();
    let (mut len, mut n_chars) = (0u64, 0u64);
    let (mut chars, mut offsets, mut bitmap) = (ptr::null::<u8>(), ptr::null::<u64>(), ptr::null::<u8>());
    let mut meminfo = ptr::null::<Allocation>();
    unsafe {
        engine.info_to_string_array(
            handle.as_ptr(),
            &mut len,
            &mut n_chars,
            &mut chars,
            &mut offsets,
            &mut bitmap,
            &mut meminfo,
        )
    };
    let meminfo = unsafe { adopt(meminfo) };
    check(engine.as_ref(), ENTRY)?;

    let views = Views {
        entry: ENTRY,
        token: token(ENTRY, meminfo)?,
    };
    let array = unsafe { views.varbin(to_usize(ENTRY, len)?, offsets, bitmap, chars, binary)? };
    if array.end_offset() != n_chars {
        tether_bail!(
            NativeCallFailed: ENTRY,
            format!("offsets end at {} but {} bytes were reported", array.end_offset(), n_chars)
        );
    }
    Ok(array)
}

fn nested_handle(handle: &ArrayHandle, kind: i32) -> TetherResult<ArrayHandle> {
    let engine = handle.engine();
    let ptr = unsafe { engine.get_nested_info(handle.as_ptr(), kind) };
    check_array(engine, "get_nested_info", ptr)
}

/// Rebuild an array of type `dtype` from the descriptor behind `handle`.
pub(crate) fn decode(handle: &ArrayHandle, dtype: &DType) -> TetherResult<Array> {
    check_supported(dtype)?;
    Ok(match dtype {
        DType::Primitive(ptype) => {
            let values = read_numpy(handle)?;
            expect_ptype(dtype, *ptype, values.ptype())?;
            Array::Primitive(values)
        }
        DType::DatetimeTz(tz) => {
            let values = read_numpy(handle)?;
            expect_ptype(dtype, PType::Datetime, values.ptype())?;
            Array::DatetimeTz(DatetimeTzArray::try_new(values, tz.clone())?)
        }
        DType::Categorical(categorical) => {
            let codes = read_numpy(handle)?;
            Array::Categorical(CategoricalArray::try_new(codes, categorical.clone())?)
        }
        DType::Nullable(inner) => {
            let DType::Primitive(ptype) = inner.as_ref() else {
                tether_bail!(UnsupportedType: "{}", dtype);
            };
            let parts = read_nullable(handle)?;
            if parts.ctype != ptype.c_type() {
                tether_bail!(MismatchedTypes: dtype, parts.ctype);
            }
            let values = PrimitiveArray::try_from_byte_buffer(parts.data, *ptype)?;
            Array::Nullable(NullableArray::try_new(values, parts.validity)?)
        }
        DType::Decimal(decimal) => {
            let parts = read_nullable(handle)?;
            if parts.ctype != CTypeEnum::Decimal {
                tether_bail!(MismatchedTypes: dtype, parts.ctype);
            }
            debug_assert_eq!(parts.data.len(), parts.len * size_of::<i128>());
            let values = Buffer::<i128>::from_byte_buffer(parts.data);
            Array::Decimal(DecimalArray::try_new(*decimal, values, parts.validity)?)
        }
        DType::Interval(ptype) => {
            let interval = read_interval(handle)?;
            expect_ptype(dtype, *ptype, interval.ptype())?;
            Array::Interval(interval)
        }
        DType::Utf8 => Array::VarBin(read_string(handle, false)?),
        DType::Binary => Array::VarBin(read_string(handle, true)?),
        DType::Dictionary(indices_dtype, values_dtype) => {
            let values = decode(&nested_handle(handle, DICT_VALUES)?, values_dtype)?;
            let indices = match decode(&nested_handle(handle, DICT_INDICES)?, indices_dtype)? {
                Array::Nullable(indices) => indices,
                other => tether_bail!(MismatchedTypes: indices_dtype, other.dtype()),
            };
            let engine = handle.engine();
            let global = unsafe { engine.get_has_global_dictionary(handle.as_ptr()) };
            check(engine.as_ref(), "get_has_global_dictionary")?;
            Array::Dict(DictArray::try_new(indices, Arc::new(values), global)?)
        }
        _ if dtype.is_nested() => decode_nested(handle, dtype)?,
        _ => tether_bail!(UnsupportedType: "{} has no native accessor", dtype),
    })
}

/// Decode categorical codes against categories already known for this column.
///
/// The categories are shared with `known`, never fetched from the engine.
pub(crate) fn decode_categorical(
    handle: &ArrayHandle,
    known: &CategoricalArray,
) -> TetherResult<CategoricalArray> {
    CategoricalArray::try_new(read_numpy(handle)?, known.categorical_dtype().clone())
}

fn decode_nested(handle: &ArrayHandle, dtype: &DType) -> TetherResult<Array> {
    const ENTRY: &str = "info_to_nested_array";
    let tags = tags_of(dtype)?;
    let (expected_lengths, expected_buffers) = (num_lengths(dtype)?, num_buffers(dtype)?);
    let mut lengths = vec![0i64; expected_lengths];
    let mut buffers = vec![ptr::null::<u8>(); expected_buffers];
    let (mut n_lengths, mut n_buffers) = (expected_lengths as u64, expected_buffers as u64);
    let mut meminfo = ptr::null::<Allocation>();

    let engine = handle.engine();
    unsafe {
        engine.info_to_nested_array(
            handle.as_ptr(),
            tags.as_ptr(),
            tags.len() as u64,
            lengths.as_mut_ptr(),
            &mut n_lengths,
            buffers.as_mut_ptr(),
            &mut n_buffers,
            &mut meminfo,
        )
    };
    let meminfo = unsafe { adopt(meminfo) };
    check(engine.as_ref(), ENTRY)?;

    if n_lengths != expected_lengths as u64 || n_buffers != expected_buffers as u64 {
        tether_bail!(
            ShapeMismatch: "{} needs {} lengths and {} buffers, engine returned {} and {}",
            dtype,
            expected_lengths,
            expected_buffers,
            n_lengths,
            n_buffers
        );
    }
    debug!("decoding {dtype} from {n_lengths} lengths and {n_buffers} buffers");

    let mut reader = NestedReader {
        lengths: lengths.iter(),
        buffers: buffers.iter(),
        views: Views {
            entry: ENTRY,
            token: token(ENTRY, meminfo)?,
        },
    };
    let array = reader.read(dtype)?;
    if reader.lengths.next().is_some() || reader.buffers.next().is_some() {
        tether_bail!(ShapeMismatch: "{} left flattened entries unread", dtype);
    }
    Ok(array)
}

/// Positional consumer of flattened lengths and buffers, in the order of
/// [`walk`](crate::flatten::walk).
struct NestedReader<'a> {
    lengths: Iter<'a, i64>,
    buffers: Iter<'a, *const u8>,
    views: Views,
}

impl NestedReader<'_> {
    fn length(&mut self) -> TetherResult<usize> {
        let Some(&len) = self.lengths.next() else {
            tether_bail!(ShapeMismatch: "ran out of lengths");
        };
        usize::try_from(len).map_err(|_| tether_err!(ShapeMismatch: "invalid length {}", len))
    }

    fn sentinel(&mut self) -> TetherResult<()> {
        match self.lengths.next() {
            Some(-1) => Ok(()),
            other => tether_bail!(ShapeMismatch: "expected a struct sentinel, found {:?}", other),
        }
    }

    fn buffer(&mut self) -> TetherResult<*const u8> {
        match self.buffers.next() {
            Some(&ptr) => Ok(ptr),
            None => tether_bail!(ShapeMismatch: "ran out of buffers"),
        }
    }

    fn read(&mut self, dtype: &DType) -> TetherResult<Array> {
        Ok(match dtype {
            DType::List(element) => Array::List(self.list(|r| r.read(element))?),
            DType::Map(map) => {
                let entries = self.list(|r| Ok(Array::Struct(r.structure(map.entries())?)))?;
                Array::Map(MapArray::try_new(entries)?)
            }
            DType::Struct(fields) => Array::Struct(self.structure(fields)?),
            DType::Tuple(fields) => Array::Tuple(self.structure(fields)?),
            DType::Primitive(ptype) => Array::Primitive(self.primitive(dtype, *ptype)?),
            DType::DatetimeTz(tz) => Array::DatetimeTz(DatetimeTzArray::try_new(
                self.primitive(dtype, PType::Datetime)?,
                tz.clone(),
            )?),
            DType::Nullable(inner) => {
                let DType::Primitive(ptype) = inner.as_ref() else {
                    tether_bail!(UnsupportedType: "{} cannot be nested", dtype);
                };
                let len = self.length()?;
                let (bitmap, data) = (self.buffer()?, self.buffer()?);
                let validity = unsafe { self.views.validity(bitmap, len)? };
                let values = unsafe { self.views.fixed(data, len, *ptype)? };
                Array::Nullable(NullableArray::try_new(values, validity)?)
            }
            DType::Decimal(decimal) => {
                let len = self.length()?;
                let (bitmap, data) = (self.buffer()?, self.buffer()?);
                let validity = unsafe { self.views.validity(bitmap, len)? };
                let values = unsafe { self.views.typed(data.cast::<i128>(), len)? };
                Array::Decimal(DecimalArray::try_new(*decimal, values, validity)?)
            }
            DType::Utf8 | DType::Binary => {
                let len = self.length()?;
                let (offsets, bitmap, chars) = (self.buffer()?, self.buffer()?, self.buffer()?);
                Array::VarBin(unsafe {
                    self.views.varbin(
                        len,
                        offsets.cast(),
                        bitmap,
                        chars,
                        matches!(dtype, DType::Binary),
                    )?
                })
            }
            _ => tether_bail!(UnsupportedType: "{} cannot be nested", dtype),
        })
    }

    fn list(
        &mut self,
        element: impl FnOnce(&mut Self) -> TetherResult<Array>,
    ) -> TetherResult<ListArray> {
        let len = self.length()?;
        let (offsets, bitmap) = (self.buffer()?, self.buffer()?);
        let offsets = unsafe { self.views.typed(offsets.cast::<u64>(), len + 1)? };
        let validity = unsafe { self.views.validity(bitmap, len)? };
        ListArray::try_new(offsets, validity, element(self)?)
    }

    fn structure(&mut self, fields: &StructFields) -> TetherResult<StructArray> {
        let len = self.length()?;
        self.sentinel()?;
        let bitmap = self.buffer()?;
        let validity = unsafe { self.views.validity(bitmap, len)? };
        let children: Vec<Array> = fields
            .dtypes()
            .iter()
            .map(|dtype| self.read(dtype))
            .try_collect()?;
        StructArray::try_new(fields.names().clone(), children, validity)
    }

    /// A leaf without nulls. The engine reports a missing bitmap for these.
    fn primitive(&mut self, dtype: &DType, ptype: PType) -> TetherResult<PrimitiveArray> {
        let len = self.length()?;
        let (bitmap, data) = (self.buffer()?, self.buffer()?);
        let validity = unsafe { self.views.validity(bitmap, len)? };
        if validity.null_count() > 0 {
            tether_bail!(MismatchedTypes: dtype, DType::nullable(ptype));
        }
        unsafe { self.views.fixed(data, len, ptype) }
    }
}
