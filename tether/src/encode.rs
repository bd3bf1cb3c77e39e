//! Array to handle.
//!
//! Encoding never copies buffer contents. Every constructor receives raw pointers into the
//! managed buffers together with ownership tokens that keep those buffers alive for as long as
//! the native descriptor exists.

use std::ffi::{CString, c_char};
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use tether_array::Array;
use tether_buffer::{Allocation, MemInfo};
use tether_dtype::{CTypeEnum, DType, PType};
use tether_error::{TetherResult, tether_bail};
use tether_native::{NativeEngine, array_info};

use crate::flatten::{buffers_of, field_names_of, lengths_of, num_buffers, num_lengths, tags_of};
use crate::handle::ArrayHandle;
use crate::native::check_array;

fn raw(meminfo: MemInfo) -> *const Allocation {
    Allocation::into_raw(meminfo)
}

fn ctype(ptype: PType) -> i32 {
    ptype.c_type().into()
}

/// Reject descriptors that no constructor accepts, whatever value they are paired with.
pub(crate) fn check_supported(dtype: &DType) -> TetherResult<()> {
    match dtype {
        DType::Extension(ext) => {
            tether_bail!(UnsupportedType: "extension type {} has no native form", ext.id())
        }
        DType::Nullable(inner) if !matches!(inner.as_ref(), DType::Primitive(_)) => {
            tether_bail!(UnsupportedType: "{}", dtype)
        }
        DType::Dictionary(indices, values) => {
            if indices.as_ref() != &DType::nullable(PType::I32) {
                tether_bail!(UnsupportedType: "dictionary indices must be nullable i32, not {}", indices);
            }
            if !matches!(values.as_ref(), DType::Utf8 | DType::Binary) {
                tether_bail!(UnsupportedType: "dictionary values must be strings, not {}", values);
            }
            Ok(())
        }
        _ if dtype.is_nested() => tags_of(dtype).map(drop),
        _ => Ok(()),
    }
}

/// Borrow `array` into a new native descriptor of type `dtype`.
///
/// Unsupported descriptors and mismatched values fail before any native call.
pub(crate) fn encode(
    engine: &Arc<dyn NativeEngine>,
    array: &Array,
    dtype: &DType,
    verify_shapes: bool,
) -> TetherResult<ArrayHandle> {
    check_supported(dtype)?;
    let len = array.len() as u64;
    let (entry, ptr): (&'static str, *mut array_info) = match (dtype, array) {
        (DType::Primitive(ptype), Array::Primitive(a)) if a.ptype() == *ptype => {
            let data = a.byte_buffer();
            (
                "numpy_array_to_info",
                unsafe {
                    engine.numpy_array_to_info(len, data.as_ptr(), ctype(*ptype), raw(data.meminfo()))
                },
            )
        }
        (DType::DatetimeTz(tz), Array::DatetimeTz(a)) if a.tz() == tz => {
            let data = a.values().byte_buffer();
            (
                "numpy_array_to_info",
                unsafe {
                    engine.numpy_array_to_info(
                        len,
                        data.as_ptr(),
                        CTypeEnum::Datetime.into(),
                        raw(data.meminfo()),
                    )
                },
            )
        }
        (DType::Categorical(categorical), Array::Categorical(a))
            if a.categorical_dtype() == categorical =>
        {
            let codes = a.codes();
            let data = codes.byte_buffer();
            (
                "categorical_array_to_info",
                unsafe {
                    engine.categorical_array_to_info(
                        len,
                        data.as_ptr(),
                        ctype(codes.ptype()),
                        categorical.num_categories() as i64,
                        raw(data.meminfo()),
                    )
                },
            )
        }
        (DType::Nullable(inner), Array::Nullable(a))
            if inner.as_ref() == &DType::Primitive(a.ptype()) =>
        {
            let data = a.byte_buffer();
            let bitmap = a.validity().buffer();
            (
                "nullable_array_to_info",
                unsafe {
                    engine.nullable_array_to_info(
                        len,
                        data.as_ptr(),
                        ctype(a.ptype()),
                        bitmap.as_ptr(),
                        raw(data.meminfo()),
                        raw(bitmap.meminfo()),
                    )
                },
            )
        }
        (DType::Decimal(decimal), Array::Decimal(a)) if a.decimal_dtype() == *decimal => {
            let bitmap = a.validity().buffer();
            (
                "decimal_array_to_info",
                unsafe {
                    engine.decimal_array_to_info(
                        len,
                        a.values().as_ptr().cast(),
                        CTypeEnum::Decimal.into(),
                        bitmap.as_ptr(),
                        raw(a.values().meminfo()),
                        raw(bitmap.meminfo()),
                        i32::from(decimal.precision()),
                        i32::from(decimal.scale()),
                    )
                },
            )
        }
        (DType::Interval(ptype), Array::Interval(a)) if a.ptype() == *ptype => {
            let (left, right) = (a.left().byte_buffer(), a.right().byte_buffer());
            (
                "interval_array_to_info",
                unsafe {
                    engine.interval_array_to_info(
                        len,
                        left.as_ptr(),
                        right.as_ptr(),
                        ctype(*ptype),
                        raw(left.meminfo()),
                        raw(right.meminfo()),
                    )
                },
            )
        }
        (DType::Utf8 | DType::Binary, Array::VarBin(a))
            if a.is_binary() == matches!(dtype, DType::Binary) =>
        {
            (
                "string_array_to_info",
                unsafe {
                    engine.string_array_to_info(
                        len,
                        a.end_offset(),
                        a.bytes().as_ptr(),
                        a.offsets().as_ptr(),
                        a.validity().buffer().as_ptr(),
                        raw(Allocation::new(a.clone())),
                        a.is_binary(),
                    )
                },
            )
        }
        (DType::Dictionary(indices_dtype, values_dtype), Array::Dict(a)) => {
            let values = encode(engine, a.values(), values_dtype, verify_shapes)?;
            let indices = encode(
                engine,
                &Array::Nullable(a.indices().clone()),
                indices_dtype,
                verify_shapes,
            )?;
            (
                "dict_str_array_to_info",
                unsafe {
                    engine.dict_str_array_to_info(
                        values.into_raw(),
                        indices.into_raw(),
                        a.has_global_dictionary(),
                    )
                },
            )
        }
        (dtype, array) if dtype.is_nested() => {
            ("nested_array_to_info", encode_nested(engine, array, dtype, verify_shapes)?)
        }
        (dtype, array) => tether_bail!(MismatchedTypes: dtype, array.dtype()),
    };
    check_array(engine, entry, ptr)
}

fn encode_nested(
    engine: &Arc<dyn NativeEngine>,
    array: &Array,
    dtype: &DType,
    verify_shapes: bool,
) -> TetherResult<*mut array_info> {
    let tags = tags_of(dtype)?;
    let lengths = lengths_of(dtype, array)?;
    let buffers = buffers_of(dtype, array)?;
    if verify_shapes {
        let (n_lengths, n_buffers) = (num_lengths(dtype)?, num_buffers(dtype)?);
        if lengths.len() != n_lengths || buffers.len() != n_buffers {
            tether_bail!(
                ShapeMismatch: "{} flattened to {} lengths and {} buffers, expected {} and {}",
                dtype,
                lengths.len(),
                buffers.len(),
                n_lengths,
                n_buffers
            );
        }
    }
    let names = field_names_of(dtype)?
        .iter()
        .map(|name| CString::new(name.as_bytes()))
        .try_collect::<_, Vec<_>, _>()?;
    let name_ptrs = names.iter().map(|name| name.as_ptr()).collect::<Vec<*const c_char>>();
    debug!(
        "flattened {} into {} tags, {} lengths, {} buffers",
        dtype,
        tags.len(),
        lengths.len(),
        buffers.len()
    );
    // One token on the whole tree keeps every descendant buffer alive.
    Ok(unsafe {
        engine.nested_array_to_info(
            tags.as_ptr(),
            buffers.as_ptr(),
            lengths.as_ptr(),
            name_ptrs.as_ptr(),
            raw(Allocation::new(array.clone())),
        )
    })
}
