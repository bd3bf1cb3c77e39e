use std::sync::Arc;

use itertools::Itertools;
use tether_buffer::{Bitmap, Buffer, ByteBuffer};
use tether_dtype::{PType, match_each_native_ptype};
use tether_error::{TetherResult, tether_bail};

use crate::reference::array::NativeArray;

fn gather(ptype: PType, data: &ByteBuffer, indices: &[Option<usize>], fill: i64) -> ByteBuffer {
    match_each_native_ptype!(ptype, |$T| {
        let values = Buffer::<$T>::from_byte_buffer(data.clone());
        indices
            .iter()
            .map(|i| i.map_or(fill as $T, |i| values[i]))
            .collect::<Buffer<$T>>()
            .into_byte_buffer()
    })
}

fn gather_validity(indices: &[Option<usize>], valid: impl Fn(usize) -> bool) -> Bitmap {
    indices.iter().map(|i| i.is_some_and(&valid)).collect()
}

/// Gather the rows `indices` of `array`, `None` producing a null row.
///
/// Fixed-width arrays without validity gain one when any row is `None`. Dictionary outputs
/// share the values of their input.
pub(crate) fn take(array: &NativeArray, indices: &[Option<usize>]) -> TetherResult<NativeArray> {
    Ok(match array {
        NativeArray::Numpy { ptype, data } => {
            let data = gather(*ptype, data, indices, 0);
            if indices.iter().all(Option::is_some) {
                NativeArray::Numpy {
                    ptype: *ptype,
                    data,
                }
            } else {
                NativeArray::Nullable {
                    ptype: *ptype,
                    data,
                    validity: gather_validity(indices, |_| true),
                }
            }
        }
        NativeArray::Categorical {
            ptype,
            data,
            num_categories,
        } => NativeArray::Categorical {
            ptype: *ptype,
            data: gather(*ptype, data, indices, -1),
            num_categories: *num_categories,
        },
        NativeArray::Nullable {
            ptype,
            data,
            validity,
        } => NativeArray::Nullable {
            ptype: *ptype,
            data: gather(*ptype, data, indices, 0),
            validity: gather_validity(indices, |i| validity.is_valid(i)),
        },
        NativeArray::Decimal {
            precision,
            scale,
            data,
            validity,
        } => NativeArray::Decimal {
            precision: *precision,
            scale: *scale,
            data: indices.iter().map(|i| i.map_or(0, |i| data[i])).collect(),
            validity: gather_validity(indices, |i| validity.is_valid(i)),
        },
        NativeArray::Interval { ptype, left, right } => {
            if indices.iter().any(Option::is_none) {
                tether_bail!("interval arrays cannot hold nulls");
            }
            NativeArray::Interval {
                ptype: *ptype,
                left: gather(*ptype, left, indices, 0),
                right: gather(*ptype, right, indices, 0),
            }
        }
        NativeArray::String { binary, .. } => {
            let mut offsets = Vec::with_capacity(indices.len() + 1);
            let mut chars = Vec::new();
            offsets.push(0u64);
            for index in indices {
                if let Some(bytes) = index.and_then(|i| array.bytes_at(i)) {
                    chars.extend_from_slice(bytes);
                }
                offsets.push(chars.len() as u64);
            }
            NativeArray::String {
                binary: *binary,
                offsets: Buffer::from_vec(offsets),
                chars: ByteBuffer::from_vec(chars),
                validity: gather_validity(indices, |i| array.is_valid(i)),
            }
        }
        NativeArray::Dict {
            values,
            indices: codes,
            validity,
            global,
        } => NativeArray::Dict {
            values: Arc::clone(values),
            indices: indices.iter().map(|i| i.map_or(0, |i| codes[i])).collect(),
            validity: gather_validity(indices, |i| validity.is_valid(i)),
            global: *global,
        },
        NativeArray::List {
            offsets,
            validity,
            child,
        } => {
            let mut new_offsets = vec![0u64];
            let mut child_indices = Vec::new();
            for index in indices {
                if let Some(i) = index.filter(|&i| validity.is_valid(i)) {
                    child_indices.extend((offsets[i] as usize..offsets[i + 1] as usize).map(Some));
                }
                new_offsets.push(child_indices.len() as u64);
            }
            NativeArray::List {
                offsets: Buffer::from_vec(new_offsets),
                validity: gather_validity(indices, |i| validity.is_valid(i)),
                child: Box::new(take(child, &child_indices)?),
            }
        }
        NativeArray::Struct {
            names,
            validity,
            fields,
        } => NativeArray::Struct {
            names: names.clone(),
            validity: gather_validity(indices, |i| validity.is_valid(i)),
            fields: fields.iter().map(|f| take(f, indices)).try_collect()?,
        },
    })
}

/// Gather the same rows from every column.
pub(crate) fn take_all(
    columns: &[&NativeArray],
    indices: &[Option<usize>],
) -> TetherResult<Vec<NativeArray>> {
    columns.iter().map(|c| take(c, indices)).try_collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::reference::datum::{Datum, column_datums};

    fn strings(values: &[Option<&str>]) -> NativeArray {
        let mut offsets = vec![0u64];
        let mut chars = Vec::new();
        for v in values {
            chars.extend_from_slice(v.unwrap_or_default().as_bytes());
            offsets.push(chars.len() as u64);
        }
        NativeArray::String {
            binary: false,
            offsets: Buffer::from_vec(offsets),
            chars: ByteBuffer::from_vec(chars),
            validity: values.iter().map(Option::is_some).collect(),
        }
    }

    #[rstest]
    #[case(vec![Some(2), Some(0)], vec![Some("c"), Some("a")])]
    #[case(vec![None, Some(1)], vec![None, None])]
    #[case(vec![], vec![])]
    fn strings_gather(#[case] indices: Vec<Option<usize>>, #[case] expected: Vec<Option<&str>>) {
        let array = strings(&[Some("a"), None, Some("c")]);
        let taken = take(&array, &indices).unwrap();
        let expected = strings(&expected);
        assert_eq!(column_datums(&taken), column_datums(&expected));
    }

    #[test]
    fn numpy_gains_validity() {
        let array = NativeArray::Numpy {
            ptype: PType::I16,
            data: Buffer::from_vec(vec![5i16, 6]).into_byte_buffer(),
        };
        let taken = take(&array, &[Some(1), None]).unwrap();
        assert!(matches!(taken, NativeArray::Nullable { .. }));
        assert_eq!(column_datums(&taken), vec![Datum::Int(6), Datum::Null]);
    }

    #[test]
    fn dict_shares_values() {
        let values = Arc::new(strings(&[Some("x"), Some("y")]));
        let array = NativeArray::Dict {
            values: values.clone(),
            indices: Buffer::from_vec(vec![1, 0, 1]),
            validity: Bitmap::new_valid(3),
            global: false,
        };
        let NativeArray::Dict { values: taken, .. } = take(&array, &[Some(2), Some(1)]).unwrap()
        else {
            unreachable!()
        };
        assert!(Arc::ptr_eq(&values, &taken));
    }
}
