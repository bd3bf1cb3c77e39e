use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use rustc_hash::FxHasher;
use tether_buffer::Buffer;
use tether_dtype::{NativePType, PType, match_each_native_ptype};

use crate::reference::array::NativeArray;

/// An `f64` with a total order, `-0.0` equal to `0.0`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TotalF64(pub f64);

impl TotalF64 {
    fn canonical(self) -> f64 {
        if self.0 == 0.0 { 0.0 } else { self.0 }
    }
}

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().total_cmp(&other.canonical())
    }
}

impl Hash for TotalF64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().to_bits().hash(state)
    }
}

/// One value of any column, used to compare, hash and group rows.
///
/// Integers of every width share one variant so that keys of different integer widths join.
/// `NaN` is a null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Datum<'a> {
    Null,
    Int(i128),
    Float(TotalF64),
    Bytes(&'a [u8]),
    List(Vec<Datum<'a>>),
    Struct(Vec<Datum<'a>>),
}

impl Datum<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(v) => Some(*v as f64),
            Datum::Float(v) => Some(v.0),
            _ => None,
        }
    }
}

fn fixed_width(ptype: PType, data: &tether_buffer::ByteBuffer) -> Vec<Datum<'static>> {
    match_each_native_ptype!(ptype, |$T| {
        Buffer::<$T>::from_byte_buffer(data.clone())
            .iter()
            .map(|&v| scalar(ptype, v))
            .collect()
    })
}

fn scalar<T: NativePType>(ptype: PType, value: T) -> Datum<'static> {
    if ptype.is_float() {
        let v = value.to_f64_lossy();
        if v.is_nan() {
            Datum::Null
        } else {
            Datum::Float(TotalF64(v))
        }
    } else {
        Datum::Int(value.to_i128_lossy())
    }
}

/// Every row of `array` as a [`Datum`].
pub(crate) fn column_datums(array: &NativeArray) -> Vec<Datum<'_>> {
    match array {
        NativeArray::Numpy { ptype, data } => fixed_width(*ptype, data),
        NativeArray::Categorical { ptype, data, .. } => fixed_width(*ptype, data)
            .into_iter()
            .map(|d| match d {
                Datum::Int(code) if code < 0 => Datum::Null,
                other => other,
            })
            .collect(),
        NativeArray::Nullable {
            ptype,
            data,
            validity,
        } => fixed_width(*ptype, data)
            .into_iter()
            .zip(validity.iter())
            .map(|(d, valid)| if valid { d } else { Datum::Null })
            .collect(),
        NativeArray::Decimal { data, validity, .. } => data
            .iter()
            .zip(validity.iter())
            .map(|(&v, valid)| if valid { Datum::Int(v) } else { Datum::Null })
            .collect(),
        NativeArray::Interval { ptype, left, right } => fixed_width(*ptype, left)
            .into_iter()
            .zip(fixed_width(*ptype, right))
            .map(|(l, r)| Datum::Struct(vec![l, r]))
            .collect(),
        NativeArray::String { .. } | NativeArray::Dict { .. } => (0..array.len())
            .map(|i| array.bytes_at(i).map_or(Datum::Null, Datum::Bytes))
            .collect(),
        NativeArray::List {
            offsets,
            validity,
            child,
        } => {
            let elements = column_datums(child);
            (0..validity.len())
                .map(|i| {
                    if validity.is_valid(i) {
                        Datum::List(elements[offsets[i] as usize..offsets[i + 1] as usize].to_vec())
                    } else {
                        Datum::Null
                    }
                })
                .collect()
        }
        NativeArray::Struct {
            validity, fields, ..
        } => {
            let mut columns = fields.iter().map(column_datums).collect_vec();
            (0..validity.len())
                .map(|i| {
                    if validity.is_valid(i) {
                        Datum::Struct(
                            columns
                                .iter_mut()
                                .map(|c| std::mem::replace(&mut c[i], Datum::Null))
                                .collect(),
                        )
                    } else {
                        Datum::Null
                    }
                })
                .collect()
        }
    }
}

/// The composite key of every row over `columns`.
pub(crate) fn row_keys<'a>(columns: &[&'a NativeArray]) -> Vec<Vec<Datum<'a>>> {
    let len = columns.first().map_or(0, |c| c.len());
    let mut datums = columns.iter().map(|c| column_datums(c)).collect_vec();
    (0..len)
        .map(|row| {
            datums
                .iter_mut()
                .map(|c| std::mem::replace(&mut c[row], Datum::Null))
                .collect()
        })
        .collect()
}

/// A deterministic hash of a composite key.
pub(crate) fn hash_key(key: &[Datum<'_>]) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use tether_buffer::Bitmap;

    use super::*;

    #[test]
    fn nan_and_nulls() {
        let array = NativeArray::Nullable {
            ptype: PType::F64,
            data: Buffer::from_vec(vec![1.0f64, f64::NAN, -0.0]).into_byte_buffer(),
            validity: Bitmap::from_iter([false, true, true]),
        };
        let datums = column_datums(&array);
        assert_eq!(datums[0], Datum::Null);
        assert_eq!(datums[1], Datum::Null);
        assert_eq!(datums[2], Datum::Float(TotalF64(0.0)));
    }

    #[test]
    fn widths_compare_equal() {
        let a = NativeArray::Numpy {
            ptype: PType::I32,
            data: Buffer::from_vec(vec![7i32]).into_byte_buffer(),
        };
        let b = NativeArray::Numpy {
            ptype: PType::U64,
            data: Buffer::from_vec(vec![7u64]).into_byte_buffer(),
        };
        assert_eq!(row_keys(&[&a]), row_keys(&[&b]));
        assert_eq!(hash_key(&row_keys(&[&a])[0]), hash_key(&row_keys(&[&b])[0]));
    }
}
