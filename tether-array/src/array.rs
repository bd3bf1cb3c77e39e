use tether_dtype::DType;

use crate::arrays::*;

/// A managed-runtime array value of any supported kind.
///
/// Cloning an array clones the references to its buffers, never the buffers themselves.
#[derive(Clone, Debug, PartialEq)]
pub enum Array {
    /// Fixed-width values without validity.
    Primitive(PrimitiveArray),
    /// Fixed-width values with validity.
    Nullable(NullableArray),
    /// Strings or binary values.
    VarBin(VarBinArray),
    /// 128-bit decimals.
    Decimal(DecimalArray),
    /// Variable-length lists.
    List(ListArray),
    /// Named fields.
    Struct(StructArray),
    /// Positional fields.
    Tuple(StructArray),
    /// Lists of key-value entries.
    Map(MapArray),
    /// Dictionary-encoded strings.
    Dict(DictArray),
    /// Codes into fixed categories.
    Categorical(CategoricalArray),
    /// Closed intervals.
    Interval(IntervalArray),
    /// Time-zone aware datetimes.
    DatetimeTz(DatetimeTzArray),
    /// A user-defined type.
    Extension(ExtensionArray),
}

macro_rules! dispatch {
    ($self:expr, |$a:ident| $body:expr) => {
        match $self {
            Array::Primitive($a) => $body,
            Array::Nullable($a) => $body,
            Array::VarBin($a) => $body,
            Array::Decimal($a) => $body,
            Array::List($a) => $body,
            Array::Struct($a) => $body,
            Array::Tuple($a) => $body,
            Array::Map($a) => $body,
            Array::Dict($a) => $body,
            Array::Categorical($a) => $body,
            Array::Interval($a) => $body,
            Array::DatetimeTz($a) => $body,
            Array::Extension($a) => $body,
        }
    };
}

impl Array {
    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, |a| a.len())
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The logical type of the value.
    pub fn dtype(&self) -> DType {
        match self {
            Array::Tuple(a) => DType::Tuple(a.struct_fields()),
            _ => dispatch!(self, |a| a.dtype()),
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $array:ty) => {
        impl From<$array> for Array {
            fn from(array: $array) -> Self {
                Array::$variant(array)
            }
        }
    };
}

impl_from!(Primitive, PrimitiveArray);
impl_from!(Nullable, NullableArray);
impl_from!(VarBin, VarBinArray);
impl_from!(Decimal, DecimalArray);
impl_from!(List, ListArray);
impl_from!(Struct, StructArray);
impl_from!(Map, MapArray);
impl_from!(Dict, DictArray);
impl_from!(Categorical, CategoricalArray);
impl_from!(Interval, IntervalArray);
impl_from!(DatetimeTz, DatetimeTzArray);
impl_from!(Extension, ExtensionArray);

/// Conversion into an [`Array`].
pub trait IntoArray {
    /// Wrap `self` in the matching [`Array`] variant.
    fn into_array(self) -> Array;
}

impl<T: Into<Array>> IntoArray for T {
    fn into_array(self) -> Array {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_buffer::Bitmap;
    use tether_dtype::{CategoricalDType, PType};

    use super::*;

    #[test]
    fn nested_dtype() {
        let names = StructArray::from_fields(
            vec![
                ("id", PrimitiveArray::from(vec![1i64, 2, 3]).into_array()),
                (
                    "name",
                    VarBinArray::from_strs([Some("a"), None, Some("c")]).into_array(),
                ),
            ],
            3,
        )
        .unwrap();
        let list = ListArray::from_lengths([Some(2), None, Some(1)], names.into_array()).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(
            list.into_array().dtype().to_string(),
            "list({id=i64, name=utf8})"
        );
    }

    #[test]
    fn tuple_dtype_is_positional() {
        let tuple = Array::Tuple(
            StructArray::positional(
                vec![PrimitiveArray::from(vec![1u8]).into_array()],
                Bitmap::new_valid(1),
            )
            .unwrap(),
        );
        assert_eq!(tuple.dtype(), DType::tuple(vec![DType::Primitive(PType::U8)]));
    }

    #[test]
    fn dictionary_shares_values() {
        let values = Arc::new(VarBinArray::from_strs([Some("x"), Some("y")]).into_array());
        let a = DictArray::try_new(
            NullableArray::from_option_iter([Some(1i32), None, Some(0)]),
            values.clone(),
            true,
        )
        .unwrap();
        let b = DictArray::try_new(
            NullableArray::from_option_iter([Some(0i32)]),
            values.clone(),
            true,
        )
        .unwrap();
        assert!(Arc::ptr_eq(a.values(), b.values()));
        assert_eq!(a.bytes_at(0), Some(&b"y"[..]));
        assert_eq!(a.bytes_at(1), None);
        assert!(
            DictArray::try_new(NullableArray::from_option_iter([Some(5i32)]), values, false)
                .is_err()
        );
    }

    #[test]
    fn categorical_labels() {
        let dtype = CategoricalDType::new(vec![Arc::from("lo"), Arc::from("hi")].into(), true);
        let array =
            CategoricalArray::from_labels([Some("hi"), None, Some("lo"), Some("??")], dtype)
                .unwrap();
        assert_eq!(array.codes().ptype(), PType::I8);
        assert_eq!(array.label_at(0), Some("hi"));
        assert_eq!(array.label_at(1), None);
        assert_eq!(array.label_at(3), None);
    }
}
