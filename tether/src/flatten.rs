//! Flattening of nested type trees into the positional layout of the nested constructor.
//!
//! A nested array crosses the native boundary as four parallel lists: type tags, lengths,
//! buffer pointers and struct field names. All four are produced by one pre-order traversal,
//! [`walk`], so they can never disagree on the order in which nodes are visited. The decoder
//! consumes lengths and buffers in the same order.

use std::ptr;

use tether_array::Array;
use tether_array::arrays::{ListArray, StructArray};
use tether_dtype::{CTypeEnum, DType, FieldName, StructFields};
use tether_error::{TetherResult, tether_bail, tether_err};

/// Field-name list emitted for nested types that contain no struct at all.
pub const PLACEHOLDER_FIELD_NAME: &str = "irrelevant";

/// The physical list flavor being visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// A plain list.
    List,
    /// A map, seen as a list of key-value entries.
    Map,
}

/// The physical struct flavor being visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    /// A struct with named fields.
    Struct,
    /// A tuple, seen as a struct with positional names.
    Tuple,
    /// The key-value entries of a map.
    Entries,
}

/// Callbacks of the pre-order traversal in [`walk`].
///
/// The array arguments are `None` when only a type is walked.
pub trait NestedVisitor<'a> {
    /// A list node, before its elements.
    fn list(&mut self, kind: ListKind, array: Option<&'a ListArray>) -> TetherResult<()>;

    /// A struct node, before its fields.
    fn structure(
        &mut self,
        kind: StructKind,
        fields: &'a StructFields,
        array: Option<&'a StructArray>,
    ) -> TetherResult<()>;

    /// A leaf node.
    fn leaf(&mut self, dtype: &'a DType, array: Option<&'a Array>) -> TetherResult<()>;
}

/// Visit `dtype`, and `array` alongside it when given, in the canonical pre-order.
///
/// Fails with `UnsupportedType` on a node that cannot be nested and with `MismatchedTypes`
/// when `array` does not have the shape of `dtype`.
pub fn walk<'a, V: NestedVisitor<'a>>(
    dtype: &'a DType,
    array: Option<&'a Array>,
    visitor: &mut V,
) -> TetherResult<()> {
    match dtype {
        DType::List(element) => {
            let list = match array {
                None => None,
                Some(Array::List(list)) => Some(list),
                Some(other) => tether_bail!(MismatchedTypes: dtype, other.dtype()),
            };
            visitor.list(ListKind::List, list)?;
            walk(element, list.map(ListArray::elements), visitor)
        }
        DType::Map(map) => {
            let list = match array {
                None => None,
                Some(Array::Map(map)) => Some(map.entries()),
                Some(other) => tether_bail!(MismatchedTypes: dtype, other.dtype()),
            };
            visitor.list(ListKind::Map, list)?;
            let entries = match list.map(ListArray::elements) {
                None => None,
                Some(Array::Struct(entries)) => Some(entries),
                Some(other) => tether_bail!(MismatchedTypes: "map entries", other.dtype()),
            };
            walk_struct(StructKind::Entries, map.entries(), entries, visitor)
        }
        DType::Struct(fields) => {
            let array = match array {
                None => None,
                Some(Array::Struct(array)) => Some(array),
                Some(other) => tether_bail!(MismatchedTypes: dtype, other.dtype()),
            };
            walk_struct(StructKind::Struct, fields, array, visitor)
        }
        DType::Tuple(fields) => {
            let array = match array {
                None => None,
                Some(Array::Tuple(array)) => Some(array),
                Some(other) => tether_bail!(MismatchedTypes: dtype, other.dtype()),
            };
            walk_struct(StructKind::Tuple, fields, array, visitor)
        }
        DType::Primitive(_)
        | DType::Utf8
        | DType::Binary
        | DType::Decimal(_)
        | DType::DatetimeTz(_) => leaf(dtype, array, visitor),
        DType::Nullable(inner) if matches!(inner.as_ref(), DType::Primitive(_)) => {
            leaf(dtype, array, visitor)
        }
        _ => tether_bail!(UnsupportedType: "{} cannot be nested", dtype),
    }
}

fn walk_struct<'a, V: NestedVisitor<'a>>(
    kind: StructKind,
    fields: &'a StructFields,
    array: Option<&'a StructArray>,
    visitor: &mut V,
) -> TetherResult<()> {
    if let Some(array) = array {
        if array.fields().len() != fields.nfields() {
            tether_bail!(
                MismatchedTypes: format!("{} fields", fields.nfields()),
                format!("{} fields", array.fields().len())
            );
        }
    }
    visitor.structure(kind, fields, array)?;
    for (i, dtype) in fields.dtypes().iter().enumerate() {
        walk(dtype, array.map(|a| &a.fields()[i]), visitor)?;
    }
    Ok(())
}

fn leaf<'a, V: NestedVisitor<'a>>(
    dtype: &'a DType,
    array: Option<&'a Array>,
    visitor: &mut V,
) -> TetherResult<()> {
    if let Some(array) = array {
        let actual = array.dtype();
        if &actual != dtype {
            tether_bail!(MismatchedTypes: dtype, actual);
        }
    }
    visitor.leaf(dtype, array)
}

fn present<T>(node: Option<T>) -> TetherResult<T> {
    node.ok_or_else(|| tether_err!("a value is needed to flatten this node"))
}

/// The wire tag of a leaf that may appear inside a nested type.
fn leaf_tags(dtype: &DType, tags: &mut Vec<i32>) -> TetherResult<()> {
    let ctype = match dtype {
        DType::Primitive(ptype) => ptype.c_type(),
        DType::Nullable(inner) => match inner.as_ref() {
            DType::Primitive(ptype) => ptype.c_type(),
            _ => tether_bail!(UnsupportedType: "{} cannot be nested", dtype),
        },
        DType::Utf8 => CTypeEnum::String,
        DType::Binary => CTypeEnum::Binary,
        DType::DatetimeTz(_) => CTypeEnum::Datetime,
        DType::Decimal(decimal) => {
            tags.extend([
                i32::from(CTypeEnum::Decimal),
                i32::from(decimal.precision()),
                i32::from(decimal.scale()),
            ]);
            return Ok(());
        }
        _ => tether_bail!(UnsupportedType: "{} cannot be nested", dtype),
    };
    tags.push(ctype.into());
    Ok(())
}

#[derive(Default)]
struct Tags(Vec<i32>);

impl<'a> NestedVisitor<'a> for Tags {
    fn list(&mut self, _kind: ListKind, _array: Option<&'a ListArray>) -> TetherResult<()> {
        self.0.push(CTypeEnum::List.into());
        Ok(())
    }

    fn structure(
        &mut self,
        _kind: StructKind,
        fields: &'a StructFields,
        _array: Option<&'a StructArray>,
    ) -> TetherResult<()> {
        let nfields = i32::try_from(fields.nfields())
            .map_err(|_| tether_err!(UnsupportedType: "struct of {} fields", fields.nfields()))?;
        self.0.extend([CTypeEnum::Struct.into(), nfields]);
        Ok(())
    }

    fn leaf(&mut self, dtype: &'a DType, _array: Option<&'a Array>) -> TetherResult<()> {
        leaf_tags(dtype, &mut self.0)
    }
}

#[derive(Default)]
struct Lengths(Vec<i64>);

impl<'a> NestedVisitor<'a> for Lengths {
    fn list(&mut self, _kind: ListKind, array: Option<&'a ListArray>) -> TetherResult<()> {
        self.0.push(present(array)?.len() as i64);
        Ok(())
    }

    fn structure(
        &mut self,
        _kind: StructKind,
        _fields: &'a StructFields,
        array: Option<&'a StructArray>,
    ) -> TetherResult<()> {
        self.0.extend([present(array)?.len() as i64, -1]);
        Ok(())
    }

    fn leaf(&mut self, _dtype: &'a DType, array: Option<&'a Array>) -> TetherResult<()> {
        self.0.push(present(array)?.len() as i64);
        Ok(())
    }
}

#[derive(Default)]
struct Buffers(Vec<*const u8>);

impl<'a> NestedVisitor<'a> for Buffers {
    fn list(&mut self, _kind: ListKind, array: Option<&'a ListArray>) -> TetherResult<()> {
        let list = present(array)?;
        self.0.push(list.offsets().as_ptr().cast());
        self.0.push(list.validity().buffer().as_ptr());
        Ok(())
    }

    fn structure(
        &mut self,
        _kind: StructKind,
        _fields: &'a StructFields,
        array: Option<&'a StructArray>,
    ) -> TetherResult<()> {
        self.0.push(present(array)?.validity().buffer().as_ptr());
        Ok(())
    }

    fn leaf(&mut self, dtype: &'a DType, array: Option<&'a Array>) -> TetherResult<()> {
        match present(array)? {
            Array::Primitive(array) => self.0.extend([ptr::null(), array.byte_buffer().as_ptr()]),
            Array::DatetimeTz(array) => {
                self.0.extend([ptr::null(), array.values().byte_buffer().as_ptr()])
            }
            Array::Nullable(array) => self.0.extend([
                array.validity().buffer().as_ptr(),
                array.byte_buffer().as_ptr(),
            ]),
            Array::Decimal(array) => self.0.extend([
                array.validity().buffer().as_ptr(),
                array.values().as_ptr().cast(),
            ]),
            Array::VarBin(array) => self.0.extend([
                array.offsets().as_ptr().cast(),
                array.validity().buffer().as_ptr(),
                array.bytes().as_ptr(),
            ]),
            other => tether_bail!(MismatchedTypes: dtype, other.dtype()),
        }
        Ok(())
    }
}

#[derive(Default)]
struct Names(Vec<FieldName>);

impl<'a> NestedVisitor<'a> for Names {
    fn list(&mut self, _kind: ListKind, _array: Option<&'a ListArray>) -> TetherResult<()> {
        Ok(())
    }

    fn structure(
        &mut self,
        _kind: StructKind,
        fields: &'a StructFields,
        _array: Option<&'a StructArray>,
    ) -> TetherResult<()> {
        self.0.extend(fields.names().iter().cloned());
        Ok(())
    }

    fn leaf(&mut self, _dtype: &'a DType, _array: Option<&'a Array>) -> TetherResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Counts {
    lengths: usize,
    buffers: usize,
}

impl<'a> NestedVisitor<'a> for Counts {
    fn list(&mut self, _kind: ListKind, _array: Option<&'a ListArray>) -> TetherResult<()> {
        self.lengths += 1;
        self.buffers += 2;
        Ok(())
    }

    fn structure(
        &mut self,
        _kind: StructKind,
        _fields: &'a StructFields,
        _array: Option<&'a StructArray>,
    ) -> TetherResult<()> {
        self.lengths += 2;
        self.buffers += 1;
        Ok(())
    }

    fn leaf(&mut self, dtype: &'a DType, _array: Option<&'a Array>) -> TetherResult<()> {
        self.lengths += 1;
        self.buffers += match dtype {
            DType::Utf8 | DType::Binary => 3,
            _ => 2,
        };
        Ok(())
    }
}

fn nested(dtype: &DType) -> TetherResult<()> {
    if !dtype.is_nested() {
        tether_bail!(UnsupportedType: "{} is not a nested type", dtype);
    }
    Ok(())
}

/// The pre-order type tags of a nested type.
pub fn tags_of(dtype: &DType) -> TetherResult<Vec<i32>> {
    nested(dtype)?;
    let mut tags = Tags::default();
    walk(dtype, None, &mut tags)?;
    Ok(tags.0)
}

/// The lengths of every node of a nested array. Structs add a `-1` sentinel.
pub fn lengths_of(dtype: &DType, array: &Array) -> TetherResult<Vec<i64>> {
    nested(dtype)?;
    let mut lengths = Lengths::default();
    walk(dtype, Some(array), &mut lengths)?;
    Ok(lengths.0)
}

/// The buffer pointers of every node of a nested array. A missing bitmap is a null pointer.
///
/// The pointers stay valid for as long as `array` is alive.
pub fn buffers_of(dtype: &DType, array: &Array) -> TetherResult<Vec<*const u8>> {
    nested(dtype)?;
    let mut buffers = Buffers::default();
    walk(dtype, Some(array), &mut buffers)?;
    Ok(buffers.0)
}

/// Every struct field name of a nested type in pre-order, or the placeholder when there is none.
pub fn field_names_of(dtype: &DType) -> TetherResult<Vec<FieldName>> {
    nested(dtype)?;
    let mut names = Names::default();
    walk(dtype, None, &mut names)?;
    if names.0.is_empty() {
        names.0.push(FieldName::from(PLACEHOLDER_FIELD_NAME));
    }
    Ok(names.0)
}

fn counts(dtype: &DType) -> TetherResult<Counts> {
    nested(dtype)?;
    let mut counts = Counts::default();
    walk(dtype, None, &mut counts)?;
    Ok(counts)
}

/// How many entries [`lengths_of`] emits for any value of `dtype`.
pub fn num_lengths(dtype: &DType) -> TetherResult<usize> {
    Ok(counts(dtype)?.lengths)
}

/// How many entries [`buffers_of`] emits for any value of `dtype`.
pub fn num_buffers(dtype: &DType) -> TetherResult<usize> {
    Ok(counts(dtype)?.buffers)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tether_array::IntoArray;
    use tether_array::arrays::{NullableArray, PrimitiveArray, VarBinArray};
    use tether_buffer::Bitmap;
    use tether_dtype::{DecimalDType, PType};

    use super::*;

    fn point() -> DType {
        DType::Struct(
            StructFields::try_new(
                vec![FieldName::from("x"), FieldName::from("label")].into(),
                vec![DType::nullable(PType::I32), DType::Utf8],
            )
            .unwrap(),
        )
    }

    fn points(lengths: &[usize]) -> Array {
        let rows: usize = lengths.iter().sum();
        let xs = NullableArray::from_option_iter((0..rows).map(|i| Some(i as i32)));
        let labels = VarBinArray::from_strs((0..rows).map(|_| Some("p")));
        let elements = StructArray::try_new(
            vec![FieldName::from("x"), FieldName::from("label")].into(),
            vec![xs.into_array(), labels.into_array()],
            Bitmap::new_valid(rows),
        )
        .unwrap();
        ListArray::from_lengths(lengths.iter().map(|&len| Some(len)), elements.into_array())
            .unwrap()
            .into_array()
    }

    #[test]
    fn list_of_struct_tags() {
        let dtype = DType::list(point());
        assert_eq!(
            tags_of(&dtype).unwrap(),
            vec![18, 19, 2, i32::from(CTypeEnum::Int32), 10]
        );
        assert_eq!(
            field_names_of(&dtype).unwrap(),
            vec![FieldName::from("x"), FieldName::from("label")]
        );
    }

    #[test]
    fn shapes_depend_only_on_type() {
        let dtype = DType::list(point());
        let short = points(&[1]);
        let long = points(&[3, 0, 2]);

        let (a, b) = (
            lengths_of(&dtype, &short).unwrap(),
            lengths_of(&dtype, &long).unwrap(),
        );
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), num_lengths(&dtype).unwrap());
        assert_eq!(b, vec![3, 5, -1, 5, 5]);

        let buffers = buffers_of(&dtype, &long).unwrap();
        assert_eq!(buffers.len(), num_buffers(&dtype).unwrap());
        assert_eq!(buffers_of(&dtype, &short).unwrap().len(), buffers.len());
    }

    #[rstest]
    #[case(DType::list(DType::Primitive(PType::F64)), vec![18, 6], 2, 4)]
    #[case(DType::list(DType::Decimal(DecimalDType::try_new(10, 2).unwrap())), vec![18, 12, 10, 2], 2, 4)]
    #[case(DType::map(DType::Utf8, DType::Primitive(PType::I64)), vec![18, 19, 2, 10, 4], 5, 8)]
    #[case(DType::tuple(vec![DType::Binary]), vec![19, 1, 20], 3, 4)]
    fn tags_and_counts(
        #[case] dtype: DType,
        #[case] tags: Vec<i32>,
        #[case] lengths: usize,
        #[case] buffers: usize,
    ) {
        assert_eq!(tags_of(&dtype).unwrap(), tags);
        assert_eq!(num_lengths(&dtype).unwrap(), lengths);
        assert_eq!(num_buffers(&dtype).unwrap(), buffers);
    }

    #[test]
    fn placeholder_name_without_structs() {
        let dtype = DType::list(DType::Utf8);
        assert_eq!(
            field_names_of(&dtype).unwrap(),
            vec![FieldName::from(PLACEHOLDER_FIELD_NAME)]
        );
    }

    #[test]
    fn map_entry_names() {
        let dtype = DType::map(DType::Utf8, DType::Primitive(PType::I64));
        assert_eq!(
            field_names_of(&dtype).unwrap(),
            vec![FieldName::from("key"), FieldName::from("value")]
        );
    }

    #[rstest]
    #[case(DType::list(DType::Interval(PType::I64)))]
    #[case(DType::list(DType::dictionary(DType::nullable(PType::I32), DType::Utf8)))]
    #[case(DType::Primitive(PType::I64))]
    fn rejects_unnestable(#[case] dtype: DType) {
        assert!(matches!(
            tags_of(&dtype),
            Err(tether_error::TetherError::UnsupportedType(..))
        ));
    }

    #[test]
    fn value_must_match_type() {
        let dtype = DType::list(DType::Primitive(PType::I64));
        let wrong = ListArray::from_lengths(
            [Some(1)],
            PrimitiveArray::from(vec![1.0f64]).into_array(),
        )
        .unwrap()
        .into_array();
        assert!(matches!(
            lengths_of(&dtype, &wrong),
            Err(tether_error::TetherError::MismatchedTypes(..))
        ));
    }
}
