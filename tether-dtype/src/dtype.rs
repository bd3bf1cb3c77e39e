use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use DType::*;

use crate::{CategoricalDType, DecimalDType, FieldName, PType, StructFields};

/// The logical type of an array crossing the native boundary.
///
/// A `DType` is constructed once per logical column type and shared by the encoder and the
/// decoder of a call. Its shape alone determines how many tags, lengths and buffers a nested
/// value flattens into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    /// Fixed-width values with no validity bitmap.
    Primitive(PType),
    /// Fixed-width values with a validity bitmap. The inner type must be [`DType::Primitive`].
    Nullable(Arc<DType>),
    /// UTF-8 strings.
    Utf8,
    /// Binary data.
    Binary,
    /// A variable-length list of the element type.
    List(Arc<DType>),
    /// Named fields.
    Struct(StructFields),
    /// Positional fields, marshaled exactly as a struct.
    Tuple(StructFields),
    /// Key-value pairs, marshaled as a list of `{key, value}` structs.
    Map(MapDType),
    /// Integer indices (first) into a shared values array (second).
    Dictionary(Arc<DType>, Arc<DType>),
    /// Integer codes into a fixed list of labels.
    Categorical(CategoricalDType),
    /// 128-bit decimals.
    Decimal(DecimalDType),
    /// Closed intervals, a left and a right array of the same kind.
    Interval(PType),
    /// Datetimes localized to a time zone, marshaled as plain datetimes.
    DatetimeTz(Arc<str>),
    /// A user-defined type that has no marshaling support.
    Extension(ExtDType),
}

impl DType {
    /// Nullable wrapper around a fixed-width kind.
    pub fn nullable(ptype: PType) -> Self {
        Nullable(Arc::new(Primitive(ptype)))
    }

    /// A list of `element`.
    pub fn list(element: DType) -> Self {
        List(Arc::new(element))
    }

    /// A tuple with positional field names.
    pub fn tuple(dtypes: Vec<DType>) -> Self {
        Tuple(StructFields::positional(dtypes))
    }

    /// A map from `key` to `value`.
    pub fn map(key: DType, value: DType) -> Self {
        Map(MapDType::new(key, value))
    }

    /// A dictionary of `indices` into `values`.
    pub fn dictionary(indices: DType, values: DType) -> Self {
        Dictionary(Arc::new(indices), Arc::new(values))
    }

    /// Whether values of this type flatten through the nested constructor.
    pub fn is_nested(&self) -> bool {
        matches!(self, List(_) | Struct(_) | Tuple(_) | Map(_))
    }

    /// Get the element type if `self` is a list.
    pub fn as_list_element(&self) -> Option<&DType> {
        match self {
            List(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Get the fields if `self` is a struct or a tuple.
    pub fn as_struct(&self) -> Option<&StructFields> {
        match self {
            Struct(f) | Tuple(f) => Some(f),
            _ => None,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Primitive(pt) => write!(f, "{}", pt),
            Nullable(inner) => write!(f, "{}?", inner),
            Utf8 => write!(f, "utf8"),
            Binary => write!(f, "binary"),
            List(e) => write!(f, "list({})", e),
            Struct(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(n, dt)| format!("{}={}", n, dt)).join(", ")
            ),
            Tuple(fields) => write!(f, "({})", fields.dtypes().iter().join(", ")),
            Map(m) => write!(f, "map({}, {})", m.key(), m.value()),
            Dictionary(indices, values) => write!(f, "dict({}, {})", indices, values),
            Categorical(c) => write!(f, "{}", c),
            Decimal(d) => write!(f, "{}", d),
            Interval(pt) => write!(f, "interval({})", pt),
            DatetimeTz(tz) => write!(f, "datetime[{}]", tz),
            Extension(ext) => write!(f, "ext({}, {})", ext.id(), ext.storage_dtype()),
        }
    }
}

/// The type of a map: a list of `{key, value}` entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapDType {
    entries: StructFields,
}

impl MapDType {
    /// Create a map type from its key and value types.
    pub fn new(key: DType, value: DType) -> Self {
        let names = [FieldName::from("key"), FieldName::from("value")].into();
        let dtypes: Arc<[DType]> = [key, value].into();
        Self {
            entries: StructFields::from_parts(names, dtypes),
        }
    }

    /// The struct type of one entry.
    pub fn entries(&self) -> &StructFields {
        &self.entries
    }

    /// The key type.
    pub fn key(&self) -> &DType {
        &self.entries.dtypes()[0]
    }

    /// The value type.
    pub fn value(&self) -> &DType {
        &self.entries.dtypes()[1]
    }
}

/// A user-defined type identified by name, stored as another type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtDType {
    id: Arc<str>,
    storage_dtype: Arc<DType>,
}

impl ExtDType {
    /// Create an extension type.
    pub fn new(id: Arc<str>, storage_dtype: Arc<DType>) -> Self {
        Self { id, storage_dtype }
    }

    /// The identifier of the extension.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The type of the underlying storage.
    pub fn storage_dtype(&self) -> &DType {
        &self.storage_dtype
    }
}
