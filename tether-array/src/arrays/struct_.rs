use itertools::Itertools;
use tether_buffer::Bitmap;
use tether_dtype::{DType, FieldName, FieldNames, StructFields};
use tether_error::{TetherExpect, TetherResult, tether_bail};

use crate::Array;

/// Named child arrays of equal length sharing one validity bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct StructArray {
    names: FieldNames,
    fields: Vec<Array>,
    validity: Bitmap,
}

impl StructArray {
    /// Assemble a struct array, checking every field has one value per row.
    pub fn try_new(names: FieldNames, fields: Vec<Array>, validity: Bitmap) -> TetherResult<Self> {
        if names.len() != fields.len() {
            tether_bail!("Got {} names and {} fields", names.len(), fields.len());
        }
        let length = validity.len();
        for field in fields.iter() {
            if field.len() != length {
                tether_bail!(
                    "Expected all struct fields to have length {length}, found {}",
                    field.len()
                );
            }
        }
        Ok(Self {
            names,
            fields,
            validity,
        })
    }

    /// A struct with every row valid.
    pub fn from_fields<N: AsRef<str>>(items: Vec<(N, Array)>, len: usize) -> TetherResult<Self> {
        let (names, fields): (Vec<FieldName>, Vec<Array>) = items
            .into_iter()
            .map(|(name, array)| (FieldName::from(name.as_ref()), array))
            .unzip();
        Self::try_new(names.into(), fields, Bitmap::new_valid(len))
    }

    /// Fields named by position, as used for tuples.
    pub fn positional(fields: Vec<Array>, validity: Bitmap) -> TetherResult<Self> {
        let names = (0..fields.len())
            .map(|i| FieldName::from(i.to_string()))
            .collect_vec();
        Self::try_new(names.into(), fields, validity)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    /// Returns true if the array has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The field names.
    pub fn names(&self) -> &FieldNames {
        &self.names
    }

    /// The child arrays.
    pub fn fields(&self) -> &[Array] {
        &self.fields
    }

    /// The validity bitmap.
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// The struct type of this array.
    pub fn dtype(&self) -> DType {
        DType::Struct(self.struct_fields())
    }

    /// The field types paired with their names.
    pub fn struct_fields(&self) -> StructFields {
        StructFields::try_new(
            self.names.clone(),
            self.fields.iter().map(Array::dtype).collect(),
        )
        .tether_expect("field count checked on construction")
    }
}
