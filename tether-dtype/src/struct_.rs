use std::sync::Arc;

use itertools::Itertools;
use tether_error::{TetherResult, tether_bail};

use crate::DType;

/// A name for a field in a struct
pub type FieldName = Arc<str>;
/// An ordered list of field names in a struct
pub type FieldNames = Arc<[FieldName]>;

/// An ordered list of named fields, shared by structs, tuples and map entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructFields {
    names: FieldNames,
    dtypes: Arc<[DType]>,
}

impl StructFields {
    /// Create a new [`StructFields`] from a list of names and dtypes.
    pub fn try_new(names: FieldNames, dtypes: Vec<DType>) -> TetherResult<Self> {
        if names.len() != dtypes.len() {
            tether_bail!(
                "length mismatch between names ({}) and dtypes ({})",
                names.len(),
                dtypes.len()
            );
        }
        Ok(Self {
            names,
            dtypes: dtypes.into(),
        })
    }

    pub(crate) fn from_parts(names: FieldNames, dtypes: Arc<[DType]>) -> Self {
        Self { names, dtypes }
    }

    /// Fields named by their position, `"0"`, `"1"` and so on.
    pub fn positional(dtypes: Vec<DType>) -> Self {
        let names = (0..dtypes.len())
            .map(|i| FieldName::from(i.to_string()))
            .collect_vec()
            .into();
        Self {
            names,
            dtypes: dtypes.into(),
        }
    }

    /// The field names.
    pub fn names(&self) -> &FieldNames {
        &self.names
    }

    /// The field types, in field order.
    pub fn dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    /// Number of fields.
    pub fn nfields(&self) -> usize {
        self.names.len()
    }

    /// Pairs of field name and type, in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &DType)> + '_ {
        self.names.iter().zip(self.dtypes.iter())
    }
}
