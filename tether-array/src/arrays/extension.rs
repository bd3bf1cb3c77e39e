use std::sync::Arc;

use tether_dtype::{DType, ExtDType};
use tether_error::{TetherResult, tether_bail};

use crate::Array;

/// Values of a user-defined type, carried by a storage array.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionArray {
    ext_dtype: ExtDType,
    storage: Arc<Array>,
}

impl ExtensionArray {
    /// Wrap storage whose type matches the extension's storage type.
    pub fn try_new(ext_dtype: ExtDType, storage: Array) -> TetherResult<Self> {
        if ext_dtype.storage_dtype() != &storage.dtype() {
            tether_bail!(MismatchedTypes: ext_dtype.storage_dtype(), storage.dtype());
        }
        Ok(Self {
            ext_dtype,
            storage: Arc::new(storage),
        })
    }

    /// The storage values.
    pub fn storage(&self) -> &Array {
        &self.storage
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::Extension(self.ext_dtype.clone())
    }
}
