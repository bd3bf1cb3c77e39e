use std::sync::Arc;

use tether_dtype::{DType, PType};
use tether_error::{TetherResult, tether_bail};

use crate::arrays::PrimitiveArray;

/// Nanosecond datetimes localized to a time zone.
#[derive(Clone, Debug, PartialEq)]
pub struct DatetimeTzArray {
    values: PrimitiveArray,
    tz: Arc<str>,
}

impl DatetimeTzArray {
    /// Attach a time zone to datetime values.
    pub fn try_new(values: PrimitiveArray, tz: Arc<str>) -> TetherResult<Self> {
        if values.ptype() != PType::Datetime {
            tether_bail!(MismatchedTypes: PType::Datetime, values.ptype());
        }
        Ok(Self { values, tz })
    }

    /// The UTC datetime values.
    pub fn values(&self) -> &PrimitiveArray {
        &self.values
    }

    /// The time zone name.
    pub fn tz(&self) -> &Arc<str> {
        &self.tz
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::DatetimeTz(self.tz.clone())
    }
}
