use tether_buffer::{Bitmap, Buffer};
use tether_dtype::{DType, DecimalDType};
use tether_error::{TetherResult, tether_bail};

/// 128-bit decimals with a validity bitmap.
#[derive(Clone, Debug)]
pub struct DecimalArray {
    decimal_dtype: DecimalDType,
    values: Buffer<i128>,
    validity: Bitmap,
}

impl DecimalArray {
    /// Pair scaled integer values with their decimal type and validity.
    pub fn try_new(
        decimal_dtype: DecimalDType,
        values: Buffer<i128>,
        validity: Bitmap,
    ) -> TetherResult<Self> {
        if values.len() != validity.len() {
            tether_bail!(
                "values length {} does not match validity length {}",
                values.len(),
                validity.len()
            );
        }
        Ok(Self {
            decimal_dtype,
            values,
            validity,
        })
    }

    /// Build from optional scaled integers.
    pub fn from_option_iter(
        decimal_dtype: DecimalDType,
        iter: impl IntoIterator<Item = Option<i128>>,
    ) -> Self {
        let (values, validity): (Vec<i128>, Vec<bool>) = iter
            .into_iter()
            .map(|v| (v.unwrap_or_default(), v.is_some()))
            .unzip();
        Self {
            decimal_dtype,
            values: Buffer::from_vec(values),
            validity: validity.into_iter().collect(),
        }
    }

    /// Precision and scale.
    pub fn decimal_dtype(&self) -> DecimalDType {
        self.decimal_dtype
    }

    /// The scaled integer values.
    pub fn values(&self) -> &Buffer<i128> {
        &self.values
    }

    /// The validity bitmap.
    pub fn validity(&self) -> &Bitmap {
        &self.validity
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
        DType::Decimal(self.decimal_dtype)
    }
}

impl PartialEq for DecimalArray {
    fn eq(&self, other: &Self) -> bool {
        self.decimal_dtype == other.decimal_dtype
            && self.validity == other.validity
            && (0..self.len())
                .all(|i| !self.validity.is_valid(i) || self.values[i] == other.values[i])
    }
}
