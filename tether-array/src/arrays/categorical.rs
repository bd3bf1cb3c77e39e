use tether_dtype::{CategoricalDType, DType, match_each_native_ptype};
use tether_error::{TetherResult, tether_bail};

use crate::arrays::PrimitiveArray;

/// Integer codes into the labels of a [`CategoricalDType`], `-1` marking nulls.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoricalArray {
    codes: PrimitiveArray,
    categorical_dtype: CategoricalDType,
}

impl CategoricalArray {
    /// Pair codes with their categories, checking the code width and range.
    pub fn try_new(codes: PrimitiveArray, categorical_dtype: CategoricalDType) -> TetherResult<Self> {
        let expected = categorical_dtype.codes_ptype();
        if codes.ptype() != expected {
            tether_bail!(MismatchedTypes: expected, codes.ptype());
        }
        let count = categorical_dtype.num_categories() as i64;
        let in_range = match_each_native_ptype!(codes.ptype(), |$T| {
            codes.buffer::<$T>().iter().all(|&c| (-1..count).contains(&(c as i64)))
        });
        if !in_range {
            tether_bail!("categorical codes must lie in -1..{}", count);
        }
        Ok(Self {
            codes,
            categorical_dtype,
        })
    }

    /// Encode labels against the categories, unknown labels and `None` becoming null.
    pub fn from_labels<'a>(
        labels: impl IntoIterator<Item = Option<&'a str>>,
        categorical_dtype: CategoricalDType,
    ) -> TetherResult<Self> {
        let codes: Vec<i64> = labels
            .into_iter()
            .map(|label| {
                label
                    .and_then(|l| {
                        categorical_dtype
                            .categories()
                            .iter()
                            .position(|c| c.as_ref() == l)
                    })
                    .map_or(-1, |p| p as i64)
            })
            .collect();
        let codes = match_each_native_ptype!(categorical_dtype.codes_ptype(), |$T| {
            PrimitiveArray::from(codes.iter().map(|&c| c as $T).collect::<Vec<$T>>())
        });
        Self::try_new(codes, categorical_dtype)
    }

    /// The codes.
    pub fn codes(&self) -> &PrimitiveArray {
        &self.codes
    }

    /// The category descriptor.
    pub fn categorical_dtype(&self) -> &CategoricalDType {
        &self.categorical_dtype
    }

    /// The label at `index`, or `None` if it is null.
    pub fn label_at(&self, index: usize) -> Option<&str> {
        let code = match_each_native_ptype!(self.codes.ptype(), |$T| {
            self.codes.buffer::<$T>()[index] as i64
        });
        usize::try_from(code)
            .ok()
            .and_then(|c| self.categorical_dtype.categories().get(c))
            .map(|c| c.as_ref())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        DType::Categorical(self.categorical_dtype.clone())
    }
}
