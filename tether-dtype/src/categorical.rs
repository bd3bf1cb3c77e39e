use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::PType;

/// Category labels shared by every array of one categorical type.
pub type Categories = Arc<[Arc<str>]>;

/// The type of a categorical array: integer codes indexing a fixed list of labels.
///
/// The labels live only on the managed side. The native engine sees the codes and the number of
/// categories, and decoding reattaches the labels from this descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoricalDType {
    categories: Categories,
    ordered: bool,
}

impl CategoricalDType {
    /// Create a categorical type over `categories`.
    pub fn new(categories: Categories, ordered: bool) -> Self {
        Self {
            categories,
            ordered,
        }
    }

    /// The category labels.
    pub fn categories(&self) -> &Categories {
        &self.categories
    }

    /// Whether the categories carry an order.
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// Number of categories.
    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    /// The integer kind used for codes.
    pub fn codes_ptype(&self) -> PType {
        PType::code_type_for(self.categories.len())
    }

    /// Whether `other` shares the same label storage, not merely equal labels.
    pub fn shares_categories(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.categories, &other.categories)
    }
}

impl Display for CategoricalDType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "category({} labels{})",
            self.categories.len(),
            if self.ordered { ", ordered" } else { "" }
        )
    }
}
