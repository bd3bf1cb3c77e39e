use std::fmt::{Debug, Formatter};

/// Debug-prints at most the first few elements of a slice.
pub(crate) struct TruncatedDebug<'a, T>(pub(crate) &'a [T]);

impl<T: Debug> Debug for TruncatedDebug<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        const TRUNC_SIZE: usize = 16;
        if self.0.len() <= TRUNC_SIZE {
            write!(f, "{:?}", self.0)
        } else {
            f.debug_list()
                .entries(self.0.iter().take(TRUNC_SIZE))
                .finish_non_exhaustive()
        }
    }
}
