use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A reference-counted owner of one or more memory regions.
///
/// An `Arc<Allocation>` is the ownership token handed across the native call boundary. Every
/// buffer view holds one strong reference, every native handle that borrows the memory holds
/// another, and the memory is released when the last reference drops.
pub struct Allocation {
    owner: Box<dyn Any + Send + Sync>,
}

/// Shared ownership of an [`Allocation`].
pub type MemInfo = Arc<Allocation>;

impl Allocation {
    /// Wrap any owner of memory, e.g. a `Vec<T>` or a tree of other buffers, into a new token.
    pub fn new<A: Any + Send + Sync>(owner: A) -> MemInfo {
        Arc::new(Self {
            owner: Box::new(owner),
        })
    }

    /// Convert a token into a raw pointer suitable for passing across the native boundary.
    ///
    /// The strong reference is leaked into the pointer and must be reclaimed exactly once with
    /// [`Allocation::from_raw`].
    pub fn into_raw(this: MemInfo) -> *const Allocation {
        Arc::into_raw(this)
    }

    /// Reclaim a strong reference previously leaked with [`Allocation::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Allocation::into_raw`] and must not be reclaimed twice.
    pub unsafe fn from_raw(ptr: *const Allocation) -> MemInfo {
        unsafe { Arc::from_raw(ptr) }
    }

    /// Whether the allocation owns a value of type `A`.
    pub fn is<A: Any>(&self) -> bool {
        self.owner.is::<A>()
    }
}

impl Debug for Allocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("owner", &(self as *const Self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_preserves_count() {
        let token = Allocation::new(vec![1u8, 2, 3]);
        let raw = Allocation::into_raw(Arc::clone(&token));
        assert_eq!(Arc::strong_count(&token), 2);

        let back = unsafe { Allocation::from_raw(raw) };
        assert!(back.is::<Vec<u8>>());
        drop(back);
        assert_eq!(Arc::strong_count(&token), 1);
    }
}
