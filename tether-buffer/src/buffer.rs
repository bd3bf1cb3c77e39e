use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use tether_error::tether_panic;

use crate::debug::TruncatedDebug;
use crate::{Allocation, MemInfo};

/// An immutable, zero-copy view of `len` items of `T` kept alive by an ownership token.
///
/// Cloning a buffer clones the token, never the memory. The view may point anywhere inside the
/// owned allocation, which is how native-side memory is adopted without copying.
pub struct Buffer<T> {
    ptr: NonNull<T>,
    len: usize,
    owner: MemInfo,
    _marker: PhantomData<T>,
}

/// A buffer of untyped bytes.
pub type ByteBuffer = Buffer<u8>;

unsafe impl<T: Send + Sync> Send for Buffer<T> {}
unsafe impl<T: Send + Sync> Sync for Buffer<T> {}

impl<T: Copy + Send + Sync + 'static> Buffer<T> {
    /// Take zero-copy ownership of a `Vec<T>`.
    pub fn from_vec(mut values: Vec<T>) -> Self {
        let ptr = NonNull::new(values.as_mut_ptr()).unwrap_or(NonNull::dangling());
        let len = values.len();
        Self {
            ptr,
            len,
            owner: Allocation::new(values),
            _marker: PhantomData,
        }
    }

    /// Returns a new `Buffer<T>` copied from the provided `Vec<T>`, `&[T]`, etc.
    pub fn copy_from(values: impl AsRef<[T]>) -> Self {
        Self::from_vec(values.as_ref().to_vec())
    }

    /// Create a new empty buffer.
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a buffer of `len` copies of `item`.
    pub fn full(item: T, len: usize) -> Self {
        Self::from_vec(vec![item; len])
    }
}

impl<T> Buffer<T> {
    /// Create a view over memory owned by `owner`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` initialized, properly aligned values of `T` that stay valid and
    /// unmodified for as long as `owner` is alive. A null `ptr` is only permitted when `len` is 0.
    pub unsafe fn from_raw_parts(ptr: *const T, len: usize, owner: MemInfo) -> Self {
        let ptr = match NonNull::new(ptr.cast_mut()) {
            Some(ptr) => ptr,
            None if len == 0 => NonNull::dangling(),
            None => tether_panic!("null buffer pointer with length {}", len),
        };
        Self {
            ptr,
            len,
            owner,
            _marker: PhantomData,
        }
    }

    /// Returns the number of items in the buffer.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer is empty.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return a slice over the buffer.
    #[inline(always)]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Raw pointer to the first item, valid while any clone of the owner is alive.
    #[inline(always)]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// A new strong reference to the token that keeps this buffer alive.
    pub fn meminfo(&self) -> MemInfo {
        Arc::clone(&self.owner)
    }

    /// Give up the view, returning the reference it held on its owner.
    pub fn into_meminfo(self) -> MemInfo {
        self.owner
    }

    /// The number of live references to this buffer's owner.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.owner)
    }

    /// Whether `self` and `other` share the same owner.
    pub fn shares_owner(&self, other: &Buffer<impl Sized>) -> bool {
        Arc::ptr_eq(&self.owner, &other.owner)
    }

    /// Reinterpret the buffer as raw bytes without copying.
    pub fn into_byte_buffer(self) -> ByteBuffer {
        ByteBuffer {
            ptr: self.ptr.cast(),
            len: self.len * size_of::<T>(),
            owner: self.owner,
            _marker: PhantomData,
        }
    }

    /// Reinterpret a byte buffer as items of `T` without copying.
    ///
    /// ## Panics
    ///
    /// Panics if the buffer is not aligned to `T`, or the length is not a multiple of the size
    /// of `T`.
    pub fn from_byte_buffer(buffer: ByteBuffer) -> Self {
        let width = size_of::<T>();
        if buffer.len == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len: 0,
                owner: buffer.owner,
                _marker: PhantomData,
            };
        }
        if buffer.len % width != 0 {
            tether_panic!(
                "byte length {} is not a multiple of {}",
                buffer.len,
                width
            );
        }
        if buffer.ptr.as_ptr().align_offset(align_of::<T>()) != 0 {
            tether_panic!("buffer is not aligned to {}", align_of::<T>());
        }
        Self {
            ptr: buffer.ptr.cast(),
            len: buffer.len / width,
            owner: buffer.owner,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len,
            owner: Arc::clone(&self.owner),
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T> AsRef<[T]> for Buffer<T> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: PartialEq> PartialEq for Buffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Debug> Debug for Buffer<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("refs", &Arc::strong_count(&self.owner))
            .field("values", &TruncatedDebug(self.as_slice()))
            .finish()
    }
}

impl<T: Copy + Send + Sync + 'static> FromIterator<T> for Buffer<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: Copy + Send + Sync + 'static> From<Vec<T>> for Buffer<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

#[cfg(test)]
mod test {
    use crate::{Buffer, ByteBuffer, buffer};

    #[test]
    fn zero_copy_from_vec() {
        let values = vec![1i64, 2, 3];
        let ptr = values.as_ptr();
        let buf = Buffer::from_vec(values);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn clones_share_owner() {
        let buf = buffer![0u32, 1, 2];
        assert_eq!(buf.strong_count(), 1);
        let other = buf.clone();
        assert_eq!(buf.strong_count(), 2);
        assert!(buf.shares_owner(&other));
        drop(other);
        assert_eq!(buf.strong_count(), 1);
    }

    #[test]
    fn byte_buffer_round_trip() {
        let buf = buffer![7i32, 8, 9].into_byte_buffer();
        assert_eq!(buf.len(), 12);
        let typed = Buffer::<i32>::from_byte_buffer(buf);
        assert_eq!(typed.as_slice(), &[7, 8, 9]);
    }

    #[test]
    #[should_panic]
    fn byte_buffer_bad_length() {
        Buffer::<i32>::from_byte_buffer(ByteBuffer::copy_from([1u8, 2, 3]));
    }

    #[test]
    fn adopt_raw_parts() {
        let owner = buffer![10u16, 20, 30, 40];
        let view = unsafe { Buffer::from_raw_parts(owner.as_ptr().add(1), 2, owner.meminfo()) };
        assert_eq!(view.as_slice(), &[20, 30]);
        assert_eq!(owner.strong_count(), 2);
    }
}
