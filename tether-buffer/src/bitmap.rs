use std::fmt::{Debug, Formatter};

use itertools::Itertools;
use tether_error::{TetherResult, tether_bail};

use crate::ByteBuffer;

/// An LSB-first validity bitmap: bit `i` set means row `i` is valid.
#[derive(Clone)]
pub struct Bitmap {
    buffer: ByteBuffer,
    len: usize,
}

impl Bitmap {
    /// Wrap an existing bit-packed buffer covering `len` rows.
    pub fn try_new(buffer: ByteBuffer, len: usize) -> TetherResult<Self> {
        if buffer.len() < Self::byte_len(len) {
            tether_bail!(
                "validity bitmap of {} bytes cannot cover {} rows",
                buffer.len(),
                len
            );
        }
        Ok(Self { buffer, len })
    }

    /// A bitmap with every row valid.
    pub fn new_valid(len: usize) -> Self {
        Self {
            buffer: ByteBuffer::full(u8::MAX, Self::byte_len(len)),
            len,
        }
    }

    /// Number of bytes needed to hold `len` bits.
    #[inline]
    pub const fn byte_len(len: usize) -> usize {
        len.div_ceil(8)
    }

    /// Number of rows covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the bitmap covers no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether row `index` is valid.
    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.buffer[index / 8] & (1 << (index % 8)) != 0
    }

    /// Number of null rows.
    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&i| !self.is_valid(i)).count()
    }

    /// Iterate the validity of every row.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.is_valid(i))
    }

    /// The bit-packed bytes.
    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    /// Consume the bitmap, returning the bit-packed bytes.
    pub fn into_buffer(self) -> ByteBuffer {
        self.buffer
    }
}

impl FromIterator<bool> for Bitmap {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bytes = Vec::new();
        let mut len = 0;
        for chunk in &iter.into_iter().chunks(8) {
            let mut byte = 0u8;
            for (bit, valid) in chunk.enumerate() {
                if valid {
                    byte |= 1 << bit;
                }
                len += 1;
            }
            bytes.push(byte);
        }
        Self {
            buffer: ByteBuffer::from_vec(bytes),
            len,
        }
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Debug for Bitmap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("nulls", &self.null_count())
            .finish()
    }
}
