use tether_buffer::{Bitmap, Buffer, ByteBuffer};
use tether_dtype::DType;
use tether_error::{TetherResult, tether_bail, tether_err};

/// Variable-length strings or binary values packed into one byte buffer.
///
/// Element `i` spans `bytes[offsets[i]..offsets[i + 1]]`, so there is always one more offset than
/// there are elements.
#[derive(Clone, Debug)]
pub struct VarBinArray {
    offsets: Buffer<u64>,
    bytes: ByteBuffer,
    validity: Bitmap,
    binary: bool,
}

impl VarBinArray {
    /// Validate and assemble the parts of a string or binary array.
    pub fn try_new(
        offsets: Buffer<u64>,
        bytes: ByteBuffer,
        validity: Bitmap,
        binary: bool,
    ) -> TetherResult<Self> {
        let Some(&last) = offsets.last() else {
            tether_bail!("offsets must hold at least one entry");
        };
        if offsets.len() - 1 != validity.len() {
            tether_bail!(
                "{} offsets cannot describe {} rows",
                offsets.len(),
                validity.len()
            );
        }
        if !offsets.is_sorted() {
            tether_bail!("offsets must be non-decreasing");
        }
        if usize::try_from(last).map_or(true, |last| last > bytes.len()) {
            tether_bail!(OutOfBounds: last as usize, 0, bytes.len());
        }
        if !binary {
            for i in 0..validity.len() {
                let range = offsets[i] as usize..offsets[i + 1] as usize;
                std::str::from_utf8(&bytes[range])
                    .map_err(|e| tether_err!("row {} is not valid UTF-8: {}", i, e))?;
            }
        }
        Ok(Self {
            offsets,
            bytes,
            validity,
            binary,
        })
    }

    /// Build a UTF-8 array from optional strings.
    pub fn from_strs<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        Self::from_parts(values.into_iter().map(|v| v.map(str::as_bytes)), false)
    }

    /// Build a binary array from optional byte strings.
    pub fn from_bytes<'a>(values: impl IntoIterator<Item = Option<&'a [u8]>>) -> Self {
        Self::from_parts(values, true)
    }

    fn from_parts<'a>(values: impl IntoIterator<Item = Option<&'a [u8]>>, binary: bool) -> Self {
        let mut offsets = vec![0u64];
        let mut bytes = Vec::new();
        let mut validity = Vec::new();
        for value in values {
            if let Some(v) = value {
                bytes.extend_from_slice(v);
            }
            validity.push(value.is_some());
            offsets.push(bytes.len() as u64);
        }
        Self {
            offsets: Buffer::from_vec(offsets),
            bytes: ByteBuffer::from_vec(bytes),
            validity: validity.into_iter().collect(),
            binary,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    /// Returns true if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the values are raw bytes rather than UTF-8.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// The `len + 1` offsets.
    pub fn offsets(&self) -> &Buffer<u64> {
        &self.offsets
    }

    /// The concatenated element bytes.
    pub fn bytes(&self) -> &ByteBuffer {
        &self.bytes
    }

    /// The last offset, which bounds every element's bytes.
    ///
    /// Offsets need not start at zero, so this can exceed [`Self::num_bytes`].
    pub fn end_offset(&self) -> u64 {
        self.offsets[self.len()]
    }

    /// Total number of bytes referenced by the offsets.
    pub fn num_bytes(&self) -> u64 {
        self.offsets[self.len()] - self.offsets[0]
    }

    /// The validity bitmap.
    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    /// The bytes of element `index`, or `None` if it is null.
    pub fn bytes_at(&self, index: usize) -> Option<&[u8]> {
        self.validity.is_valid(index).then(|| {
            &self.bytes[self.offsets[index] as usize..self.offsets[index + 1] as usize]
        })
    }

    /// The string at `index`, or `None` if it is null or not UTF-8.
    pub fn str_at(&self, index: usize) -> Option<&str> {
        self.bytes_at(index)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// The logical type.
    pub fn dtype(&self) -> DType {
        if self.binary {
            DType::Binary
        } else {
            DType::Utf8
        }
    }
}

impl PartialEq for VarBinArray {
    fn eq(&self, other: &Self) -> bool {
        self.binary == other.binary
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.bytes_at(i) == other.bytes_at(i))
    }
}
