use std::ffi::{CStr, c_char};

use tether_buffer::{Bitmap, Buffer, MemInfo};
use tether_dtype::CTypeEnum;
use tether_error::{TetherResult, tether_bail, tether_err};

use crate::reference::array::{NativeArray, borrow, borrow_fixed, borrow_validity, leaf_ptype};

/// Sequential reader over a list whose length is implied by the tags.
struct Cursor<T> {
    ptr: *const T,
    pos: usize,
}

impl<T: Copy> Cursor<T> {
    fn new(ptr: *const T) -> Self {
        Self { ptr, pos: 0 }
    }

    /// # Safety
    ///
    /// The list must hold at least `pos + 1` entries.
    unsafe fn next(&mut self) -> T {
        let value = unsafe { *self.ptr.add(self.pos) };
        self.pos += 1;
        value
    }
}

/// Reads the flattened description of a nested array.
pub(crate) struct NestedReader {
    types: Cursor<i32>,
    lengths: Cursor<i64>,
    buffers: Cursor<*const u8>,
    names: Cursor<*const c_char>,
    token: MemInfo,
}

impl NestedReader {
    pub fn new(
        types: *const i32,
        buffers: *const *const u8,
        lengths: *const i64,
        field_names: *const *const c_char,
        token: MemInfo,
    ) -> Self {
        Self {
            types: Cursor::new(types),
            lengths: Cursor::new(lengths),
            buffers: Cursor::new(buffers),
            names: Cursor::new(field_names),
            token,
        }
    }

    unsafe fn length(&mut self) -> TetherResult<usize> {
        let length = unsafe { self.lengths.next() };
        usize::try_from(length).map_err(|_| tether_err!("negative length {}", length))
    }

    unsafe fn buffer<T>(&mut self, len: usize) -> TetherResult<Buffer<T>> {
        let ptr = unsafe { self.buffers.next() };
        unsafe { borrow(ptr.cast::<T>(), len, &self.token) }
    }

    unsafe fn validity(&mut self, len: usize) -> TetherResult<Bitmap> {
        let ptr = unsafe { self.buffers.next() };
        unsafe { borrow_validity(ptr, len, &self.token) }
    }

    /// Read the next node and all of its children.
    ///
    /// # Safety
    ///
    /// The lists must be laid out as the tags describe and every pointer must be valid for the
    /// lengths it is read with.
    pub unsafe fn read(&mut self) -> TetherResult<NativeArray> {
        let tag = unsafe { self.types.next() };
        let Ok(ctype) = CTypeEnum::try_from(tag) else {
            tether_bail!("unknown type tag {}", tag);
        };
        Ok(match ctype {
            CTypeEnum::List => {
                let len = unsafe { self.length()? };
                let offsets = unsafe { self.buffer::<u64>(len + 1)? };
                let validity = unsafe { self.validity(len)? };
                let child = unsafe { self.read()? };
                if offsets.last().is_some_and(|&end| end as usize > child.len()) {
                    tether_bail!("list offsets run past {} elements", child.len());
                }
                NativeArray::List {
                    offsets,
                    validity,
                    child: Box::new(child),
                }
            }
            CTypeEnum::Struct => {
                let nfields = unsafe { self.types.next() };
                let len = unsafe { self.length()? };
                let sentinel = unsafe { self.lengths.next() };
                if sentinel != -1 {
                    tether_bail!("struct length must be followed by -1, found {}", sentinel);
                }
                let validity = unsafe { self.validity(len)? };
                // Names of one struct precede the names of any struct nested in its fields.
                let mut names = Vec::new();
                for _ in 0..nfields {
                    let name = unsafe { self.names.next() };
                    names.push(if name.is_null() {
                        String::new()
                    } else {
                        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
                    });
                }
                let mut fields = Vec::new();
                for _ in 0..nfields {
                    let field = unsafe { self.read()? };
                    if field.len() != len {
                        tether_bail!("struct field has {} rows, expected {}", field.len(), len);
                    }
                    fields.push(field);
                }
                NativeArray::Struct {
                    names,
                    validity,
                    fields,
                }
            }
            CTypeEnum::String | CTypeEnum::Binary => {
                let len = unsafe { self.length()? };
                let offsets = unsafe { self.buffer::<u64>(len + 1)? };
                let validity = unsafe { self.validity(len)? };
                let n_chars = offsets.last().copied().unwrap_or(0) as usize;
                let chars = unsafe { self.buffer::<u8>(n_chars)? };
                NativeArray::String {
                    binary: ctype == CTypeEnum::Binary,
                    offsets,
                    chars,
                    validity,
                }
            }
            CTypeEnum::Decimal => {
                let precision = unsafe { self.types.next() };
                let scale = unsafe { self.types.next() };
                let len = unsafe { self.length()? };
                let validity = unsafe { self.validity(len)? };
                let data = unsafe { self.buffer::<i128>(len)? };
                NativeArray::Decimal {
                    precision,
                    scale,
                    data,
                    validity,
                }
            }
            _ => {
                let ptype = leaf_ptype(tag)?;
                let len = unsafe { self.length()? };
                let bitmap = unsafe { self.buffers.next() };
                let ptr = unsafe { self.buffers.next() };
                let data = unsafe { borrow_fixed(ptr, len, ptype, &self.token)? };
                if bitmap.is_null() {
                    NativeArray::Numpy { ptype, data }
                } else {
                    NativeArray::Nullable {
                        ptype,
                        data,
                        validity: unsafe { borrow_validity(bitmap, len, &self.token)? },
                    }
                }
            }
        })
    }
}

/// A nested array flattened into tags, lengths and buffer pointers.
#[derive(Debug, Default)]
pub(crate) struct Flattened {
    pub types: Vec<i32>,
    pub lengths: Vec<i64>,
    pub buffers: Vec<*const u8>,
}

impl Flattened {
    pub fn of(array: &NativeArray) -> TetherResult<Self> {
        let mut flat = Self::default();
        flat.push(array)?;
        Ok(flat)
    }

    fn push(&mut self, array: &NativeArray) -> TetherResult<()> {
        self.types.push(array.ctype().into());
        match array {
            NativeArray::List {
                offsets,
                validity,
                child,
            } => {
                self.lengths.push(validity.len() as i64);
                self.buffers.push(offsets.as_ptr().cast());
                self.buffers.push(validity.buffer().as_ptr());
                self.push(child)?;
            }
            NativeArray::Struct {
                validity, fields, ..
            } => {
                self.types.push(fields.len() as i32);
                self.lengths.push(validity.len() as i64);
                self.lengths.push(-1);
                self.buffers.push(validity.buffer().as_ptr());
                for field in fields {
                    self.push(field)?;
                }
            }
            NativeArray::String {
                offsets,
                chars,
                validity,
                ..
            } => {
                self.lengths.push(validity.len() as i64);
                self.buffers.push(offsets.as_ptr().cast());
                self.buffers.push(validity.buffer().as_ptr());
                self.buffers.push(chars.as_ptr());
            }
            NativeArray::Decimal {
                precision,
                scale,
                data,
                validity,
            } => {
                self.types.push(*precision);
                self.types.push(*scale);
                self.lengths.push(validity.len() as i64);
                self.buffers.push(validity.buffer().as_ptr());
                self.buffers.push(data.as_ptr().cast());
            }
            NativeArray::Numpy { data, .. } => {
                self.lengths.push(array.len() as i64);
                self.buffers.push(std::ptr::null());
                self.buffers.push(data.as_ptr());
            }
            NativeArray::Nullable { data, validity, .. } => {
                self.lengths.push(validity.len() as i64);
                self.buffers.push(validity.buffer().as_ptr());
                self.buffers.push(data.as_ptr());
            }
            NativeArray::Categorical { .. }
            | NativeArray::Interval { .. }
            | NativeArray::Dict { .. } => {
                tether_bail!("{} arrays cannot be nested", array.ctype())
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use tether_buffer::{Allocation, ByteBuffer};

    use super::*;
    use crate::reference::datum::{Datum, column_datums};

    #[test]
    fn list_of_struct_round_trip() {
        // list<{a: i32, b: utf8?}> with rows [[{1, "x"}], null, [{2, null}, {3, "yz"}]]
        let ints = Buffer::from_vec(vec![1i32, 2, 3]);
        let str_offsets = Buffer::from_vec(vec![0u64, 1, 1, 3]);
        let chars = ByteBuffer::copy_from(b"xyz");
        let str_valid = Bitmap::from_iter([true, false, true]);
        let struct_valid = Bitmap::new_valid(3);
        let list_offsets = Buffer::from_vec(vec![0u64, 1, 1, 3]);
        let list_valid = Bitmap::from_iter([true, false, true]);

        let types = [
            i32::from(CTypeEnum::List),
            i32::from(CTypeEnum::Struct),
            2,
            i32::from(CTypeEnum::Int32),
            i32::from(CTypeEnum::String),
        ];
        let lengths = [3i64, 3, -1, 3, 3];
        let buffers = [
            list_offsets.as_ptr().cast::<u8>(),
            list_valid.buffer().as_ptr(),
            struct_valid.buffer().as_ptr(),
            std::ptr::null(),
            ints.as_ptr().cast(),
            str_offsets.as_ptr().cast(),
            str_valid.buffer().as_ptr(),
            chars.as_ptr(),
        ];
        let names = [CString::new("a").unwrap(), CString::new("b").unwrap()];
        let name_ptrs = names.iter().map(|n| n.as_ptr()).collect::<Vec<_>>();
        let token = Allocation::new(());

        let array = unsafe {
            NestedReader::new(
                types.as_ptr(),
                buffers.as_ptr(),
                lengths.as_ptr(),
                name_ptrs.as_ptr(),
                token,
            )
            .read()
        }
        .unwrap();

        let datums = column_datums(&array);
        assert_eq!(datums[1], Datum::Null);
        assert_eq!(
            datums[2],
            Datum::List(vec![
                Datum::Struct(vec![Datum::Int(2), Datum::Null]),
                Datum::Struct(vec![Datum::Int(3), Datum::Bytes(b"yz")]),
            ])
        );

        let flat = Flattened::of(&array).unwrap();
        assert_eq!(flat.types, types);
        assert_eq!(flat.lengths, lengths);
        assert_eq!(flat.buffers.len(), buffers.len());
        assert!(flat.buffers[3].is_null());
    }
}
