use hashbrown::HashSet;
use regex::bytes::RegexBuilder;
use rustc_hash::FxBuildHasher;
use tether_buffer::{Bitmap, Buffer};
use tether_dtype::PType;
use tether_error::{TetherResult, tether_bail, tether_err};

use crate::reference::array::NativeArray;
use crate::reference::datum::column_datums;

/// Whether each row of `input` occurs in `values`. A null row is never found.
pub(crate) fn isin(input: &NativeArray, values: &NativeArray) -> NativeArray {
    let wanted = column_datums(values)
        .into_iter()
        .filter(|d| !d.is_null())
        .collect::<HashSet<_, FxBuildHasher>>();
    let found = column_datums(input)
        .iter()
        .map(|d| u8::from(!d.is_null() && wanted.contains(d)))
        .collect::<Buffer<u8>>();
    NativeArray::Numpy {
        ptype: PType::Bool,
        data: found.into_byte_buffer(),
    }
}

/// Whether each string row of `input` contains a match for `pattern`. Null rows stay null.
pub(crate) fn search_regex(
    input: &NativeArray,
    pattern: &str,
    case_sensitive: bool,
) -> TetherResult<NativeArray> {
    if !matches!(input, NativeArray::String { .. } | NativeArray::Dict { .. }) {
        tether_bail!("regex search needs a string array, found {}", input.ctype());
    }
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|err| tether_err!(InvalidArgument: "invalid pattern {:?}: {}", pattern, err))?;
    let found = (0..input.len())
        .map(|row| input.bytes_at(row).map(|bytes| regex.is_match(bytes)))
        .collect::<Vec<_>>();
    Ok(NativeArray::Nullable {
        ptype: PType::Bool,
        data: found
            .iter()
            .map(|m| u8::from(m.unwrap_or(false)))
            .collect::<Buffer<u8>>()
            .into_byte_buffer(),
        validity: found.iter().map(Option::is_some).collect::<Bitmap>(),
    })
}
