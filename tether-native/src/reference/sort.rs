use std::cmp::Ordering;

use hashbrown::HashMap;
use itertools::Itertools;
use rustc_hash::FxBuildHasher;
use tether_error::{TetherResult, tether_bail};

use crate::abi::Keep;
use crate::reference::array::NativeArray;
use crate::reference::datum::{Datum, row_keys};
use crate::reference::take::take_all;

fn check_keys(columns: &[&NativeArray], n_keys: usize) -> TetherResult<()> {
    if n_keys > columns.len() {
        tether_bail!("{} key columns requested from a table of {}", n_keys, columns.len());
    }
    Ok(())
}

fn compare_keys(a: &[Datum<'_>], b: &[Datum<'_>], ascending: &[bool], na_last: &[bool]) -> Ordering {
    for (k, (x, y)) in a.iter().zip(b).enumerate() {
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if na_last[k] => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, true) if na_last[k] => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) if ascending[k] => x.cmp(y),
            (false, false) => y.cmp(x),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort of every column by the first `n_keys` columns.
pub(crate) fn sort_values(
    columns: &[&NativeArray],
    n_keys: usize,
    ascending: &[bool],
    na_last: &[bool],
) -> TetherResult<Vec<NativeArray>> {
    check_keys(columns, n_keys)?;
    if ascending.len() != n_keys || na_last.len() != n_keys {
        tether_bail!("sort needs one direction and one null position per key");
    }
    let keys = row_keys(&columns[..n_keys]);
    let mut order = (0..keys.len()).collect_vec();
    order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], ascending, na_last));
    take_all(columns, &order.into_iter().map(Some).collect_vec())
}

/// Keep one row of every distinct key over the first `n_keys` columns, in row order.
pub(crate) fn drop_duplicates(
    columns: &[&NativeArray],
    n_keys: usize,
    keep: Keep,
    dropna: bool,
) -> TetherResult<Vec<NativeArray>> {
    check_keys(columns, n_keys)?;
    let keys = row_keys(&columns[..n_keys]);
    // first row, last row, count
    let mut seen: HashMap<&[Datum<'_>], (usize, usize, usize), FxBuildHasher> = HashMap::default();
    for (row, key) in keys.iter().enumerate() {
        seen.entry(key.as_slice())
            .and_modify(|(_, last, count)| {
                *last = row;
                *count += 1;
            })
            .or_insert((row, row, 1));
    }
    let rows = keys
        .iter()
        .enumerate()
        .filter(|(_, key)| !(dropna && key.iter().any(Datum::is_null)))
        .filter(|(row, key)| {
            let (first, last, count) = seen[key.as_slice()];
            match keep {
                Keep::First => *row == first,
                Keep::Last => *row == last,
                Keep::None => count == 1,
            }
        })
        .map(|(row, _)| Some(row))
        .collect_vec();
    take_all(columns, &rows)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tether_buffer::{Bitmap, Buffer};
    use tether_dtype::PType;

    use super::*;
    use crate::reference::datum::column_datums;

    fn ints(values: &[Option<i64>]) -> NativeArray {
        NativeArray::Nullable {
            ptype: PType::I64,
            data: Buffer::from_vec(values.iter().map(|v| v.unwrap_or(0)).collect_vec())
                .into_byte_buffer(),
            validity: values.iter().map(Option::is_some).collect::<Bitmap>(),
        }
    }

    fn values(array: &NativeArray) -> Vec<Option<i64>> {
        column_datums(array)
            .into_iter()
            .map(|d| match d {
                Datum::Int(v) => Some(v as i64),
                _ => None,
            })
            .collect()
    }

    #[rstest]
    #[case(true, true, vec![Some(1), Some(2), Some(3), None])]
    #[case(true, false, vec![None, Some(1), Some(2), Some(3)])]
    #[case(false, true, vec![Some(3), Some(2), Some(1), None])]
    fn sorts_with_null_position(
        #[case] ascending: bool,
        #[case] na_last: bool,
        #[case] expected: Vec<Option<i64>>,
    ) {
        let keys = ints(&[Some(2), None, Some(3), Some(1)]);
        let out = sort_values(&[&keys], 1, &[ascending], &[na_last]).unwrap();
        assert_eq!(values(&out[0]), expected);
    }

    #[test]
    fn sort_is_stable() {
        let keys = ints(&[Some(1), Some(0), Some(1), Some(0)]);
        let payload = ints(&[Some(10), Some(20), Some(30), Some(40)]);
        let out = sort_values(&[&keys, &payload], 1, &[true], &[true]).unwrap();
        assert_eq!(values(&out[1]), vec![Some(20), Some(40), Some(10), Some(30)]);
    }

    #[rstest]
    #[case(Keep::First, false, vec![Some(10), Some(20), Some(40)])]
    #[case(Keep::Last, false, vec![Some(20), Some(30), Some(40)])]
    #[case(Keep::None, false, vec![Some(20), Some(40)])]
    #[case(Keep::First, true, vec![Some(10), Some(20)])]
    fn drop_duplicates_keep(
        #[case] keep: Keep,
        #[case] dropna: bool,
        #[case] expected: Vec<Option<i64>>,
    ) {
        let keys = ints(&[Some(1), Some(2), Some(1), None]);
        let payload = ints(&[Some(10), Some(20), Some(30), Some(40)]);
        let out = drop_duplicates(&[&keys, &payload], 1, keep, dropna).unwrap();
        assert_eq!(values(&out[1]), expected);
    }
}
