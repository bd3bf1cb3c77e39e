use hashbrown::HashMap;
use itertools::Itertools;
use rustc_hash::FxBuildHasher;
use tether_buffer::Buffer;
use tether_dtype::PType;
use tether_error::{TetherResult, tether_bail};

use crate::reference::array::NativeArray;
use crate::reference::datum::{Datum, row_keys};
use crate::reference::take::take_all;

/// Indicator category of a row present only in the left table.
const LEFT_ONLY: i8 = 0;
/// Indicator category of a row present only in the right table.
const RIGHT_ONLY: i8 = 1;
/// Indicator category of a row present in both tables.
const BOTH: i8 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct JoinPlan {
    pub n_keys: usize,
    pub n_data_left: usize,
    pub n_data_right: usize,
    pub is_left: bool,
    pub is_right: bool,
    pub indicator: bool,
    pub na_equal: bool,
}

/// Equi-join on the leading `n_keys` columns of both tables.
///
/// The output holds every left column, then every right column, then the indicator when
/// requested. Left rows keep their order with their matches in right order; unmatched right
/// rows of an outer join follow.
pub(crate) fn hash_join(
    left: &[&NativeArray],
    right: &[&NativeArray],
    plan: JoinPlan,
) -> TetherResult<Vec<NativeArray>> {
    if left.len() != plan.n_keys + plan.n_data_left {
        tether_bail!(
            "left table has {} columns, expected {} keys and {} data",
            left.len(),
            plan.n_keys,
            plan.n_data_left
        );
    }
    if right.len() != plan.n_keys + plan.n_data_right {
        tether_bail!(
            "right table has {} columns, expected {} keys and {} data",
            right.len(),
            plan.n_keys,
            plan.n_data_right
        );
    }

    let left_keys = row_keys(&left[..plan.n_keys]);
    let right_keys = row_keys(&right[..plan.n_keys]);
    let joinable = |key: &[Datum<'_>]| plan.na_equal || !key.iter().any(Datum::is_null);

    let mut index: HashMap<&[Datum<'_>], Vec<usize>, FxBuildHasher> = HashMap::default();
    for (row, key) in right_keys.iter().enumerate() {
        if joinable(key) {
            index.entry(key.as_slice()).or_default().push(row);
        }
    }

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut right_matched = vec![false; right_keys.len()];
    for (row, key) in left_keys.iter().enumerate() {
        let matches: &[usize] = if joinable(key) {
            index.get(key.as_slice()).map(Vec::as_slice).unwrap_or_default()
        } else {
            &[]
        };
        for &other in matches {
            right_matched[other] = true;
            pairs.push((Some(row), Some(other)));
        }
        if matches.is_empty() && plan.is_left {
            pairs.push((Some(row), None));
        }
    }
    if plan.is_right {
        pairs.extend(
            right_matched
                .iter()
                .positions(|matched| !matched)
                .map(|row| (None, Some(row))),
        );
    }

    let left_rows = pairs.iter().map(|(l, _)| *l).collect_vec();
    let right_rows = pairs.iter().map(|(_, r)| *r).collect_vec();
    let mut out = take_all(left, &left_rows)?;
    out.extend(take_all(right, &right_rows)?);
    if plan.indicator {
        let codes = pairs
            .iter()
            .map(|pair| match pair {
                (Some(_), Some(_)) => BOTH,
                (Some(_), None) => LEFT_ONLY,
                _ => RIGHT_ONLY,
            })
            .collect::<Buffer<i8>>();
        out.push(NativeArray::Categorical {
            ptype: PType::I8,
            data: codes.into_byte_buffer(),
            num_categories: 3,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tether_buffer::Bitmap;

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

    fn plan(is_left: bool, is_right: bool) -> JoinPlan {
        JoinPlan {
            n_keys: 1,
            n_data_left: 1,
            n_data_right: 1,
            is_left,
            is_right,
            indicator: true,
            na_equal: false,
        }
    }

    #[rstest]
    #[case(false, false, vec![Some(1), Some(1)], vec![Some(2), Some(2)])]
    #[case(true, false, vec![Some(1), Some(1), Some(2)], vec![Some(2), Some(2), Some(0)])]
    #[case(true, true, vec![Some(1), Some(1), Some(2), None], vec![Some(2), Some(2), Some(0), Some(1)])]
    fn join_kinds(
        #[case] is_left: bool,
        #[case] is_right: bool,
        #[case] left_payload: Vec<Option<i64>>,
        #[case] indicator: Vec<Option<i64>>,
    ) {
        let lk = ints(&[Some(7), Some(8)]);
        let lv = ints(&[Some(1), Some(2)]);
        let rk = ints(&[Some(7), Some(9), Some(7)]);
        let rv = ints(&[Some(10), Some(20), Some(30)]);
        let out = hash_join(&[&lk, &lv], &[&rk, &rv], plan(is_left, is_right)).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(values(&out[1]), left_payload);
        assert_eq!(values(&out[4]), indicator);
    }

    #[test]
    fn null_keys_match_only_when_equal() {
        let lk = ints(&[None]);
        let rk = ints(&[None]);
        let mut plan = JoinPlan {
            n_keys: 1,
            ..Default::default()
        };
        assert_eq!(hash_join(&[&lk], &[&rk], plan).unwrap()[0].len(), 0);
        plan.na_equal = true;
        assert_eq!(hash_join(&[&lk], &[&rk], plan).unwrap()[0].len(), 1);
    }

    #[test]
    fn column_count_is_checked() {
        let k = ints(&[Some(1)]);
        assert!(hash_join(&[&k], &[&k], plan(false, false)).is_err());
    }
}
