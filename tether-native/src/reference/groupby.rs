use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use rustc_hash::FxBuildHasher;
use tether_buffer::Buffer;
use tether_dtype::PType;
use tether_error::{TetherResult, tether_bail};

use crate::abi::AggFunc;
use crate::reference::array::NativeArray;
use crate::reference::datum::{Datum, column_datums, row_keys};
use crate::reference::take::{take, take_all};

#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupOptions {
    pub skipdropna: bool,
    pub dropna: bool,
    pub return_keys: bool,
}

/// The rows of every group, groups in order of first appearance.
fn group_rows(keys: &[Vec<Datum<'_>>], dropna: bool) -> Vec<Vec<usize>> {
    let mut slots: HashMap<&[Datum<'_>], usize, FxBuildHasher> = HashMap::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (row, key) in keys.iter().enumerate() {
        if dropna && key.iter().any(Datum::is_null) {
            continue;
        }
        let slot = *slots.entry(key.as_slice()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }
    groups
}

/// Per-row group labels and the rows ordered by label, dropped rows last.
pub(crate) fn label_rows(keys: &[&NativeArray], dropna: bool) -> (Vec<i64>, Vec<usize>, usize) {
    let len = keys.first().map_or(0, |k| k.len());
    let groups = group_rows(&row_keys(keys), dropna);
    let mut labels = vec![-1i64; len];
    for (label, rows) in groups.iter().enumerate() {
        for &row in rows {
            labels[row] = label as i64;
        }
    }
    let dropped = (0..len).filter(|&row| labels[row] < 0);
    let sort_idx = groups.iter().flatten().copied().chain(dropped).collect_vec();
    (labels, sort_idx, groups.len())
}

fn i64s(values: impl IntoIterator<Item = i64>) -> NativeArray {
    NativeArray::Numpy {
        ptype: PType::I64,
        data: values.into_iter().collect::<Buffer<i64>>().into_byte_buffer(),
    }
}

fn f64s(values: impl IntoIterator<Item = f64>) -> NativeArray {
    NativeArray::Numpy {
        ptype: PType::F64,
        data: values.into_iter().collect::<Buffer<f64>>().into_byte_buffer(),
    }
}

fn numeric_ptype(func: AggFunc, column: &NativeArray) -> TetherResult<PType> {
    match column {
        NativeArray::Numpy { ptype, .. } | NativeArray::Nullable { ptype, .. } => Ok(*ptype),
        _ => tether_bail!("{:?} needs a numeric column, found {}", func, column.ctype()),
    }
}

fn statistic(func: AggFunc, values: &mut [f64]) -> f64 {
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    match func {
        AggFunc::Mean if n > 0 => mean,
        AggFunc::Var | AggFunc::Std if n > 1 => {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            if func == AggFunc::Std {
                variance.sqrt()
            } else {
                variance
            }
        }
        AggFunc::Median if n > 0 => {
            values.sort_by(f64::total_cmp);
            if n % 2 == 0 {
                (values[n / 2 - 1] + values[n / 2]) / 2.0
            } else {
                values[n / 2]
            }
        }
        _ => f64::NAN,
    }
}

/// Reduce the rows of every group of `column` with `func`.
pub(crate) fn aggregate(
    column: &NativeArray,
    func: AggFunc,
    groups: &[Vec<usize>],
    skipdropna: bool,
) -> TetherResult<NativeArray> {
    let datums = column_datums(column);
    let present = |group: &[usize]| {
        group
            .iter()
            .copied()
            .filter(|&row| !datums[row].is_null())
            .collect_vec()
    };
    // A null poisons float reductions unless nulls are skipped.
    let poisoned = |group: &[usize]| !skipdropna && group.iter().any(|&row| datums[row].is_null());

    Ok(match func {
        AggFunc::Size => i64s(groups.iter().map(|g| g.len() as i64)),
        AggFunc::Count => i64s(groups.iter().map(|g| present(g).len() as i64)),
        AggFunc::Nunique => i64s(groups.iter().map(|g| {
            present(g)
                .into_iter()
                .map(|row| &datums[row])
                .collect::<HashSet<_, FxBuildHasher>>()
                .len() as i64
        })),
        AggFunc::Sum | AggFunc::Prod => {
            let product = func == AggFunc::Prod;
            if numeric_ptype(func, column)?.is_float() {
                f64s(groups.iter().map(|g| {
                    if poisoned(g) {
                        return f64::NAN;
                    }
                    let values = present(g).into_iter().filter_map(|row| datums[row].as_f64());
                    if product { values.product() } else { values.sum() }
                }))
            } else {
                i64s(groups.iter().map(|g| {
                    let values = present(g).into_iter().map(|row| match datums[row] {
                        Datum::Int(v) => v as i64,
                        _ => 0,
                    });
                    if product {
                        values.fold(1i64, i64::wrapping_mul)
                    } else {
                        values.fold(0i64, i64::wrapping_add)
                    }
                }))
            }
        }
        AggFunc::Mean | AggFunc::Var | AggFunc::Std | AggFunc::Median => {
            numeric_ptype(func, column)?;
            f64s(groups.iter().map(|g| {
                if poisoned(g) {
                    return f64::NAN;
                }
                let mut values = present(g)
                    .into_iter()
                    .filter_map(|row| datums[row].as_f64())
                    .collect_vec();
                statistic(func, &mut values)
            }))
        }
        AggFunc::Min | AggFunc::Max | AggFunc::First | AggFunc::Last => {
            let rows = groups
                .iter()
                .map(|g| {
                    let rows = present(g);
                    match func {
                        AggFunc::First => rows.first().copied(),
                        AggFunc::Last => rows.last().copied(),
                        AggFunc::Min => rows.into_iter().min_by(|&a, &b| datums[a].cmp(&datums[b])),
                        _ => rows.into_iter().max_by(|&a, &b| datums[a].cmp(&datums[b])),
                    }
                })
                .collect_vec();
            take(column, &rows)?
        }
        other => tether_bail!("aggregation {:?} is not supported", other),
    })
}

fn check_funcs(data: &[&NativeArray], funcs: &[Vec<AggFunc>]) -> TetherResult<()> {
    if data.len() != funcs.len() {
        tether_bail!(
            "{} data columns but aggregations for {}",
            data.len(),
            funcs.len()
        );
    }
    Ok(())
}

/// Group by `keys` and reduce every data column with each of its functions.
///
/// The output holds the keys of each group when requested, then one column per data column
/// per function.
pub(crate) fn groupby(
    keys: &[&NativeArray],
    data: &[&NativeArray],
    funcs: &[Vec<AggFunc>],
    options: GroupOptions,
) -> TetherResult<Vec<NativeArray>> {
    check_funcs(data, funcs)?;
    let groups = group_rows(&row_keys(keys), options.dropna);
    let mut out = Vec::new();
    if options.return_keys {
        out.extend(take_all(keys, &groups.iter().map(|g| g.first().copied()).collect_vec())?);
    }
    for (column, funcs) in data.iter().zip(funcs) {
        for &func in funcs {
            out.push(aggregate(column, func, &groups, options.skipdropna)?);
        }
    }
    Ok(out)
}

fn mask_empty(array: NativeArray, cells: &[Vec<usize>]) -> NativeArray {
    match array {
        NativeArray::Numpy { ptype, data } => NativeArray::Nullable {
            ptype,
            data,
            validity: cells.iter().map(|c| !c.is_empty()).collect(),
        },
        NativeArray::Nullable {
            ptype,
            data,
            validity,
        } => NativeArray::Nullable {
            ptype,
            data,
            validity: validity
                .iter()
                .zip(cells)
                .map(|(valid, c)| valid && !c.is_empty())
                .collect(),
        },
        other => other,
    }
}

/// Group by `keys` and spread every aggregate over the values of `targets`.
///
/// Output columns run per data column, per function, per target value. A cross-tabulation
/// instead emits one row count per target value. Cells without rows are null, or zero for
/// counts.
pub(crate) fn pivot(
    keys: &[&NativeArray],
    data: &[&NativeArray],
    pivot: &NativeArray,
    targets: &NativeArray,
    funcs: &[Vec<AggFunc>],
    crosstab: bool,
    options: GroupOptions,
) -> TetherResult<Vec<NativeArray>> {
    if !crosstab {
        check_funcs(data, funcs)?;
    }
    let groups = group_rows(&row_keys(keys), true);
    let pivot_values = column_datums(pivot);
    let target_values = column_datums(targets);
    let mut slots: HashMap<&Datum<'_>, usize, FxBuildHasher> = HashMap::default();
    for (j, value) in target_values.iter().enumerate() {
        slots.entry(value).or_insert(j);
    }

    let mut cells = vec![vec![Vec::new(); groups.len()]; target_values.len()];
    for (g, rows) in groups.iter().enumerate() {
        for &row in rows {
            if let Some(&j) = slots.get(&pivot_values[row]) {
                cells[j][g].push(row);
            }
        }
    }

    let mut out = Vec::new();
    if options.return_keys {
        out.extend(take_all(keys, &groups.iter().map(|g| g.first().copied()).collect_vec())?);
    }
    if crosstab {
        out.extend(
            cells
                .iter()
                .map(|column| i64s(column.iter().map(|c| c.len() as i64))),
        );
        return Ok(out);
    }
    for (column, funcs) in data.iter().zip(funcs) {
        for &func in funcs {
            for column_cells in &cells {
                let reduced = aggregate(column, func, column_cells, options.skipdropna)?;
                out.push(mask_empty(reduced, column_cells));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tether_buffer::{Bitmap, ByteBuffer};

    use super::*;

    const OPTIONS: GroupOptions = GroupOptions {
        skipdropna: true,
        dropna: true,
        return_keys: true,
    };

    fn floats(values: &[Option<f64>]) -> NativeArray {
        NativeArray::Nullable {
            ptype: PType::F64,
            data: Buffer::from_vec(values.iter().map(|v| v.unwrap_or(0.0)).collect_vec())
                .into_byte_buffer(),
            validity: values.iter().map(Option::is_some).collect::<Bitmap>(),
        }
    }

    fn strings(values: &[&str]) -> NativeArray {
        let mut offsets = vec![0u64];
        let mut chars = Vec::new();
        for v in values {
            chars.extend_from_slice(v.as_bytes());
            offsets.push(chars.len() as u64);
        }
        NativeArray::String {
            binary: false,
            offsets: Buffer::from_vec(offsets),
            chars: ByteBuffer::from_vec(chars),
            validity: Bitmap::new_valid(values.len()),
        }
    }

    fn numbers(array: &NativeArray) -> Vec<Option<f64>> {
        column_datums(array).iter().map(Datum::as_f64).collect()
    }

    #[rstest]
    #[case(AggFunc::Sum, vec![Some(4.0), Some(2.0)])]
    #[case(AggFunc::Count, vec![Some(2.0), Some(1.0)])]
    #[case(AggFunc::Size, vec![Some(3.0), Some(1.0)])]
    #[case(AggFunc::Mean, vec![Some(2.0), Some(2.0)])]
    #[case(AggFunc::Max, vec![Some(3.0), Some(2.0)])]
    #[case(AggFunc::First, vec![Some(1.0), Some(2.0)])]
    #[case(AggFunc::Nunique, vec![Some(2.0), Some(1.0)])]
    fn groups_in_first_appearance_order(#[case] func: AggFunc, #[case] expected: Vec<Option<f64>>) {
        let keys = strings(&["b", "a", "b", "b"]);
        let values = floats(&[Some(1.0), Some(2.0), None, Some(3.0)]);
        let out = groupby(&[&keys], &[&values], &[vec![func]], OPTIONS).unwrap();
        assert_eq!(column_datums(&out[0]), column_datums(&strings(&["b", "a"])));
        assert_eq!(numbers(&out[1]), expected);
    }

    #[rstest]
    #[case::dropped(true, vec![0, -1, 0, 1], vec![0, 2, 3, 1], 2)]
    #[case::kept(false, vec![0, 1, 0, 2], vec![0, 2, 1, 3], 3)]
    fn labels_follow_first_appearance(
        #[case] dropna: bool,
        #[case] labels: Vec<i64>,
        #[case] sort_idx: Vec<usize>,
        #[case] ngroups: usize,
    ) {
        let keys = floats(&[Some(1.0), None, Some(1.0), Some(4.0)]);
        assert_eq!(label_rows(&[&keys], dropna), (labels, sort_idx, ngroups));
    }

    #[test]
    fn nulls_poison_unless_skipped() {
        let keys = strings(&["a", "a"]);
        let values = floats(&[Some(1.0), None]);
        let options = GroupOptions {
            skipdropna: false,
            ..OPTIONS
        };
        let out = groupby(&[&keys], &[&values], &[vec![AggFunc::Mean]], options).unwrap();
        assert_eq!(numbers(&out[1]), vec![None]);
    }

    #[test]
    fn unsupported_function() {
        let keys = strings(&["a"]);
        let values = floats(&[Some(1.0)]);
        assert!(groupby(&[&keys], &[&values], &[vec![AggFunc::Cumsum]], OPTIONS).is_err());
    }

    #[test]
    fn pivot_spreads_over_targets() {
        let keys = strings(&["x", "x", "y"]);
        let values = floats(&[Some(1.0), Some(2.0), Some(5.0)]);
        let pivots = strings(&["p", "q", "p"]);
        let targets = strings(&["q", "p"]);
        let out = pivot(
            &[&keys],
            &[&values],
            &pivots,
            &targets,
            &[vec![AggFunc::Sum]],
            false,
            OPTIONS,
        )
        .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(numbers(&out[1]), vec![Some(2.0), None]);
        assert_eq!(numbers(&out[2]), vec![Some(1.0), Some(5.0)]);

        let counts = pivot(&[&keys], &[], &pivots, &targets, &[], true, OPTIONS).unwrap();
        assert_eq!(numbers(&counts[1]), vec![Some(1.0), Some(0.0)]);
    }
}
