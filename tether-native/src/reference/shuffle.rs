use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tether_error::{TetherResult, tether_bail, tether_err};

use crate::reference::array::NativeArray;
use crate::reference::datum::{hash_key, row_keys};

/// Source rows in the order a hash shuffle over `num_ranks` workers emits them.
///
/// Rows are grouped by destination rank and keep their relative order within a rank. A
/// shuffle that is not parallel, or runs on one rank, leaves rows in place.
pub(crate) fn shuffle_order(
    columns: &[&NativeArray],
    n_keys: usize,
    num_ranks: usize,
    is_parallel: bool,
) -> TetherResult<Vec<usize>> {
    if n_keys > columns.len() {
        tether_bail!("{} key columns requested from a table of {}", n_keys, columns.len());
    }
    let keys = row_keys(&columns[..n_keys]);
    let mut order = (0..columns.first().map_or(0, |c| c.len())).collect_vec();
    if is_parallel && num_ranks > 1 {
        order.sort_by_key(|&row| hash_key(&keys[row]) % num_ranks as u64);
    }
    Ok(order)
}

/// The rows that put a shuffled table back in its original order.
pub(crate) fn reverse_order(source_rows: &[usize], len: usize) -> TetherResult<Vec<usize>> {
    if source_rows.len() != len {
        tether_bail!(
            "shuffle moved {} rows but the table has {}",
            source_rows.len(),
            len
        );
    }
    let mut inverse = vec![0; len];
    for (row, &source) in source_rows.iter().enumerate() {
        if source >= len {
            tether_bail!("shuffle source row {} is out of range", source);
        }
        inverse[source] = row;
    }
    Ok(inverse)
}

/// Row order after rebalancing: in place for mode 0, permuted by `rng` for mode 1, permuted by
/// a generator seeded with `seed` for mode 2.
pub(crate) fn renormalization_order(
    len: usize,
    random: i32,
    seed: i64,
    rng: &mut StdRng,
) -> TetherResult<Vec<usize>> {
    let mut order = (0..len).collect_vec();
    match random {
        0 => {}
        1 => order.shuffle(rng),
        2 => order.shuffle(&mut StdRng::seed_from_u64(seed as u64)),
        other => tether_bail!("unknown renormalization mode {}", other),
    }
    Ok(order)
}

/// Check that `ranks` names distinct workers among `num_ranks`.
pub(crate) fn check_rank_group(ranks: &[i32], num_ranks: usize) -> TetherResult<()> {
    if ranks.is_empty() {
        tether_bail!("a rank group needs at least one rank");
    }
    if let Some(&rank) = ranks
        .iter()
        .find(|&&rank| usize::try_from(rank).map_or(true, |rank| rank >= num_ranks))
    {
        tether_bail!("rank {} is not one of the {} ranks", rank, num_ranks);
    }
    if !ranks.iter().all_unique() {
        tether_bail!("rank group {:?} repeats a rank", ranks);
    }
    Ok(())
}

/// Rows drawn at random: `round(frac * len)` of them when `frac` is non-negative, else `n`.
pub(crate) fn sample_rows(
    len: usize,
    n: i64,
    frac: f64,
    replace: bool,
    rng: &mut StdRng,
) -> TetherResult<Vec<usize>> {
    let count = if frac >= 0.0 {
        (frac * len as f64).round() as usize
    } else {
        usize::try_from(n).map_err(|_| tether_err!("cannot sample {} rows", n))?
    };
    if replace {
        if len == 0 && count > 0 {
            tether_bail!("cannot sample {} rows from an empty table", count);
        }
        Ok((0..count).map(|_| rng.random_range(0..len)).collect())
    } else {
        if count > len {
            tether_bail!("cannot sample {} of {} rows without replacement", count, len);
        }
        Ok(rand::seq::index::sample(rng, len, count).into_vec())
    }
}
