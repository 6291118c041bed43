//! Pattern planning and execution over the permutation indexes.
//!
//! A pattern's bound positions pick the best permutation index; the bound
//! leading ids form a key prefix and the scan is a range query on it.
//! Repeated-variable equality is applied after the scan — no index can
//! enforce it.

use crate::storage::backend::SubDb;
use crate::storage::binary_encoder::{
    decode_id_tuple, decode_u64, encode_id_tuple, write_u64, ID_TUPLE_SIZE,
};
use crate::storage::error::StorageError;
use heed::RoTxn;
use std::fmt;

/// The four quad positions in storage order.
pub const POSITION_NAMES: [char; 4] = ['s', 'p', 'o', 'g'];

/// An id-level pattern: `Some(id)` is bound, `None` unbound. The unbound
/// sentinel id 0 never appears in stored tuples.
pub type IdPattern = [Option<u64>; 4];

/// A bijection on the four quad positions, named by a string over `spog`.
///
/// `order[i]` is the SPOG position whose id lands at slot `i` of the index
/// key: `gpso` is `[3, 1, 0, 2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    name: String,
    order: [usize; 4],
}

impl Permutation {
    /// Parses a permutation name: four distinct characters over `spog`.
    pub fn from_name(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.len() != 4 {
            return None;
        }
        let mut order = [0; 4];
        let mut used = [false; 4];
        for (slot, &byte) in order.iter_mut().zip(bytes) {
            let position = POSITION_NAMES
                .iter()
                .position(|&c| c == char::from(byte))?;
            if used[position] {
                return None;
            }
            used[position] = true;
            *slot = position;
        }
        Some(Self {
            name: name.to_owned(),
            order,
        })
    }

    /// Rebuilds a permutation from its stored order (the `fullIndexes` row).
    pub fn from_stored(order: &[u64]) -> Option<Self> {
        let order: [usize; 4] = order
            .iter()
            .map(|&p| usize::try_from(p).ok().filter(|p| *p < 4))
            .collect::<Option<Vec<_>>>()?
            .try_into()
            .ok()?;
        let mut used = [false; 4];
        let mut name = String::with_capacity(4);
        for &position in &order {
            if used[position] {
                return None;
            }
            used[position] = true;
            name.push(POSITION_NAMES[position]);
        }
        Some(Self { name, order })
    }

    /// All 24 permutations, in lexicographic name order.
    pub fn all() -> Vec<Self> {
        let mut names: Vec<String> = Vec::with_capacity(24);
        for &a in &POSITION_NAMES {
            for &b in &POSITION_NAMES {
                for &c in &POSITION_NAMES {
                    for &d in &POSITION_NAMES {
                        let name: String = [a, b, c, d].iter().collect();
                        if Self::from_name(&name).is_some() {
                            names.push(name);
                        }
                    }
                }
            }
        }
        names.sort();
        names
            .into_iter()
            .filter_map(|name| Self::from_name(&name))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> &[usize; 4] {
        &self.order
    }

    /// The order as stored in the `fullIndexes` catalogue.
    pub fn stored_order(&self) -> [u64; 4] {
        self.order.map(|p| p as u64)
    }

    /// Reorders an SPOG tuple into index-key order.
    pub fn permute(&self, tuple: &[u64; 4]) -> [u64; 4] {
        self.order.map(|position| tuple[position])
    }

    /// Inverse of [`Self::permute`].
    pub fn unpermute(&self, permuted: &[u64; 4]) -> [u64; 4] {
        let mut tuple = [0; 4];
        for (slot, &position) in self.order.iter().enumerate() {
            tuple[position] = permuted[slot];
        }
        tuple
    }

    /// The 32-byte index key of a tuple.
    pub fn key(&self, tuple: &[u64; 4]) -> [u8; ID_TUPLE_SIZE] {
        encode_id_tuple(&self.permute(tuple))
    }

    /// Length of the leading run of bound positions when scanning with this
    /// permutation.
    pub fn score(&self, bound: &[bool; 4]) -> usize {
        self.order.iter().take_while(|&&p| bound[p]).count()
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub(crate) fn bound_positions(pattern: &IdPattern) -> [bool; 4] {
    [
        pattern[0].is_some(),
        pattern[1].is_some(),
        pattern[2].is_some(),
        pattern[3].is_some(),
    ]
}

/// Picks the active permutation maximizing the bound-prefix length.
///
/// Ties go to the first candidate in iteration order; the caller keeps the
/// active set sorted by name, so the tie-break is deterministic.
pub(crate) fn best_index<'a>(
    indexes: &'a [(Permutation, SubDb)],
    bound: &[bool; 4],
) -> Option<&'a (Permutation, SubDb)> {
    let mut best: Option<(&(Permutation, SubDb), usize)> = None;
    for entry in indexes {
        let score = entry.0.score(bound);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((entry, score));
        }
    }
    best.map(|(entry, _)| entry)
}

/// Among the max-score permutations, the orderings the results naturally
/// come in, stripped of the bound prefix.
pub(crate) fn available_orders(indexes: &[(Permutation, SubDb)], bound: &[bool; 4]) -> Vec<String> {
    let Some(max) = indexes.iter().map(|(p, _)| p.score(bound)).max() else {
        return Vec::new();
    };
    indexes
        .iter()
        .filter(|(p, _)| p.score(bound) == max)
        .map(|(p, _)| p.name()[max..].to_owned())
        .collect()
}

/// The bound leading ids of `pattern` under `permutation`.
pub(crate) fn prefix_for(permutation: &Permutation, pattern: &IdPattern) -> Vec<u64> {
    let mut prefix = Vec::new();
    for &position in permutation.order() {
        match pattern[position] {
            Some(id) => prefix.push(id),
            None => break,
        }
    }
    prefix
}

/// `[lower, upper)` byte bounds of a non-empty prefix: the prefix zero-padded
/// to key width, and the same with its last element incremented. When the
/// last element is `u64::MAX` the increment would overflow and the scan runs
/// to the end of the sub-database instead.
pub(crate) fn range_for_prefix(prefix: &[u64]) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut lower = Vec::with_capacity(ID_TUPLE_SIZE);
    for &id in prefix {
        write_u64(&mut lower, id);
    }
    lower.resize(ID_TUPLE_SIZE, 0);
    let (&last, head) = match prefix.split_last() {
        Some(split) => split,
        None => return (lower, None),
    };
    let upper = if last == u64::MAX {
        None
    } else {
        let mut upper = Vec::with_capacity(ID_TUPLE_SIZE);
        for &id in head {
            write_u64(&mut upper, id);
        }
        write_u64(&mut upper, last + 1);
        upper.resize(ID_TUPLE_SIZE, 0);
        Some(upper)
    };
    (lower, upper)
}

fn matches_ids(tuple: &[u64; 4], pattern: &IdPattern) -> bool {
    pattern
        .iter()
        .zip(tuple)
        .all(|(bound, id)| bound.map_or(true, |bound| bound == *id))
}

fn satisfies_repeats(tuple: &[u64; 4], repeated: &[Vec<usize>]) -> bool {
    repeated.iter().all(|group| {
        let first = tuple[group[0]];
        group[1..].iter().all(|&i| tuple[i] == first)
    })
}

/// Streams the `(tuple, qid)` pairs matching `pattern` from one index.
pub(crate) fn scan_index(
    permutation: &Permutation,
    index: &SubDb,
    txn: &RoTxn<'_>,
    pattern: &IdPattern,
    repeated: &[Vec<usize>],
    f: &mut dyn FnMut([u64; 4], u64) -> Result<(), StorageError>,
) -> Result<(), StorageError> {
    let prefix = prefix_for(permutation, pattern);
    // All bound positions are re-checked on every row: the range guarantees
    // the prefix except in the u64::MAX overflow case, and the residual
    // positions are never guaranteed.
    let mut visit = |key: &[u8], value: &[u8]| {
        let tuple = permutation.unpermute(&decode_id_tuple(key)?);
        if matches_ids(&tuple, pattern) && satisfies_repeats(&tuple, repeated) {
            f(tuple, decode_u64(value)?)?;
        }
        Ok(())
    };
    if prefix.is_empty() {
        index.for_each(txn, visit)
    } else {
        let (lower, upper) = range_for_prefix(&prefix);
        index.for_each_in_range(txn, &lower, upper.as_deref(), false, visit)
    }
}

/// Streams the `(tuple, qid)` pairs matching `pattern`, using the best
/// active index or falling back to a scan of the quad table.
pub(crate) fn for_each_match(
    quads: &SubDb,
    indexes: &[(Permutation, SubDb)],
    txn: &RoTxn<'_>,
    pattern: &IdPattern,
    repeated: &[Vec<usize>],
    f: &mut dyn FnMut([u64; 4], u64) -> Result<(), StorageError>,
) -> Result<(), StorageError> {
    let bound = bound_positions(pattern);
    if let Some((permutation, index)) = best_index(indexes, &bound) {
        scan_index(permutation, index, txn, pattern, repeated, f)
    } else {
        quads.for_each(txn, |key, value| {
            let tuple = decode_id_tuple(value)?;
            if matches_ids(&tuple, pattern) && satisfies_repeats(&tuple, repeated) {
                f(tuple, decode_u64(key)?)?;
            }
            Ok(())
        })
    }
}

/// Counts matches. When no variable repeats and the best prefix covers every
/// bound position, the count is a pure range count on the index; otherwise
/// the matches are enumerated.
pub(crate) fn count_matches(
    quads: &SubDb,
    indexes: &[(Permutation, SubDb)],
    txn: &RoTxn<'_>,
    pattern: &IdPattern,
    repeated: &[Vec<usize>],
) -> Result<u64, StorageError> {
    let bound = bound_positions(pattern);
    let bound_count = bound.iter().filter(|b| **b).count();
    if repeated.is_empty() {
        if let Some((permutation, index)) = best_index(indexes, &bound) {
            let prefix = prefix_for(permutation, pattern);
            if prefix.len() == bound_count {
                if prefix.is_empty() {
                    return index.len(txn);
                }
                let (lower, upper) = range_for_prefix(&prefix);
                // The overflow case has no tight upper bound; enumerate.
                if let Some(upper) = upper {
                    return index.count_in_range(txn, &lower, Some(&upper), false);
                }
            }
        }
    }
    let mut count = 0;
    for_each_match(quads, indexes, txn, pattern, repeated, &mut |_, _| {
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

/// Is this exact id-tuple already stored?
///
/// With any active index the fully bound tuple is a point get; without one
/// the quad table is scanned.
pub(crate) fn quad_exists(
    quads: &SubDb,
    indexes: &[(Permutation, SubDb)],
    txn: &RoTxn<'_>,
    tuple: &[u64; 4],
) -> Result<bool, StorageError> {
    if let Some((permutation, index)) = indexes.first() {
        return index.contains(txn, &permutation.key(tuple));
    }
    let mut found = false;
    quads.for_each(txn, |_, value| {
        if decode_id_tuple(value)? == *tuple {
            found = true;
        }
        Ok(())
    })?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_from_name() {
        let gpso = Permutation::from_name("gpso").unwrap();
        assert_eq!(gpso.order(), &[3, 1, 0, 2]);
        assert_eq!(gpso.stored_order(), [3, 1, 0, 2]);
        assert_eq!(Permutation::from_name("spog").unwrap().order(), &[0, 1, 2, 3]);
        assert!(Permutation::from_name("spo").is_none());
        assert!(Permutation::from_name("ssog").is_none());
        assert!(Permutation::from_name("spox").is_none());
    }

    #[test]
    fn permutation_round_trip() {
        let tuple = [10, 20, 30, 40];
        for permutation in Permutation::all() {
            assert_eq!(tuple, permutation.unpermute(&permutation.permute(&tuple)));
            let stored = permutation.stored_order();
            assert_eq!(
                permutation,
                Permutation::from_stored(&stored).unwrap()
            );
        }
    }

    #[test]
    fn all_permutations() {
        let all = Permutation::all();
        assert_eq!(all.len(), 24);
        // Lexicographic order, so `gops` comes first.
        assert_eq!(all[0].name(), "gops");
    }

    #[test]
    fn score_is_bound_prefix_length() {
        let gpso = Permutation::from_name("gpso").unwrap();
        // graph bound only
        assert_eq!(gpso.score(&[false, false, false, true]), 1);
        // graph and predicate bound
        assert_eq!(gpso.score(&[false, true, false, true]), 2);
        // subject bound only: the leading g is unbound
        assert_eq!(gpso.score(&[true, false, false, false]), 0);
        assert_eq!(gpso.score(&[true, true, true, true]), 4);
    }

    #[test]
    fn range_bounds_pad_and_increment() {
        let (lower, upper) = range_for_prefix(&[3]);
        assert_eq!(lower.len(), ID_TUPLE_SIZE);
        assert_eq!(&lower[..8], &3u64.to_be_bytes());
        assert!(lower[8..].iter().all(|&b| b == 0));
        let upper = upper.unwrap();
        assert_eq!(&upper[..8], &4u64.to_be_bytes());
        assert!(upper[8..].iter().all(|&b| b == 0));

        let (_, upper) = range_for_prefix(&[3, 7]);
        let upper = upper.unwrap();
        assert_eq!(&upper[..8], &3u64.to_be_bytes());
        assert_eq!(&upper[8..16], &8u64.to_be_bytes());
    }

    #[test]
    fn range_bound_overflow_scans_to_end() {
        let (_, upper) = range_for_prefix(&[3, u64::MAX]);
        assert!(upper.is_none());
    }

    #[test]
    fn repeats_filter() {
        assert!(satisfies_repeats(&[1, 2, 1, 4], &[vec![0, 2]]));
        assert!(!satisfies_repeats(&[1, 2, 3, 4], &[vec![0, 2]]));
        assert!(satisfies_repeats(&[1, 2, 3, 4], &[]));
        assert!(!satisfies_repeats(&[1, 2, 1, 4], &[vec![0, 2], vec![1, 3]]));
    }
}
