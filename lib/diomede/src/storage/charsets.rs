//! Characteristic Set and Type Set statistics.
//!
//! A Characteristic Set groups the subjects of a graph by the exact set of
//! predicates they carry, with per-predicate multiplicity statistics; a Type
//! Set refines one Characteristic Set by the observed `rdf:type` value
//! combinations. Both live in their own sub-databases and are recomputed
//! wholesale on demand: they may lag the quad table, and the
//! `*-Last-Modified` stamps report whether they are accurate.
//!
//! On disk, a Characteristic Set row is keyed by `(graph, sequence)` and
//! holds `count ‖ (predicate, sum, min, max)*`; a Type Set row is keyed by
//! `(graph, cs-sequence, combo-sequence)` and holds `count ‖ type-id*`.
//! Every integer is 8-byte big-endian.

use crate::model::{vocab, Term};
use crate::storage::binary_encoder::{decode_u64s, write_u64, ID_SIZE};
use crate::storage::error::{CodecError, StorageError};
use crate::storage::plan::{self, IdPattern};
use crate::storage::{
    QuadStorage, CHARACTERISTIC_SETS_LAST_MODIFIED, QUADS_LAST_MODIFIED, TYPE_SETS_LAST_MODIFIED,
};
use std::collections::{BTreeMap, HashMap};

/// Multiplicity statistics of one predicate within a Characteristic Set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateStat {
    /// The predicate's term id.
    pub predicate: u64,
    /// Total triples with this predicate across the set's subjects.
    pub sum: u64,
    /// Minimum per-subject multiplicity.
    pub min: u64,
    /// Maximum per-subject multiplicity.
    pub max: u64,
}

/// The subjects of a graph sharing one exact predicate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSet {
    /// Number of subjects exhibiting exactly this predicate set.
    pub count: u64,
    /// Per-predicate statistics, sorted by predicate id.
    pub predicates: Vec<PredicateStat>,
}

impl CharacteristicSet {
    /// The predicate ids of this set, ascending.
    pub fn predicate_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.predicates.iter().map(|stat| stat.predicate)
    }

    /// Does this set carry every given predicate?
    pub fn contains_all(&self, predicates: &[u64]) -> bool {
        predicates
            .iter()
            .all(|p| self.predicates.iter().any(|stat| stat.predicate == *p))
    }

    /// Triple total of one predicate, if it belongs to the set.
    pub fn sum(&self, predicate: u64) -> Option<u64> {
        self.predicates
            .iter()
            .find(|stat| stat.predicate == predicate)
            .map(|stat| stat.sum)
    }

    /// Triple total across all predicates of the set.
    pub fn total_sum(&self) -> u64 {
        self.predicates.iter().map(|stat| stat.sum).sum()
    }
}

/// One `rdf:type` value combination observed on a Characteristic Set's
/// subjects, with the number of subjects carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSet {
    pub count: u64,
    /// The type term ids, sorted ascending.
    pub types: Vec<u64>,
}

/// The Characteristic Sets of one graph, optionally with their Type Sets.
#[derive(Debug, Clone)]
pub struct CharacteristicDataSet {
    /// The graph these statistics describe.
    pub graph: Term,
    /// The sets in their stored sequence order.
    pub sets: Vec<CharacteristicSet>,
    /// Type Sets parallel to `sets`; empty when not loaded or not computed.
    pub type_sets: Vec<Vec<TypeSet>>,
    /// Whether the statistics are at least as new as the quad table.
    pub accurate: bool,
}

/// One triple pattern of a star query over a common subject variable:
/// predicate and object each bound or left variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarTriple {
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl StarTriple {
    #[inline]
    pub fn new(predicate: Option<Term>, object: Option<Term>) -> Self {
        Self { predicate, object }
    }
}

/// A basic graph pattern over a single subject variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarPattern {
    pub triples: Vec<StarTriple>,
}

impl StarPattern {
    #[inline]
    pub fn new(triples: Vec<StarTriple>) -> Self {
        Self { triples }
    }
}

// Accumulation

#[derive(Default)]
struct SetAccumulator {
    count: u64,
    // predicate -> (sum, min, max)
    stats: HashMap<u64, (u64, u64, u64)>,
    type_order: Vec<Vec<u64>>,
    type_counts: HashMap<Vec<u64>, u64>,
}

impl SetAccumulator {
    fn add_multiplicity(&mut self, counts: &BTreeMap<u64, u64>) {
        self.count += 1;
        for (&predicate, &per_subject) in counts {
            let entry = self.stats.entry(predicate).or_insert((0, u64::MAX, 0));
            entry.0 += per_subject;
            entry.1 = entry.1.min(per_subject);
            entry.2 = entry.2.max(per_subject);
        }
    }

    fn add_type_combo(&mut self, combo: Vec<u64>) {
        if let Some(count) = self.type_counts.get_mut(&combo) {
            *count += 1;
        } else {
            self.type_counts.insert(combo.clone(), 1);
            self.type_order.push(combo);
        }
    }
}

#[derive(Default)]
struct Accumulator {
    order: Vec<Vec<u64>>,
    sets: HashMap<Vec<u64>, SetAccumulator>,
}

impl Accumulator {
    fn observe(&mut self, counts: &BTreeMap<u64, u64>, types: Option<Vec<u64>>) {
        let predicates: Vec<u64> = counts.keys().copied().collect();
        if !self.sets.contains_key(&predicates) {
            self.order.push(predicates.clone());
        }
        let set = self.sets.entry(predicates).or_default();
        set.add_multiplicity(counts);
        if let Some(types) = types {
            set.add_type_combo(types);
        }
    }
}

/// Groups a subject-sorted tuple stream and flushes one observation per
/// subject into the accumulator.
struct SubjectGrouper<'a> {
    accumulator: &'a mut Accumulator,
    rdf_type: Option<u64>,
    with_types: bool,
    current: Option<(u64, BTreeMap<u64, u64>, Vec<u64>)>,
}

impl<'a> SubjectGrouper<'a> {
    fn new(accumulator: &'a mut Accumulator, rdf_type: Option<u64>, with_types: bool) -> Self {
        Self {
            accumulator,
            rdf_type,
            with_types,
            current: None,
        }
    }

    fn push(&mut self, tuple: [u64; 4]) {
        let [subject, predicate, object, _] = tuple;
        match &mut self.current {
            Some((current, counts, types)) if *current == subject => {
                *counts.entry(predicate).or_insert(0) += 1;
                if self.with_types && self.rdf_type == Some(predicate) {
                    types.push(object);
                }
            }
            _ => {
                self.flush();
                let mut counts = BTreeMap::new();
                counts.insert(predicate, 1);
                let mut types = Vec::new();
                if self.with_types && self.rdf_type == Some(predicate) {
                    types.push(object);
                }
                self.current = Some((subject, counts, types));
            }
        }
    }

    fn flush(&mut self) {
        if let Some((_, counts, mut types)) = self.current.take() {
            let types = if self.with_types && !types.is_empty() {
                types.sort_unstable();
                types.dedup();
                Some(types)
            } else {
                None
            };
            self.accumulator.observe(&counts, types);
        }
    }

    fn finish(mut self) {
        self.flush();
    }
}

fn serialize_set(predicates: &[u64], set: &SetAccumulator) -> Vec<u8> {
    let mut value = Vec::with_capacity(ID_SIZE * (1 + 4 * predicates.len()));
    write_u64(&mut value, set.count);
    for &predicate in predicates {
        let (sum, min, max) = set.stats.get(&predicate).copied().unwrap_or((0, 0, 0));
        write_u64(&mut value, predicate);
        write_u64(&mut value, sum);
        write_u64(&mut value, min);
        write_u64(&mut value, max);
    }
    value
}

fn deserialize_set(value: &[u8]) -> Result<CharacteristicSet, StorageError> {
    let numbers = decode_u64s(value)?;
    let Some((&count, stats)) = numbers.split_first() else {
        return Err(CodecError::msg("empty characteristic set row").into());
    };
    if stats.len() % 4 != 0 {
        return Err(CodecError::msg("misshapen characteristic set row").into());
    }
    let predicates = stats
        .chunks_exact(4)
        .map(|chunk| PredicateStat {
            predicate: chunk[0],
            sum: chunk[1],
            min: chunk[2],
            max: chunk[3],
        })
        .collect();
    Ok(CharacteristicSet { count, predicates })
}

fn composite_key(parts: &[u64]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.len() * ID_SIZE);
    for &part in parts {
        write_u64(&mut key, part);
    }
    key
}

/// `[lower, upper)` bounds of all keys starting with `prefix` among keys of
/// `width` integers.
fn composite_range(prefix: &[u64], width: usize) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut lower = composite_key(prefix);
    lower.resize(width * ID_SIZE, 0);
    let Some((&last, head)) = prefix.split_last() else {
        return (lower, None);
    };
    if last == u64::MAX {
        return (lower, None);
    }
    let mut upper_parts = head.to_vec();
    upper_parts.push(last + 1);
    let mut upper = composite_key(&upper_parts);
    upper.resize(width * ID_SIZE, 0);
    (lower, Some(upper))
}

/// The estimation core: sum over matching sets of
/// `distinct · Π per-pattern multiplicity`, scaled by the object
/// selectivity the caller computed.
fn estimate_star(
    sets: &[CharacteristicSet],
    triples: &[(Option<u64>, Option<u64>)],
    selectivity: f64,
) -> f64 {
    let required: Vec<u64> = triples.iter().filter_map(|(p, _)| *p).collect();
    let mut total = 0.0;
    for set in sets.iter().filter(|set| set.contains_all(&required)) {
        if set.count == 0 {
            continue;
        }
        let distinct = set.count as f64;
        let mut multiplicity = 1.0;
        for (predicate, _) in triples {
            multiplicity *= match predicate {
                Some(p) => set.sum(*p).unwrap_or(0) as f64 / distinct,
                None => set.total_sum() as f64 / distinct,
            };
        }
        total += distinct * multiplicity;
    }
    total * selectivity
}

impl QuadStorage {
    /// Rebuilds the Characteristic Set index (and, when asked, the Type Set
    /// index) for every graph. Prior contents are cleared.
    ///
    /// Each graph's triples are streamed sorted by subject — directly off a
    /// permutation starting `g, s` when one is active, otherwise collected
    /// and sorted — and flushed into one observation per subject.
    pub fn compute_characteristic_sets(&self, with_type_sets: bool) -> Result<(), StorageError> {
        let rdf_type = self.term_id(&Term::iri(vocab::rdf::TYPE))?;
        let graph_ids = self.graph_ids()?;
        let indexes = self.index_snapshot();
        let streaming = indexes
            .iter()
            .find(|(p, _)| p.order()[0] == 3 && p.order()[1] == 0)
            .cloned();
        let mut per_graph: Vec<(u64, Accumulator)> = Vec::with_capacity(graph_ids.len());
        self.db.read(|txn| {
            for &graph in &graph_ids {
                let pattern: IdPattern = [None, None, None, Some(graph)];
                let mut accumulator = Accumulator::default();
                let mut grouper =
                    SubjectGrouper::new(&mut accumulator, rdf_type, with_type_sets);
                if let Some((permutation, index)) = &streaming {
                    plan::scan_index(permutation, index, txn, &pattern, &[], &mut |tuple, _| {
                        grouper.push(tuple);
                        Ok(())
                    })?;
                } else {
                    let mut tuples = Vec::new();
                    plan::for_each_match(
                        &self.quads,
                        &indexes,
                        txn,
                        &pattern,
                        &[],
                        &mut |tuple, _| {
                            tuples.push(tuple);
                            Ok(())
                        },
                    )?;
                    tuples.sort_unstable();
                    for tuple in tuples {
                        grouper.push(tuple);
                    }
                }
                grouper.finish();
                per_graph.push((graph, accumulator));
            }
            Ok(())
        })?;
        self.db.write(|txn| {
            self.characteristic_sets.clear(txn)?;
            // Sequence numbers restart on every recomputation, so stale Type
            // Sets would dangle; they are cleared unconditionally.
            self.type_sets.clear(txn)?;
            let mut cs_rows: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            let mut ts_rows: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            for (graph, accumulator) in &per_graph {
                for (sequence, predicates) in accumulator.order.iter().enumerate() {
                    let sequence = sequence as u64;
                    let Some(set) = accumulator.sets.get(predicates) else {
                        continue;
                    };
                    cs_rows.push((
                        composite_key(&[*graph, sequence]),
                        serialize_set(predicates, set),
                    ));
                    if with_type_sets {
                        for (combo_sequence, combo) in set.type_order.iter().enumerate() {
                            let count = set.type_counts.get(combo).copied().unwrap_or(0);
                            let mut value = Vec::with_capacity(ID_SIZE * (1 + combo.len()));
                            write_u64(&mut value, count);
                            for &type_id in combo {
                                write_u64(&mut value, type_id);
                            }
                            ts_rows.push((
                                composite_key(&[*graph, sequence, combo_sequence as u64]),
                                value,
                            ));
                        }
                    }
                }
            }
            // Graphs iterate ascending and sequences count up, so the rows
            // are already in key order for the bulk append.
            self.characteristic_sets.bulk_put_sorted(txn, &cs_rows)?;
            self.touch(txn, &[CHARACTERISTIC_SETS_LAST_MODIFIED])?;
            if with_type_sets {
                self.type_sets.bulk_put_sorted(txn, &ts_rows)?;
                self.touch(txn, &[TYPE_SETS_LAST_MODIFIED])?;
            }
            Ok(())
        })
    }

    /// Removes the Characteristic Set index (and the Type Sets, whose
    /// sequence numbers would dangle without it).
    pub fn drop_characteristic_sets(&self) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.characteristic_sets.clear(txn)?;
            self.type_sets.clear(txn)?;
            self.stats
                .delete(txn, CHARACTERISTIC_SETS_LAST_MODIFIED.as_bytes())?;
            self.stats.delete(txn, TYPE_SETS_LAST_MODIFIED.as_bytes())?;
            Ok(())
        })
    }

    /// Removes the Type Set index only.
    pub fn drop_type_sets(&self) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.type_sets.clear(txn)?;
            self.stats.delete(txn, TYPE_SETS_LAST_MODIFIED.as_bytes())?;
            Ok(())
        })
    }

    /// Loads the stored Characteristic Sets of a graph. An empty dataset
    /// (never computed, or unknown graph) has no sets and is not accurate.
    pub fn characteristic_sets(
        &self,
        graph: &Term,
        include_type_sets: bool,
    ) -> Result<CharacteristicDataSet, StorageError> {
        self.db.read(|txn| {
            let accurate = match (
                self.stat_timestamp(txn, CHARACTERISTIC_SETS_LAST_MODIFIED)?,
                self.stat_timestamp(txn, QUADS_LAST_MODIFIED)?,
            ) {
                (Some(sets), Some(quads)) => sets >= quads,
                (Some(_), None) => true,
                _ => false,
            };
            let mut dataset = CharacteristicDataSet {
                graph: graph.clone(),
                sets: Vec::new(),
                type_sets: Vec::new(),
                accurate,
            };
            let Some(graph_id) = self.term_id_in(txn, graph)? else {
                return Ok(dataset);
            };
            let (lower, upper) = composite_range(&[graph_id], 2);
            self.characteristic_sets.for_each_in_range(
                txn,
                &lower,
                upper.as_deref(),
                false,
                |_, value| {
                    dataset.sets.push(deserialize_set(value)?);
                    Ok(())
                },
            )?;
            if include_type_sets {
                for sequence in 0..dataset.sets.len() as u64 {
                    let mut combos = Vec::new();
                    let (lower, upper) = composite_range(&[graph_id, sequence], 3);
                    self.type_sets.for_each_in_range(
                        txn,
                        &lower,
                        upper.as_deref(),
                        false,
                        |_, value| {
                            let numbers = decode_u64s(value)?;
                            let Some((&count, types)) = numbers.split_first() else {
                                return Err(CodecError::msg("empty type set row").into());
                            };
                            combos.push(TypeSet {
                                count,
                                types: types.to_vec(),
                            });
                            Ok(())
                        },
                    )?;
                    dataset.type_sets.push(combos);
                }
            }
            Ok(dataset)
        })
    }

    /// Estimated cardinality of a star BGP over one subject variable in the
    /// given graph, against the stored Characteristic Sets.
    pub fn star_cardinality(&self, graph: &Term, star: &StarPattern) -> Result<f64, StorageError> {
        let dataset = self.characteristic_sets(graph, false)?;
        let Some(triples) = self.resolve_star(star)? else {
            return Ok(0.0);
        };
        let selectivity = self.star_selectivity(graph, &triples)?;
        Ok(estimate_star(&dataset.sets, &triples, selectivity))
    }

    /// The union of all Characteristic Sets matching a star BGP: counts
    /// summed, predicate set intersected, per-predicate statistics unioned.
    /// Answers "how many distinct subjects match".
    pub fn aggregated_characteristic_set(
        &self,
        graph: &Term,
        star: &StarPattern,
    ) -> Result<Option<CharacteristicSet>, StorageError> {
        let dataset = self.characteristic_sets(graph, false)?;
        let Some(triples) = self.resolve_star(star)? else {
            return Ok(None);
        };
        let required: Vec<u64> = triples.iter().filter_map(|(p, _)| *p).collect();
        let matching: Vec<&CharacteristicSet> = dataset
            .sets
            .iter()
            .filter(|set| set.contains_all(&required))
            .collect();
        let Some((first, rest)) = matching.split_first() else {
            return Ok(None);
        };
        let mut predicates: Vec<u64> = first.predicate_ids().collect();
        for set in rest {
            predicates.retain(|p| set.sum(*p).is_some());
        }
        let aggregated = CharacteristicSet {
            count: matching.iter().map(|set| set.count).sum(),
            predicates: predicates
                .into_iter()
                .map(|predicate| {
                    let mut sum = 0;
                    let mut min = u64::MAX;
                    let mut max = 0;
                    for set in &matching {
                        if let Some(stat) = set
                            .predicates
                            .iter()
                            .find(|stat| stat.predicate == predicate)
                        {
                            sum += stat.sum;
                            min = min.min(stat.min);
                            max = max.max(stat.max);
                        }
                    }
                    PredicateStat {
                        predicate,
                        sum,
                        min,
                        max,
                    }
                })
                .collect(),
        };
        Ok(Some(aggregated))
    }

    /// Exact-ish cardinality of one predicate in one graph, read from the
    /// Characteristic Sets when available and counted live otherwise.
    pub fn predicate_cardinality(
        &self,
        graph: &Term,
        predicate: &Term,
    ) -> Result<u64, StorageError> {
        let Some(predicate_id) = self.term_id(predicate)? else {
            return Ok(0);
        };
        let dataset = self.characteristic_sets(graph, false)?;
        if !dataset.sets.is_empty() {
            return Ok(dataset
                .sets
                .iter()
                .filter_map(|set| set.sum(predicate_id))
                .sum());
        }
        let Some(graph_id) = self.term_id(graph)? else {
            return Ok(0);
        };
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let pattern: IdPattern = [None, Some(predicate_id), None, Some(graph_id)];
            plan::count_matches(&self.quads, &indexes, txn, &pattern, &[])
        })
    }

    /// Resolves a star pattern's bound terms to ids. `None` when a bound
    /// term is absent from the dictionary: nothing can match it.
    fn resolve_star(
        &self,
        star: &StarPattern,
    ) -> Result<Option<Vec<(Option<u64>, Option<u64>)>>, StorageError> {
        self.db.read(|txn| {
            let mut triples = Vec::with_capacity(star.triples.len());
            for triple in &star.triples {
                let predicate = match &triple.predicate {
                    Some(term) => match self.term_id_in(txn, term)? {
                        Some(id) => Some(id),
                        None => return Ok(None),
                    },
                    None => None,
                };
                let object = match &triple.object {
                    Some(term) => match self.term_id_in(txn, term)? {
                        Some(id) => Some(id),
                        None => return Ok(None),
                    },
                    None => None,
                };
                triples.push((predicate, object));
            }
            Ok(Some(triples))
        })
    }

    /// `min` over the bound-object patterns of
    /// `count(?, p, obj, g) / count(?, p, ?, g)`; 1 when no object is bound.
    fn star_selectivity(
        &self,
        graph: &Term,
        triples: &[(Option<u64>, Option<u64>)],
    ) -> Result<f64, StorageError> {
        if triples.iter().all(|(_, object)| object.is_none()) {
            return Ok(1.0);
        }
        let Some(graph_id) = self.term_id(graph)? else {
            return Ok(0.0);
        };
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let mut selectivity = 1.0f64;
            for (predicate, object) in triples {
                let Some(object) = object else { continue };
                let with_object: IdPattern = [None, *predicate, Some(*object), Some(graph_id)];
                let without_object: IdPattern = [None, *predicate, None, Some(graph_id)];
                let denominator =
                    plan::count_matches(&self.quads, &indexes, txn, &without_object, &[])? as f64;
                let ratio = if denominator == 0.0 {
                    0.0
                } else {
                    plan::count_matches(&self.quads, &indexes, txn, &with_object, &[])? as f64
                        / denominator
                };
                selectivity = selectivity.min(ratio);
            }
            Ok(selectivity)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(counts: &[(u64, u64)]) -> BTreeMap<u64, u64> {
        counts.iter().copied().collect()
    }

    #[test]
    fn accumulator_groups_by_predicate_set() {
        let mut accumulator = Accumulator::default();
        accumulator.observe(&subject(&[(1, 1)]), None);
        accumulator.observe(&subject(&[(1, 3)]), None);
        accumulator.observe(&subject(&[(1, 1), (2, 2)]), None);
        assert_eq!(accumulator.order.len(), 2);
        let only_p1 = &accumulator.sets[&vec![1]];
        assert_eq!(only_p1.count, 2);
        assert_eq!(only_p1.stats[&1], (4, 1, 3));
        let p1_p2 = &accumulator.sets[&vec![1, 2]];
        assert_eq!(p1_p2.count, 1);
        assert_eq!(p1_p2.stats[&2], (2, 2, 2));
    }

    #[test]
    fn accumulator_sum_law() {
        // sum(p) >= count and min <= sum/count <= max
        let mut accumulator = Accumulator::default();
        for multiplicity in [1, 2, 5] {
            accumulator.observe(&subject(&[(7, multiplicity)]), None);
        }
        let set = &accumulator.sets[&vec![7]];
        let (sum, min, max) = set.stats[&7];
        assert!(sum >= set.count);
        assert!(min * set.count <= sum);
        assert!(sum <= max * set.count);
    }

    #[test]
    fn grouper_flushes_on_subject_change() {
        let mut accumulator = Accumulator::default();
        let mut grouper = SubjectGrouper::new(&mut accumulator, Some(9), true);
        grouper.push([1, 9, 100, 5]);
        grouper.push([1, 7, 200, 5]);
        grouper.push([2, 9, 100, 5]);
        grouper.finish();
        assert_eq!(accumulator.order, vec![vec![7, 9], vec![9]]);
        let with_name = &accumulator.sets[&vec![7, 9]];
        assert_eq!(with_name.count, 1);
        assert_eq!(with_name.type_counts[&vec![100]], 1);
    }

    #[test]
    fn set_serialization_round_trips() {
        let mut set = SetAccumulator::default();
        set.add_multiplicity(&subject(&[(3, 2), (5, 1)]));
        set.add_multiplicity(&subject(&[(3, 4), (5, 1)]));
        let value = serialize_set(&[3, 5], &set);
        let decoded = deserialize_set(&value).unwrap();
        assert_eq!(decoded.count, 2);
        assert_eq!(
            decoded.predicates,
            vec![
                PredicateStat {
                    predicate: 3,
                    sum: 6,
                    min: 2,
                    max: 4
                },
                PredicateStat {
                    predicate: 5,
                    sum: 2,
                    min: 1,
                    max: 1
                },
            ]
        );
    }

    #[test]
    fn composite_range_covers_prefix() {
        let (lower, upper) = composite_range(&[3], 2);
        assert_eq!(lower.len(), 16);
        assert_eq!(&lower[..8], &3u64.to_be_bytes());
        let upper = upper.unwrap();
        assert_eq!(&upper[..8], &4u64.to_be_bytes());
        let key = composite_key(&[3, 12]);
        assert!(lower <= key && key < upper);
        let other = composite_key(&[4, 0]);
        assert!(other >= upper);
    }

    fn set(count: u64, stats: &[(u64, u64)]) -> CharacteristicSet {
        CharacteristicSet {
            count,
            predicates: stats
                .iter()
                .map(|&(predicate, sum)| PredicateStat {
                    predicate,
                    sum,
                    min: 1,
                    max: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn star_estimation_matches_hand_computation() {
        // 10 subjects {type}, 5 {type,name}, 5 {type,version},
        // 5 {type,name,version}, one triple per predicate per subject.
        const TYPE: u64 = 1;
        const NAME: u64 = 2;
        const VERSION: u64 = 3;
        let sets = vec![
            set(10, &[(TYPE, 10)]),
            set(5, &[(TYPE, 5), (NAME, 5)]),
            set(5, &[(TYPE, 5), (VERSION, 5)]),
            set(5, &[(TYPE, 5), (NAME, 5), (VERSION, 5)]),
        ];
        let var = (None, None);
        assert_eq!(estimate_star(&sets, &[var], 1.0).round() as u64, 45);
        assert_eq!(
            estimate_star(&sets, &[(Some(TYPE), None)], 1.0).round() as u64,
            25
        );
        assert_eq!(
            estimate_star(&sets, &[(Some(NAME), None)], 1.0).round() as u64,
            10
        );
        assert_eq!(
            estimate_star(&sets, &[(Some(TYPE), None), (Some(NAME), None)], 1.0).round() as u64,
            10
        );
        assert_eq!(
            estimate_star(
                &sets,
                &[(Some(TYPE), None), (Some(NAME), None), (Some(VERSION), None)],
                1.0
            )
            .round() as u64,
            5
        );
    }

    #[test]
    fn star_estimation_scales_by_selectivity() {
        let sets = vec![set(10, &[(1, 20)])];
        let estimate = estimate_star(&sets, &[(Some(1), None)], 0.5);
        assert!((estimate - 10.0).abs() < 1e-9);
    }
}
