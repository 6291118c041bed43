//! API to access an on-disk RDF dataset.
//!
//! The entry point of the module is the [`Store`] struct.
//!
//! Usage example:
//! ```
//! use diomede::model::{Quad, QuadPattern, Term};
//! use diomede::store::Store;
//!
//! let dir = tempfile::tempdir()?;
//! let store = Store::open(dir.path())?;
//!
//! let ex = Term::iri("http://example.com");
//! store.load(0, [Quad::new(ex.clone(), ex.clone(), ex.clone(), ex.clone())])?;
//!
//! let results: Result<Vec<Quad>, _> = store.quads_for_pattern(&QuadPattern::all())?.collect();
//! assert_eq!(results?.len(), 1);
//! # Result::<_, Box<dyn std::error::Error>>::Ok(())
//! ```

use crate::model::{Quad, QuadPattern, Term};
use crate::storage::backend::DbConfig;
pub use crate::storage::charsets::{
    CharacteristicDataSet, CharacteristicSet, PredicateStat, StarPattern, StarTriple, TypeSet,
};
pub use crate::storage::error::{CodecError, StorageError};
use crate::storage::{ProgressFn, QuadStorage};
use lru::LruCache;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Terms materialize in chunks of this many quads, each chunk under its own
/// short read transaction, so long result sets never pin an LMDB snapshot.
const MATERIALIZE_CHUNK: usize = 1024;
/// Capacity of the per-iterator id→term cache. Bindings are immutable, so
/// the cache never needs invalidation.
const TERM_CACHE_CAPACITY: usize = 4096;

/// An on-disk RDF dataset over an LMDB environment.
///
/// The store keeps a term dictionary, a quad table and a configurable set of
/// permutation indexes, and answers quad patterns through prefix range
/// scans on the best matching index. Readers run on MVCC snapshots; writes
/// are serialized and atomic.
///
/// Usage example:
/// ```
/// use diomede::model::{Quad, QuadPattern, Term, TermPattern};
/// use diomede::store::Store;
///
/// let dir = tempfile::tempdir()?;
/// let store = Store::open(dir.path())?;
///
/// let graph = Term::iri("tag:graph");
/// store.load(
///     0,
///     [Quad::new(
///         Term::iri("http://example.org/s"),
///         Term::iri("http://example.org/p"),
///         Term::string("o"),
///         graph.clone(),
///     )],
/// )?;
///
/// let pattern = QuadPattern::new(
///     TermPattern::variable("s"),
///     TermPattern::variable("p"),
///     TermPattern::variable("o"),
///     graph,
/// );
/// assert_eq!(store.count_quads(&pattern)?, 1);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone)]
pub struct Store {
    storage: Arc<QuadStorage>,
}

impl Store {
    /// Opens a read-write store, creating it if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        match Self::open_with(path, &DbConfig::default(), true)? {
            Some(store) => Ok(store),
            // Unreachable with `create` set; kept as a hard error.
            None => Err(StorageError::NotFound("store environment".to_owned())),
        }
    }

    /// Opens an existing store, or `None` when there is nothing at `path`.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Option<Self>, StorageError> {
        Self::open_with(path, &DbConfig::default(), false)
    }

    /// Opens a store with an explicit environment configuration.
    pub fn open_with(
        path: impl AsRef<Path>,
        config: &DbConfig,
        create: bool,
    ) -> Result<Option<Self>, StorageError> {
        Ok(QuadStorage::open(path.as_ref(), config, create)?.map(|storage| Self {
            storage: Arc::new(storage),
        }))
    }

    /// Loads a batch of quads in one write transaction, deduplicating
    /// against the store and within the batch. `version` is the dataset's
    /// version tag in Unix seconds; it becomes `Last-Modified`. Returns the
    /// number of quads actually inserted.
    ///
    /// On [`StorageError::MapFull`] the transaction has been rolled back;
    /// reopen with a larger `map_size` and load again.
    pub fn load<I>(&self, version: u64, quads: I) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = Quad>,
    {
        self.storage.load(version, quads, None)
    }

    /// Like [`Self::load`], invoking `progress` every thousand quads with
    /// the running count and rate.
    pub fn load_with_progress<I>(
        &self,
        version: u64,
        quads: I,
        progress: ProgressFn<'_>,
    ) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = Quad>,
    {
        self.storage.load(version, quads, Some(progress))
    }

    /// Number of stored quads.
    pub fn len(&self) -> Result<u64, StorageError> {
        self.storage.len()
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.storage.is_empty()
    }

    /// Streams the quads matching a pattern.
    ///
    /// Matching quad ids are collected eagerly under one short read
    /// transaction; terms materialize lazily in chunks through a
    /// per-iterator cache.
    pub fn quads_for_pattern(&self, pattern: &QuadPattern) -> Result<QuadIterator, StorageError> {
        let tuples = self.storage.quad_ids_matching(pattern)?;
        Ok(QuadIterator::new(Arc::clone(&self.storage), tuples))
    }

    /// Streams matching quads in the key order of the named permutation.
    /// Fails with [`StorageError::Index`] when that index is not active.
    pub fn quads_ordered(
        &self,
        pattern: &QuadPattern,
        order: &str,
    ) -> Result<QuadIterator, StorageError> {
        let tuples = self.storage.quad_ids_ordered(pattern, order)?;
        Ok(QuadIterator::new(Arc::clone(&self.storage), tuples))
    }

    /// The raw id-tuples matching a pattern, in scan order.
    pub fn quad_ids_for_pattern(
        &self,
        pattern: &QuadPattern,
    ) -> Result<Vec<[u64; 4]>, StorageError> {
        self.storage.quad_ids_matching(pattern)
    }

    /// Counts matching quads without materializing terms. Patterns whose
    /// bound positions form an index prefix and that repeat no variable are
    /// answered by a pure range count.
    pub fn count_quads(&self, pattern: &QuadPattern) -> Result<u64, StorageError> {
        self.storage.count_matching(pattern)
    }

    /// Streams one variable binding map per matching quad.
    pub fn bindings_for_pattern(
        &self,
        pattern: &QuadPattern,
    ) -> Result<BindingIterator, StorageError> {
        let mut variables: Vec<(String, usize)> = Vec::new();
        for (slot, position) in pattern.positions().into_iter().enumerate() {
            if let Some(variable) = position.as_variable() {
                if !variables.iter().any(|(name, _)| name == variable.name()) {
                    variables.push((variable.name().to_owned(), slot));
                }
            }
        }
        Ok(BindingIterator {
            quads: self.quads_for_pattern(pattern)?,
            variables,
        })
    }

    /// The result orderings naturally available for a pattern: each best
    /// permutation, stripped of the bound prefix it covers.
    pub fn available_orders(&self, pattern: &QuadPattern) -> Result<Vec<String>, StorageError> {
        self.storage.available_orders(pattern)
    }

    /// The best index for a set of bound SPOG positions, if any is active.
    pub fn best_index_name(&self, bound: [bool; 4]) -> Option<String> {
        self.storage.best_index_name(&bound)
    }

    // Dictionary probes

    /// The dictionary id of a term, if interned.
    pub fn term_id(&self, term: &Term) -> Result<Option<u64>, StorageError> {
        self.storage.term_id(term)
    }

    /// The term bound to a dictionary id.
    pub fn id_term(&self, id: u64) -> Result<Option<Term>, StorageError> {
        self.storage.term(id)
    }

    /// The SHA-256 dictionary key of a term.
    pub fn term_hash(term: &Term) -> [u8; 32] {
        QuadStorage::term_hash(term)
    }

    /// Every `(id, term)` dictionary row, in id order.
    pub fn terms(&self) -> Result<Vec<(u64, Term)>, StorageError> {
        self.storage.terms()
    }

    /// Every `(hash, id)` dictionary row, in hash order.
    pub fn term_hashes(&self) -> Result<Vec<([u8; 32], u64)>, StorageError> {
        self.storage.term_hashes()
    }

    /// Number of interned terms.
    pub fn term_count(&self) -> Result<u64, StorageError> {
        self.storage.term_count()
    }

    // Graphs

    /// The graph terms appearing in any quad.
    pub fn graphs(&self) -> Result<Vec<Term>, StorageError> {
        let ids = self.storage.graph_ids()?;
        self.storage.terms_for_ids(&ids)
    }

    /// The distinct terms appearing in any quad of the given graph.
    pub fn graph_terms(&self, graph: &Term) -> Result<Vec<Term>, StorageError> {
        let ids = self.storage.graph_term_ids(graph)?;
        self.storage.terms_for_ids(&ids)
    }

    /// Removes every quad of the graph and its graph-set entry. Orphaned
    /// terms stay in the dictionary. Returns whether the graph existed.
    pub fn drop_graph(&self, graph: &Term) -> Result<bool, StorageError> {
        self.storage.drop_graph(graph)
    }

    // Permutation indexes

    /// Names of the active permutation indexes.
    pub fn full_indexes(&self) -> Vec<String> {
        self.storage.full_index_names()
    }

    /// Builds the named permutation index from the quad table.
    pub fn add_full_index(&self, name: &str) -> Result<(), StorageError> {
        self.storage.add_full_index(name)
    }

    /// Drops the named permutation index.
    pub fn drop_full_index(&self, name: &str) -> Result<(), StorageError> {
        self.storage.drop_full_index(name)
    }

    // Characteristic / Type Sets

    /// Recomputes the Characteristic Sets of every graph, with Type Sets
    /// when asked.
    pub fn compute_characteristic_sets(&self, with_type_sets: bool) -> Result<(), StorageError> {
        self.storage.compute_characteristic_sets(with_type_sets)
    }

    pub fn drop_characteristic_sets(&self) -> Result<(), StorageError> {
        self.storage.drop_characteristic_sets()
    }

    pub fn drop_type_sets(&self) -> Result<(), StorageError> {
        self.storage.drop_type_sets()
    }

    /// The stored Characteristic Sets of one graph.
    pub fn characteristic_sets(
        &self,
        graph: &Term,
        include_type_sets: bool,
    ) -> Result<CharacteristicDataSet, StorageError> {
        self.storage.characteristic_sets(graph, include_type_sets)
    }

    /// Estimated cardinality of a star BGP over one subject variable.
    pub fn star_cardinality(&self, graph: &Term, star: &StarPattern) -> Result<f64, StorageError> {
        self.storage.star_cardinality(graph, star)
    }

    /// The union of the Characteristic Sets matching a star BGP.
    pub fn aggregated_characteristic_set(
        &self,
        graph: &Term,
        star: &StarPattern,
    ) -> Result<Option<CharacteristicSet>, StorageError> {
        self.storage.aggregated_characteristic_set(graph, star)
    }

    /// Cardinality of one predicate in one graph, from the Characteristic
    /// Sets when computed and counted live otherwise.
    pub fn predicate_cardinality(
        &self,
        graph: &Term,
        predicate: &Term,
    ) -> Result<u64, StorageError> {
        self.storage.predicate_cardinality(graph, predicate)
    }

    // Metadata

    /// Full integrity scan. Returns an error describing the first violated
    /// invariant: [`StorageError::UniqueConstraint`],
    /// [`StorageError::Count`] or [`StorageError::Index`].
    pub fn verify(&self) -> Result<(), StorageError> {
        self.storage.verify()
    }

    /// The store version derived from `Last-Modified`, in Unix seconds.
    pub fn effective_version(&self) -> Result<Option<u64>, StorageError> {
        self.storage.effective_version()
    }

    /// All metadata rows rendered for display.
    pub fn stats_entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.storage.stats_entries()
    }

    pub fn meta(&self) -> Result<Option<String>, StorageError> {
        self.storage.meta()
    }

    pub fn set_meta(&self, value: &str) -> Result<(), StorageError> {
        self.storage.set_meta(value)
    }

    // Prefixes

    pub fn set_prefix(&self, label: &str, iri: &str) -> Result<(), StorageError> {
        self.storage.set_prefix(label, iri)
    }

    pub fn remove_prefix(&self, label: &str) -> Result<bool, StorageError> {
        self.storage.remove_prefix(label)
    }

    pub fn clear_prefixes(&self) -> Result<(), StorageError> {
        self.storage.clear_prefixes()
    }

    pub fn prefixes(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.storage.prefixes()
    }
}

/// Streams quads, materializing terms in bounded chunks.
///
/// The quad ids were collected when the iterator was created; each chunk of
/// term lookups runs under its own fresh read transaction through an LRU
/// id→term cache owned by this iterator.
pub struct QuadIterator {
    storage: Arc<QuadStorage>,
    tuples: VecDeque<[u64; 4]>,
    ready: VecDeque<Quad>,
    cache: LruCache<u64, Term>,
    done: bool,
}

impl QuadIterator {
    fn new(storage: Arc<QuadStorage>, tuples: Vec<[u64; 4]>) -> Self {
        Self {
            storage,
            tuples: tuples.into(),
            ready: VecDeque::new(),
            cache: LruCache::new(
                NonZeroUsize::new(TERM_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            done: false,
        }
    }

    /// Remaining quads, counting both materialized and pending ones.
    pub fn remaining(&self) -> usize {
        self.ready.len() + self.tuples.len()
    }

    fn materialize_chunk(&mut self) -> Result<(), StorageError> {
        let take = self.tuples.len().min(MATERIALIZE_CHUNK);
        let chunk: Vec<[u64; 4]> = self.tuples.drain(..take).collect();
        let mut local: HashMap<u64, Term> = HashMap::new();
        let mut missing: Vec<u64> = Vec::new();
        for tuple in &chunk {
            for &id in tuple {
                if local.contains_key(&id) || missing.contains(&id) {
                    continue;
                }
                if let Some(term) = self.cache.get(&id) {
                    local.insert(id, term.clone());
                } else {
                    missing.push(id);
                }
            }
        }
        missing.sort_unstable();
        let fetched = self.storage.terms_for_ids(&missing)?;
        for (&id, term) in missing.iter().zip(fetched) {
            self.cache.put(id, term.clone());
            local.insert(id, term);
        }
        let term_for = |id: u64| {
            local
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("term id {id}")))
        };
        for tuple in chunk {
            self.ready.push_back(Quad::new(
                term_for(tuple[0])?,
                term_for(tuple[1])?,
                term_for(tuple[2])?,
                term_for(tuple[3])?,
            ));
        }
        Ok(())
    }
}

impl Iterator for QuadIterator {
    type Item = Result<Quad, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(quad) = self.ready.pop_front() {
                return Some(Ok(quad));
            }
            if self.done || self.tuples.is_empty() {
                return None;
            }
            if let Err(error) = self.materialize_chunk() {
                self.done = true;
                self.tuples.clear();
                return Some(Err(error));
            }
        }
    }
}

/// Streams one variable binding map per matching quad.
pub struct BindingIterator {
    quads: QuadIterator,
    variables: Vec<(String, usize)>,
}

impl Iterator for BindingIterator {
    type Item = Result<BTreeMap<String, Term>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let quad = match self.quads.next()? {
            Ok(quad) => quad,
            Err(error) => return Some(Err(error)),
        };
        let positions = quad.positions();
        Some(Ok(self
            .variables
            .iter()
            .map(|(name, slot)| (name.clone(), positions[*slot].clone()))
            .collect()))
    }
}
