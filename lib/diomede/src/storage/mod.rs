//! The physical quadstore.
//!
//! One LMDB environment holds the term dictionary (`term_to_id`,
//! `id_to_term`), the quad table (`quads`), the permutation catalogue
//! (`fullIndexes`) and one sub-database per active permutation, the graph
//! set (`graphs`), metadata (`stats`, `prefixes`) and the statistics
//! sub-databases (`characteristicSets`, `typeSets`). All integers on disk
//! are 8-byte big-endian; see `binary_encoder` for the term codec.

pub mod backend;
pub mod binary_encoder;
pub mod charsets;
pub mod error;
pub mod plan;

use crate::model::{Quad, QuadPattern, Term};
use crate::storage::backend::{Db, DbConfig, SubDb};
use crate::storage::binary_encoder::{
    decode_id_tuple, decode_term, decode_u64, decode_u64s, encode_id_tuple, encode_term, write_u64,
};
use crate::storage::error::{CodecError, StorageError};
use crate::storage::plan::{IdPattern, Permutation};
use heed::{RoTxn, RwTxn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::RwLock;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

// Sub-database names. These are on-disk identifiers; changing any of them
// breaks compatibility.
const TERM_TO_ID: &str = "term_to_id";
const ID_TO_TERM: &str = "id_to_term";
const QUADS: &str = "quads";
const FULL_INDEXES: &str = "fullIndexes";
const GRAPHS: &str = "graphs";
const STATS: &str = "stats";
const PREFIXES: &str = "prefixes";
pub(crate) const CHARACTERISTIC_SETS: &str = "characteristicSets";
pub(crate) const TYPE_SETS: &str = "typeSets";

// `stats` keys.
const VERSION_KEY: &[u8] = b"Diomede-Version";
const META_KEY: &[u8] = b"meta";
pub(crate) const LAST_MODIFIED: &str = "Last-Modified";
pub(crate) const QUADS_LAST_MODIFIED: &str = "Quads-Last-Modified";
pub(crate) const INDEX_LAST_MODIFIED: &str = "Index-Last-Modified";
pub(crate) const PREFIXES_LAST_MODIFIED: &str = "Prefixes-Last-Modified";
pub(crate) const CHARACTERISTIC_SETS_LAST_MODIFIED: &str = "CharacteristicSets-Last-Modified";
pub(crate) const TYPE_SETS_LAST_MODIFIED: &str = "TypeSets-Last-Modified";
const NEXT_TERM_ID: &[u8] = b"next_unassigned_term_id";
const NEXT_QUAD_ID: &[u8] = b"next_unassigned_quad_id";

/// The permutation every new store starts with. Graph-first, so per-graph
/// scans and the Characteristic Set builder have a usable prefix.
const DEFAULT_PERMUTATION: &str = "gpso";

const PROGRESS_EVERY: u64 = 1000;

/// Ingestion progress callback: `(quads seen, quads per second)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, f64);

/// Low level storage primitives.
pub struct QuadStorage {
    db: Db,
    term_to_id: SubDb,
    id_to_term: SubDb,
    quads: SubDb,
    full_indexes: SubDb,
    graphs: SubDb,
    stats: SubDb,
    prefixes: SubDb,
    pub(crate) characteristic_sets: SubDb,
    pub(crate) type_sets: SubDb,
    indexes: RwLock<Vec<(Permutation, SubDb)>>,
}

impl QuadStorage {
    /// Opens the store, creating it when `create` is set. Returns `Ok(None)`
    /// when the environment does not exist and `create` is not set.
    pub fn open(
        path: &Path,
        config: &DbConfig,
        create: bool,
    ) -> Result<Option<Self>, StorageError> {
        let Some(db) = Db::open(path, config, create)? else {
            return Ok(None);
        };
        let handles = db.write(|txn| {
            Ok([
                db.create_sub_db(txn, TERM_TO_ID)?,
                db.create_sub_db(txn, ID_TO_TERM)?,
                db.create_sub_db(txn, QUADS)?,
                db.create_sub_db(txn, FULL_INDEXES)?,
                db.create_sub_db(txn, GRAPHS)?,
                db.create_sub_db(txn, STATS)?,
                db.create_sub_db(txn, PREFIXES)?,
                db.create_sub_db(txn, CHARACTERISTIC_SETS)?,
                db.create_sub_db(txn, TYPE_SETS)?,
            ])
        })?;
        let [term_to_id, id_to_term, quads, full_indexes, graphs, stats, prefixes, characteristic_sets, type_sets] =
            handles;
        let storage = Self {
            db,
            term_to_id,
            id_to_term,
            quads,
            full_indexes,
            graphs,
            stats,
            prefixes,
            characteristic_sets,
            type_sets,
            indexes: RwLock::new(Vec::new()),
        };
        let initialized = storage
            .db
            .read(|txn| storage.stats.contains(txn, VERSION_KEY))?;
        if !initialized {
            if !create {
                return Err(StorageError::NotFound(format!(
                    "Diomede metadata in {}",
                    path.display()
                )));
            }
            storage.initialize()?;
        }
        storage.reload_indexes()?;
        Ok(Some(storage))
    }

    fn initialize(&self) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.stats
                .put(txn, VERSION_KEY, env!("CARGO_PKG_VERSION").as_bytes())?;
            self.set_counter(txn, NEXT_TERM_ID, 1)?;
            self.set_counter(txn, NEXT_QUAD_ID, 1)?;
            let permutation = Permutation::from_name(DEFAULT_PERMUTATION)
                .ok_or_else(|| StorageError::Index(DEFAULT_PERMUTATION.to_owned()))?;
            self.db.create_sub_db(txn, DEFAULT_PERMUTATION)?;
            self.full_indexes.put(
                txn,
                DEFAULT_PERMUTATION.as_bytes(),
                &stored_order_bytes(&permutation),
            )?;
            self.touch(txn, &[LAST_MODIFIED, INDEX_LAST_MODIFIED])?;
            Ok(())
        })
    }

    /// Reads the permutation catalogue and opens one handle per index.
    /// The in-memory list keeps the catalogue's lexicographic order, which
    /// is the documented tie-break order of the planner.
    fn reload_indexes(&self) -> Result<(), StorageError> {
        let entries = self.db.read(|txn| {
            let mut permutations = Vec::new();
            self.full_indexes.for_each(txn, |key, value| {
                let name = std::str::from_utf8(key)
                    .map_err(CodecError::from)?
                    .to_owned();
                let permutation =
                    Permutation::from_stored(&decode_u64s(value)?).ok_or_else(|| {
                        StorageError::Index(format!("invalid permutation record for {name}"))
                    })?;
                if permutation.name() != name {
                    return Err(StorageError::Index(format!(
                        "permutation record for {name} names {}",
                        permutation.name()
                    )));
                }
                permutations.push(permutation);
                Ok(())
            })?;
            let mut entries = Vec::with_capacity(permutations.len());
            for permutation in permutations {
                let index = self.db.open_sub_db(txn, permutation.name())?.ok_or_else(|| {
                    StorageError::Index(format!(
                        "missing sub-database for index {}",
                        permutation.name()
                    ))
                })?;
                entries.push((permutation, index));
            }
            Ok(entries)
        })?;
        *self.indexes.write().unwrap() = entries;
        Ok(())
    }

    pub(crate) fn index_snapshot(&self) -> Vec<(Permutation, SubDb)> {
        self.indexes.read().unwrap().clone()
    }

    // Dictionary

    /// The dictionary key of a term: SHA-256 of its stable encoding.
    pub fn term_hash(term: &Term) -> [u8; 32] {
        Sha256::digest(encode_term(term)).into()
    }

    pub(crate) fn term_id_in(
        &self,
        txn: &RoTxn<'_>,
        term: &Term,
    ) -> Result<Option<u64>, StorageError> {
        let hash = Self::term_hash(term);
        match self.term_to_id.get(txn, &hash)? {
            Some(bytes) => Ok(Some(decode_u64(bytes)?)),
            None => Ok(None),
        }
    }

    /// The id of an interned term, if present.
    pub fn term_id(&self, term: &Term) -> Result<Option<u64>, StorageError> {
        self.db.read(|txn| self.term_id_in(txn, term))
    }

    pub(crate) fn term_in(&self, txn: &RoTxn<'_>, id: u64) -> Result<Option<Term>, StorageError> {
        match self.id_to_term.get(txn, &id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_term(bytes)?)),
            None => Ok(None),
        }
    }

    /// The term bound to an id, if assigned.
    pub fn term(&self, id: u64) -> Result<Option<Term>, StorageError> {
        self.db.read(|txn| self.term_in(txn, id))
    }

    /// Materializes a batch of ids under one short read transaction, in
    /// input order. A missing id means the dictionary lost a binding.
    pub(crate) fn terms_for_ids(&self, ids: &[u64]) -> Result<Vec<Term>, StorageError> {
        self.db.read(|txn| {
            let mut terms = Vec::with_capacity(ids.len());
            for &id in ids {
                let term = self
                    .term_in(txn, id)?
                    .ok_or_else(|| StorageError::NotFound(format!("term id {id}")))?;
                terms.push(term);
            }
            Ok(terms)
        })
    }

    fn intern_term(
        &self,
        txn: &mut RwTxn<'_>,
        term: &Term,
        next_term_id: &mut u64,
        created: &mut bool,
    ) -> Result<u64, StorageError> {
        let encoded = encode_term(term);
        let hash: [u8; 32] = Sha256::digest(&encoded).into();
        if let Some(bytes) = self.term_to_id.get(txn, &hash)? {
            return Ok(decode_u64(bytes)?);
        }
        let id = *next_term_id;
        *next_term_id += 1;
        *created = true;
        self.term_to_id.put(txn, &hash, &id.to_be_bytes())?;
        self.id_to_term.put(txn, &id.to_be_bytes(), &encoded)?;
        Ok(id)
    }

    /// All `(id, term)` dictionary rows in id order.
    pub fn terms(&self) -> Result<Vec<(u64, Term)>, StorageError> {
        self.db.read(|txn| {
            let mut terms = Vec::new();
            self.id_to_term.for_each(txn, |key, value| {
                terms.push((decode_u64(key)?, decode_term(value)?));
                Ok(())
            })?;
            Ok(terms)
        })
    }

    /// All `(hash, id)` dictionary rows in hash order.
    pub fn term_hashes(&self) -> Result<Vec<([u8; 32], u64)>, StorageError> {
        self.db.read(|txn| {
            let mut hashes = Vec::new();
            self.term_to_id.for_each(txn, |key, value| {
                let hash: [u8; 32] = key.try_into().map_err(|_| CodecError::Length {
                    expected: 32,
                    found: key.len(),
                })?;
                hashes.push((hash, decode_u64(value)?));
                Ok(())
            })?;
            Ok(hashes)
        })
    }

    /// Number of interned terms.
    pub fn term_count(&self) -> Result<u64, StorageError> {
        self.db.read(|txn| self.id_to_term.len(txn))
    }

    // Counters and timestamps

    fn counter(&self, txn: &RoTxn<'_>, key: &[u8]) -> Result<u64, StorageError> {
        Ok(match self.stats.get(txn, key)? {
            Some(bytes) => decode_u64(bytes)?,
            None => 1,
        })
    }

    fn set_counter(&self, txn: &mut RwTxn<'_>, key: &[u8], value: u64) -> Result<(), StorageError> {
        self.stats.put(txn, key, &value.to_be_bytes())
    }

    fn now_stamp() -> Result<String, StorageError> {
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| CodecError::msg(format!("cannot format timestamp: {e}")).into())
    }

    /// Writes the current instant under each key, inside the caller's
    /// transaction so the stamp is atomic with the change it describes.
    fn touch(&self, txn: &mut RwTxn<'_>, keys: &[&str]) -> Result<(), StorageError> {
        let stamp = Self::now_stamp()?;
        for key in keys {
            self.stats.put(txn, key.as_bytes(), stamp.as_bytes())?;
        }
        Ok(())
    }

    pub(crate) fn stat_timestamp(
        &self,
        txn: &RoTxn<'_>,
        key: &str,
    ) -> Result<Option<OffsetDateTime>, StorageError> {
        let Some(bytes) = self.stats.get(txn, key.as_bytes())? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(bytes).map_err(CodecError::from)?;
        OffsetDateTime::parse(text, &Rfc3339)
            .map(Some)
            .map_err(|e| CodecError::msg(format!("invalid timestamp {text:?}: {e}")).into())
    }

    /// The store version derived from `Last-Modified`, as Unix seconds.
    pub fn effective_version(&self) -> Result<Option<u64>, StorageError> {
        self.db.read(|txn| {
            Ok(self
                .stat_timestamp(txn, LAST_MODIFIED)?
                .map(|t| t.unix_timestamp().max(0) as u64))
        })
    }

    /// The free-form `meta` value.
    pub fn meta(&self) -> Result<Option<String>, StorageError> {
        self.db.read(|txn| {
            Ok(self
                .stats
                .get(txn, META_KEY)?
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        })
    }

    pub fn set_meta(&self, value: &str) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.stats.put(txn, META_KEY, value.as_bytes())?;
            self.touch(txn, &[LAST_MODIFIED])
        })
    }

    /// All `stats` rows rendered for display; counters print as integers.
    pub fn stats_entries(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.db.read(|txn| {
            let mut entries = Vec::new();
            self.stats.for_each(txn, |key, value| {
                let key = String::from_utf8_lossy(key).into_owned();
                let value = if key.starts_with("next_unassigned") {
                    decode_u64(value)?.to_string()
                } else {
                    String::from_utf8_lossy(value).into_owned()
                };
                entries.push((key, value));
                Ok(())
            })?;
            Ok(entries)
        })
    }

    // Ingestion

    /// Loads a batch of quads in one write transaction.
    ///
    /// Terms are interned with deduplication; quads whose four terms all
    /// pre-existed are checked against the store, and the batch itself is
    /// deduplicated by id-tuple. Returns the number of quads inserted.
    /// The version tag stamps `Last-Modified` (Unix seconds);
    /// `Quads-Last-Modified` gets the current instant.
    pub fn load<I>(
        &self,
        version: u64,
        quads: I,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = Quad>,
    {
        let indexes = self.index_snapshot();
        self.db.write(|txn| {
            let mut next_term_id = self.counter(txn, NEXT_TERM_ID)?;
            let mut next_quad_id = self.counter(txn, NEXT_QUAD_ID)?;
            let started = Instant::now();
            let mut seen = 0u64;
            let mut pending: Vec<([u64; 4], bool)> = Vec::new();
            let mut pending_graphs: HashSet<u64> = HashSet::new();
            for quad in quads {
                let mut tuple = [0u64; 4];
                let mut created = false;
                let mut dropped = false;
                for (slot, term) in quad.positions().into_iter().enumerate() {
                    match self.intern_term(txn, term, &mut next_term_id, &mut created) {
                        Ok(id) => tuple[slot] = id,
                        Err(StorageError::Codec(error)) => {
                            warn!(quad = %quad, error = %error, "dropping quad whose term does not encode");
                            dropped = true;
                            break;
                        }
                        Err(error) => return Err(error),
                    }
                }
                if dropped {
                    continue;
                }
                pending_graphs.insert(tuple[3]);
                // A quad made only of pre-existing terms may already be
                // stored; anything with a fresh term cannot be.
                pending.push((tuple, !created));
                seen += 1;
                if seen % PROGRESS_EVERY == 0 {
                    let rate = seen as f64 / started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);
                    match progress.as_deref_mut() {
                        Some(callback) => callback(seen, rate),
                        None => debug!(count = seen, rate, "ingesting quads"),
                    }
                }
            }
            let mut in_batch: HashSet<[u64; 4]> = HashSet::with_capacity(pending.len());
            let mut fresh: Vec<[u64; 4]> = Vec::with_capacity(pending.len());
            for (tuple, needs_check) in pending {
                if !in_batch.insert(tuple) {
                    continue;
                }
                if needs_check && plan::quad_exists(&self.quads, &indexes, txn, &tuple)? {
                    continue;
                }
                fresh.push(tuple);
            }
            for graph in &pending_graphs {
                self.graphs.put(txn, &graph.to_be_bytes(), &[])?;
            }
            self.set_counter(txn, NEXT_TERM_ID, next_term_id)?;
            let inserted = fresh.len() as u64;
            for tuple in fresh {
                let qid = next_quad_id;
                next_quad_id += 1;
                self.quads
                    .put(txn, &qid.to_be_bytes(), &encode_id_tuple(&tuple))?;
                for (permutation, index) in &indexes {
                    index.put(txn, &permutation.key(&tuple), &qid.to_be_bytes())?;
                }
            }
            self.set_counter(txn, NEXT_QUAD_ID, next_quad_id)?;
            if inserted > 0 {
                self.stats.put(
                    txn,
                    QUADS_LAST_MODIFIED.as_bytes(),
                    Self::now_stamp()?.as_bytes(),
                )?;
                self.stats.put(
                    txn,
                    LAST_MODIFIED.as_bytes(),
                    version_stamp(version)?.as_bytes(),
                )?;
            }
            Ok(inserted)
        })
    }

    // Pattern access

    /// Resolves a term-level pattern to ids; `None` when a bound term is
    /// not in the dictionary, in which case nothing can match.
    pub(crate) fn resolve_pattern(
        &self,
        txn: &RoTxn<'_>,
        pattern: &QuadPattern,
    ) -> Result<Option<IdPattern>, StorageError> {
        let mut ids: IdPattern = [None; 4];
        for (slot, position) in pattern.positions().into_iter().enumerate() {
            if let Some(term) = position.as_term() {
                match self.term_id_in(txn, term)? {
                    Some(id) => ids[slot] = Some(id),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(ids))
    }

    /// The id-tuples of all quads matching the pattern, materialized under
    /// one short read transaction.
    pub fn quad_ids_matching(&self, pattern: &QuadPattern) -> Result<Vec<[u64; 4]>, StorageError> {
        let repeated = pattern.repeated_variables();
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let Some(ids) = self.resolve_pattern(txn, pattern)? else {
                return Ok(Vec::new());
            };
            let mut tuples = Vec::new();
            plan::for_each_match(&self.quads, &indexes, txn, &ids, &repeated, &mut |tuple, _| {
                tuples.push(tuple);
                Ok(())
            })?;
            Ok(tuples)
        })
    }

    /// Counts matching quads, short-circuiting to a range count whenever
    /// the pattern allows it.
    pub fn count_matching(&self, pattern: &QuadPattern) -> Result<u64, StorageError> {
        let repeated = pattern.repeated_variables();
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let Some(ids) = self.resolve_pattern(txn, pattern)? else {
                return Ok(0);
            };
            plan::count_matches(&self.quads, &indexes, txn, &ids, &repeated)
        })
    }

    /// Matching id-tuples delivered in the key order of the named
    /// permutation, which must be active.
    pub fn quad_ids_ordered(
        &self,
        pattern: &QuadPattern,
        order: &str,
    ) -> Result<Vec<[u64; 4]>, StorageError> {
        let repeated = pattern.repeated_variables();
        let indexes = self.index_snapshot();
        let (permutation, index) = indexes
            .iter()
            .find(|(p, _)| p.name() == order)
            .ok_or_else(|| StorageError::Index(format!("permutation index {order} is not active")))?;
        self.db.read(|txn| {
            let Some(ids) = self.resolve_pattern(txn, pattern)? else {
                return Ok(Vec::new());
            };
            let mut tuples = Vec::new();
            plan::scan_index(permutation, index, txn, &ids, &repeated, &mut |tuple, _| {
                tuples.push(tuple);
                Ok(())
            })?;
            Ok(tuples)
        })
    }

    /// The natural result orderings for a pattern: every max-score
    /// permutation, stripped of the bound prefix it covers.
    pub fn available_orders(&self, pattern: &QuadPattern) -> Result<Vec<String>, StorageError> {
        let bound = [
            pattern.subject.as_term().is_some(),
            pattern.predicate.as_term().is_some(),
            pattern.object.as_term().is_some(),
            pattern.graph.as_term().is_some(),
        ];
        Ok(plan::available_orders(&self.index_snapshot(), &bound))
    }

    /// The name of the best index for a set of bound positions, if any
    /// index is active. Ties break to the lexicographically first name.
    pub fn best_index_name(&self, bound: &[bool; 4]) -> Option<String> {
        plan::best_index(&self.index_snapshot(), bound).map(|(p, _)| p.name().to_owned())
    }

    /// Number of stored quads.
    pub fn len(&self) -> Result<u64, StorageError> {
        self.db.read(|txn| self.quads.len(txn))
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    // Permutation indexes

    /// Names of the active permutation indexes, in catalogue order.
    pub fn full_index_names(&self) -> Vec<String> {
        self.index_snapshot()
            .iter()
            .map(|(p, _)| p.name().to_owned())
            .collect()
    }

    /// Builds a permutation index: streams the quad table under a read
    /// snapshot, sorts the permuted keys, then creates the sub-database and
    /// bulk-appends in a write scope. A no-op when the index is active.
    pub fn add_full_index(&self, name: &str) -> Result<(), StorageError> {
        let permutation = Permutation::from_name(name)
            .ok_or_else(|| StorageError::Index(format!("{name} is not a spog permutation")))?;
        if self
            .indexes
            .read()
            .unwrap()
            .iter()
            .any(|(p, _)| p.name() == name)
        {
            return Ok(());
        }
        let mut pairs = self.db.read(|txn| {
            let mut pairs = Vec::new();
            self.quads.for_each(txn, |key, value| {
                let tuple = decode_id_tuple(value)?;
                pairs.push((permutation.key(&tuple).to_vec(), key.to_vec()));
                Ok(())
            })?;
            Ok(pairs)
        })?;
        pairs.sort_unstable();
        let index = self.db.write(|txn| {
            let index = self.db.create_sub_db(txn, name)?;
            index.clear(txn)?;
            index.bulk_put_sorted(txn, &pairs)?;
            self.full_indexes
                .put(txn, name.as_bytes(), &stored_order_bytes(&permutation))?;
            self.touch(txn, &[INDEX_LAST_MODIFIED])?;
            Ok(index)
        })?;
        let mut indexes = self.indexes.write().unwrap();
        if !indexes.iter().any(|(p, _)| p.name() == name) {
            indexes.push((permutation, index));
            indexes.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        }
        Ok(())
    }

    /// Drops a permutation index: clears its sub-database and deletes the
    /// catalogue row.
    pub fn drop_full_index(&self, name: &str) -> Result<(), StorageError> {
        let mut indexes = self.indexes.write().unwrap();
        let position = indexes
            .iter()
            .position(|(p, _)| p.name() == name)
            .ok_or_else(|| StorageError::Index(format!("permutation index {name} is not active")))?;
        let index = indexes[position].1.clone();
        self.db.write(|txn| {
            index.clear(txn)?;
            self.full_indexes.delete(txn, name.as_bytes())?;
            self.touch(txn, &[INDEX_LAST_MODIFIED])?;
            Ok(())
        })?;
        indexes.remove(position);
        Ok(())
    }

    // Graphs

    /// Ids of all graphs appearing in any quad.
    pub fn graph_ids(&self) -> Result<Vec<u64>, StorageError> {
        self.db.read(|txn| {
            let mut ids = Vec::new();
            self.graphs.for_each(txn, |key, _| {
                ids.push(decode_u64(key)?);
                Ok(())
            })?;
            Ok(ids)
        })
    }

    /// Distinct ids of the terms appearing in any quad of the graph.
    pub fn graph_term_ids(&self, graph: &Term) -> Result<Vec<u64>, StorageError> {
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let Some(graph_id) = self.term_id_in(txn, graph)? else {
                return Ok(Vec::new());
            };
            let pattern: IdPattern = [None, None, None, Some(graph_id)];
            let mut ids: HashSet<u64> = HashSet::new();
            plan::for_each_match(&self.quads, &indexes, txn, &pattern, &[], &mut |tuple, _| {
                ids.extend(tuple);
                Ok(())
            })?;
            let mut ids: Vec<u64> = ids.into_iter().collect();
            ids.sort_unstable();
            Ok(ids)
        })
    }

    /// Removes every quad of the graph from the quad table and all indexes,
    /// then the graph-set row. Interned terms stay: id bindings are
    /// immutable even when orphaned. Returns whether the graph existed.
    pub fn drop_graph(&self, graph: &Term) -> Result<bool, StorageError> {
        let indexes = self.index_snapshot();
        self.db.write(|txn| {
            let Some(graph_id) = self.term_id_in(txn, graph)? else {
                return Ok(false);
            };
            if !self.graphs.contains(txn, &graph_id.to_be_bytes())? {
                return Ok(false);
            }
            let pattern: IdPattern = [None, None, None, Some(graph_id)];
            let mut rows: Vec<([u64; 4], u64)> = Vec::new();
            plan::for_each_match(&self.quads, &indexes, txn, &pattern, &[], &mut |tuple, qid| {
                rows.push((tuple, qid));
                Ok(())
            })?;
            for (tuple, qid) in rows {
                self.quads.delete(txn, &qid.to_be_bytes())?;
                for (permutation, index) in &indexes {
                    index.delete(txn, &permutation.key(&tuple))?;
                }
            }
            self.graphs.delete(txn, &graph_id.to_be_bytes())?;
            self.touch(txn, &[LAST_MODIFIED, QUADS_LAST_MODIFIED])?;
            Ok(true)
        })
    }

    // Prefixes

    /// Binds a prefix label to a namespace IRI.
    pub fn set_prefix(&self, label: &str, iri: &str) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.prefixes.put(txn, label.as_bytes(), iri.as_bytes())?;
            self.touch(txn, &[PREFIXES_LAST_MODIFIED])
        })
    }

    pub fn remove_prefix(&self, label: &str) -> Result<bool, StorageError> {
        self.db.write(|txn| {
            let removed = self.prefixes.delete(txn, label.as_bytes())?;
            if removed {
                self.touch(txn, &[PREFIXES_LAST_MODIFIED])?;
            }
            Ok(removed)
        })
    }

    pub fn clear_prefixes(&self) -> Result<(), StorageError> {
        self.db.write(|txn| {
            self.prefixes.clear(txn)?;
            self.touch(txn, &[PREFIXES_LAST_MODIFIED])
        })
    }

    pub fn prefixes(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.db.read(|txn| {
            let mut entries = Vec::new();
            self.prefixes.for_each(txn, |key, value| {
                entries.push((
                    String::from_utf8_lossy(key).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                ));
                Ok(())
            })?;
            Ok(entries)
        })
    }

    // Verification

    /// Full integrity scan: quad-table uniqueness, per-index entry counts,
    /// and the exact mirroring of every quad in every active index.
    pub fn verify(&self) -> Result<(), StorageError> {
        let indexes = self.index_snapshot();
        self.db.read(|txn| {
            let quad_count = self.quads.len(txn)?;
            for (permutation, index) in &indexes {
                let index_entries = index.len(txn)?;
                if index_entries != quad_count {
                    return Err(StorageError::Count {
                        name: permutation.name().to_owned(),
                        index_entries,
                        quad_entries: quad_count,
                    });
                }
            }
            let mut seen: HashSet<[u64; 4]> = HashSet::with_capacity(quad_count as usize);
            self.quads.for_each(txn, |key, value| {
                let qid = decode_u64(key)?;
                let tuple = decode_id_tuple(value)?;
                if !seen.insert(tuple) {
                    return Err(StorageError::UniqueConstraint(tuple));
                }
                for (permutation, index) in &indexes {
                    let matches = match index.get(txn, &permutation.key(&tuple))? {
                        Some(stored) => decode_u64(stored)? == qid,
                        None => false,
                    };
                    if !matches {
                        return Err(StorageError::Index(format!(
                            "index {} disagrees with quad {qid}",
                            permutation.name()
                        )));
                    }
                }
                Ok(())
            })
        })
    }
}

fn stored_order_bytes(permutation: &Permutation) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32);
    for value in permutation.stored_order() {
        write_u64(&mut bytes, value);
    }
    bytes
}

fn version_stamp(version: u64) -> Result<String, StorageError> {
    let instant = OffsetDateTime::from_unix_timestamp(i64::try_from(version).unwrap_or(i64::MAX))
        .map_err(|e| CodecError::msg(format!("version {version} is out of range: {e}")))?;
    instant
        .format(&Rfc3339)
        .map_err(|e| CodecError::msg(format!("cannot format version stamp: {e}")).into())
}
