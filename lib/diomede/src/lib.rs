//! Diomede is an embedded, transactional RDF quadstore.
//!
//! Quads — (subject, predicate, object, graph) tuples of RDF terms — live in
//! a memory-mapped LMDB environment as rows of four 64-bit term ids. A
//! SHA-256-keyed dictionary interns terms once and never deletes them; a
//! configurable set of permutation indexes keys reordered id-tuples so that
//! any quad pattern becomes a prefix range scan on the best matching index;
//! a Characteristic Set index summarizes predicate co-occurrence per graph
//! for star-join cardinality estimation.
//!
//! Usage example:
//! ```
//! use diomede::model::{Quad, QuadPattern, Term, TermPattern};
//! use diomede::store::Store;
//!
//! let dir = tempfile::tempdir()?;
//! let store = Store::open(dir.path())?;
//!
//! let graph = Term::iri("tag:graph");
//! store.load(
//!     0,
//!     [
//!         Quad::new(
//!             Term::iri("http://example.org/s"),
//!             Term::iri("http://example.org/p1"),
//!             Term::string("o"),
//!             graph.clone(),
//!         ),
//!         Quad::new(
//!             Term::iri("http://example.org/s"),
//!             Term::iri("http://example.org/p2"),
//!             Term::integer(7),
//!             graph.clone(),
//!         ),
//!     ],
//! )?;
//!
//! assert_eq!(store.count_quads(&QuadPattern::all())?, 2);
//! store.verify()?;
//! # Result::<_, Box<dyn std::error::Error>>::Ok(())
//! ```

pub mod model;
pub mod storage;
pub mod store;

pub use crate::model::{Quad, QuadPattern, Term, TermPattern, Variable};
pub use crate::storage::backend::DbConfig;
pub use crate::storage::error::{CodecError, StorageError};
pub use crate::store::Store;
