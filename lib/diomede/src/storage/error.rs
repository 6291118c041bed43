use thiserror::Error;

/// A byte sequence in the database did not decode as a term, an integer or
/// an id-tuple of the expected length.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The term encoding starts with an unknown tag byte.
    #[error("unknown term tag byte {0:#04x}")]
    UnknownTag(u8),
    /// The term encoding is missing its `"` separator.
    #[error("term encoding is missing the 0x22 separator")]
    MissingSeparator,
    /// The term encoding is not valid UTF-8.
    #[error("term encoding is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    /// A fixed-width value had the wrong number of bytes.
    #[error("expected {expected} bytes, found {found}")]
    Length {
        expected: usize,
        found: usize,
    },
    #[error("{0}")]
    Msg(String),
}

impl CodecError {
    #[inline]
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        Self::Msg(msg.into())
    }
}

/// An error related to storage operations (reads, writes, verification...).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Stored bytes could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The environment or a sub-database could not be opened.
    #[error("unable to open the storage environment: {0}")]
    Open(#[source] heed::Error),
    /// An underlying read or write failed.
    #[error("storage I/O error: {0}")]
    Io(#[source] heed::Error),
    /// The memory map is exhausted. The caller may enlarge `map_size` and
    /// retry; the failed transaction has been rolled back.
    #[error("the environment memory map is full")]
    MapFull,
    /// A transaction could not be started or committed.
    #[error("transaction failure: {0}")]
    Transaction(#[source] heed::Error),
    /// A term, id or graph the operation requires is absent.
    #[error("{0} was not found")]
    NotFound(String),
    /// A referenced permutation index is not active, or an index entry
    /// disagrees with the quad table.
    #[error("index error: {0}")]
    Index(String),
    /// Verification found two quads with the same id-tuple.
    #[error("two quads share the id-tuple {0:?}")]
    UniqueConstraint([u64; 4]),
    /// Verification found an index whose entry count disagrees with the
    /// quad table.
    #[error("index {name} holds {index_entries} entries, the quad table {quad_entries}")]
    Count {
        name: String,
        index_entries: u64,
        quad_entries: u64,
    },
}

impl From<heed::Error> for StorageError {
    fn from(error: heed::Error) -> Self {
        match error {
            heed::Error::Mdb(heed::MdbError::MapFull) => Self::MapFull,
            error => Self::Io(error),
        }
    }
}
