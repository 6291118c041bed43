//! LMDB environment and sub-database handles through the heed binding.

use crate::storage::error::StorageError;
use heed::types::{Bytes, DecodeIgnore, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions, PutFlags, RoTxn, RwTxn};
use std::fs;
use std::ops::Bound;
use std::path::Path;

/// Configuration of the on-disk environment.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Maximum size of the memory map in bytes.
    pub map_size: usize,
    /// Maximum number of named sub-databases.
    pub max_sub_databases: u32,
    /// Skip fsync on commit. Durability moves to the OS but a crash cannot
    /// corrupt the database.
    pub no_sync: bool,
    /// POSIX permissions applied to the data and lock files.
    pub file_mode: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            map_size: 4 * 1024 * 1024 * 1024,
            max_sub_databases: 256,
            no_sync: true,
            file_mode: 0o640,
        }
    }
}

/// A handle on an LMDB environment.
///
/// The handle is cheap to clone and shared between threads. The environment
/// permits many concurrent MVCC readers and a single writer; both are scoped
/// through [`Db::read`] and [`Db::write`].
#[derive(Clone)]
pub struct Db {
    env: Env,
}

impl Db {
    /// Opens the environment at `path`, creating the directory when `create`
    /// is set. Returns `Ok(None)` when the environment does not exist and
    /// `create` is not set.
    pub fn open(path: &Path, config: &DbConfig, create: bool) -> Result<Option<Self>, StorageError> {
        if create {
            fs::create_dir_all(path).map_err(|e| StorageError::Open(heed::Error::Io(e)))?;
        } else if !path.join("data.mdb").is_file() {
            return Ok(None);
        }
        let mut options = EnvOpenOptions::new();
        options
            .map_size(config.map_size)
            .max_dbs(config.max_sub_databases);
        if config.no_sync {
            // SAFETY: NO_SYNC only weakens durability; it cannot cause
            // undefined behavior or database corruption.
            #[allow(unsafe_code)]
            unsafe {
                options.flags(EnvFlags::NO_SYNC);
            }
        }
        // SAFETY: opening an environment memory-maps the data file. The
        // caller must not open the same path twice in one process; the store
        // layer owns the path for the lifetime of the handle.
        #[allow(unsafe_code)]
        let env = unsafe { options.open(path) }.map_err(StorageError::Open)?;
        apply_file_mode(path, config.file_mode);
        Ok(Some(Self { env }))
    }

    /// Runs `f` inside a read transaction.
    ///
    /// The snapshot is released on every exit path: read transactions are
    /// committed (cost-free) so they stop pinning old pages promptly.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&RoTxn<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let txn = self.env.read_txn().map_err(StorageError::Transaction)?;
        let result = f(&txn);
        txn.commit().map_err(StorageError::Transaction)?;
        result
    }

    /// Runs `f` inside the write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts when it returns `Err`; on abort
    /// no sub-database is left modified.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut RwTxn<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut txn = self.env.write_txn().map_err(StorageError::Transaction)?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit().map_err(StorageError::Transaction)?;
                Ok(value)
            }
            Err(error) => {
                txn.abort();
                Err(error)
            }
        }
    }

    /// Opens the named sub-database, creating it when absent.
    pub fn create_sub_db(&self, txn: &mut RwTxn<'_>, name: &str) -> Result<SubDb, StorageError> {
        let db = self
            .env
            .create_database::<Bytes, Bytes>(txn, Some(name))
            .map_err(StorageError::Open)?;
        Ok(SubDb {
            db,
            name: name.to_owned(),
        })
    }

    /// Opens the named sub-database if it exists.
    pub fn open_sub_db(&self, txn: &RoTxn<'_>, name: &str) -> Result<Option<SubDb>, StorageError> {
        Ok(self
            .env
            .open_database::<Bytes, Bytes>(txn, Some(name))
            .map_err(StorageError::Open)?
            .map(|db| SubDb {
                db,
                name: name.to_owned(),
            }))
    }

    /// Lists the names of all sub-databases.
    ///
    /// LMDB keeps them as the keys of the unnamed root database.
    pub fn list_sub_dbs(&self, txn: &RoTxn<'_>) -> Result<Vec<String>, StorageError> {
        let Some(root) = self
            .env
            .open_database::<Str, DecodeIgnore>(txn, None)
            .map_err(StorageError::Open)?
        else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for entry in root.iter(txn).map_err(StorageError::from)? {
            let (name, ()) = entry.map_err(StorageError::from)?;
            names.push(name.to_owned());
        }
        Ok(names)
    }
}

#[cfg(unix)]
fn apply_file_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    for file in ["data.mdb", "lock.mdb"] {
        let _unused: Result<(), _> =
            fs::set_permissions(path.join(file), fs::Permissions::from_mode(mode));
    }
}

#[cfg(not(unix))]
fn apply_file_mode(_path: &Path, _mode: u32) {}

/// A named sub-database holding raw byte keys and values in lexicographic
/// key order.
#[derive(Clone)]
pub struct SubDb {
    db: Database<Bytes, Bytes>,
    name: String,
}

impl SubDb {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point get. The returned slice borrows from the transaction.
    pub fn get<'t>(
        &self,
        txn: &'t RoTxn<'_>,
        key: &[u8],
    ) -> Result<Option<&'t [u8]>, StorageError> {
        self.db.get(txn, key).map_err(StorageError::from)
    }

    /// Inserts or overwrites.
    pub fn put(&self, txn: &mut RwTxn<'_>, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(txn, key, value).map_err(StorageError::from)
    }

    /// Removes a key; reports whether it was present.
    pub fn delete(&self, txn: &mut RwTxn<'_>, key: &[u8]) -> Result<bool, StorageError> {
        self.db.delete(txn, key).map_err(StorageError::from)
    }

    pub fn contains(&self, txn: &RoTxn<'_>, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(txn, key)?.is_some())
    }

    /// Number of entries.
    pub fn len(&self, txn: &RoTxn<'_>) -> Result<u64, StorageError> {
        self.db.len(txn).map_err(StorageError::from)
    }

    /// Bytes of B-tree pages in use.
    pub fn byte_size(&self, txn: &RoTxn<'_>) -> Result<u64, StorageError> {
        let stat = self.db.stat(txn).map_err(StorageError::from)?;
        let pages = stat.branch_pages + stat.leaf_pages + stat.overflow_pages;
        Ok(pages as u64 * u64::from(stat.page_size))
    }

    /// Removes every entry but keeps the sub-database itself.
    pub fn clear(&self, txn: &mut RwTxn<'_>) -> Result<(), StorageError> {
        self.db.clear(txn).map_err(StorageError::from)
    }

    /// Iterates all entries in key order, lending zero-copy slices whose
    /// lifetime ends with the callback. Returning an error cancels the
    /// iteration and propagates.
    pub fn for_each(
        &self,
        txn: &RoTxn<'_>,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        for entry in self.db.iter(txn).map_err(StorageError::from)? {
            let (key, value) = entry.map_err(StorageError::from)?;
            f(key, value)?;
        }
        Ok(())
    }

    /// Iterates `[lower, upper)` — or `[lower, upper]` with `inclusive`, or
    /// from `lower` to the end of the sub-database when `upper` is `None`.
    pub fn for_each_in_range(
        &self,
        txn: &RoTxn<'_>,
        lower: &[u8],
        upper: Option<&[u8]>,
        inclusive: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let range = bounds(lower, upper, inclusive);
        for entry in self.db.range(txn, &range).map_err(StorageError::from)? {
            let (key, value) = entry.map_err(StorageError::from)?;
            f(key, value)?;
        }
        Ok(())
    }

    /// Materializing flavor of [`Self::for_each`]: copies each entry into
    /// owned buffers usable across transaction boundaries.
    pub fn entries(&self, txn: &RoTxn<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        self.for_each(txn, |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(entries)
    }

    /// Counts the entries of a range without decoding values.
    pub fn count_in_range(
        &self,
        txn: &RoTxn<'_>,
        lower: &[u8],
        upper: Option<&[u8]>,
        inclusive: bool,
    ) -> Result<u64, StorageError> {
        let range = bounds(lower, upper, inclusive);
        let mut count = 0;
        for entry in self
            .db
            .remap_data_type::<DecodeIgnore>()
            .range(txn, &range)
            .map_err(StorageError::from)?
        {
            entry.map_err(StorageError::from)?;
            count += 1;
        }
        Ok(count)
    }

    /// Appends pre-sorted pairs. The caller must present keys in strictly
    /// ascending order past the current last key; used only when building a
    /// fresh index.
    pub fn bulk_put_sorted(
        &self,
        txn: &mut RwTxn<'_>,
        pairs: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), StorageError> {
        for (key, value) in pairs {
            self.db
                .put_with_flags(txn, PutFlags::APPEND, key, value)
                .map_err(StorageError::from)?;
        }
        Ok(())
    }
}

fn bounds<'a>(
    lower: &'a [u8],
    upper: Option<&'a [u8]>,
    inclusive: bool,
) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    let upper = match upper {
        None => Bound::Unbounded,
        Some(upper) if inclusive => Bound::Included(upper),
        Some(upper) => Bound::Excluded(upper),
    };
    (Bound::Included(lower), upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, Db, SubDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path(), &DbConfig::default(), true)
            .unwrap()
            .unwrap();
        let sub = db.write(|txn| db.create_sub_db(txn, "test")).unwrap();
        (dir, db, sub)
    }

    #[test]
    fn missing_environment_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(Db::open(&missing, &DbConfig::default(), false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn put_get_delete() {
        let (_dir, db, sub) = scratch();
        db.write(|txn| sub.put(txn, b"k", b"v")).unwrap();
        db.read(|txn| {
            assert_eq!(sub.get(txn, b"k")?, Some(&b"v"[..]));
            assert!(sub.contains(txn, b"k")?);
            assert_eq!(sub.len(txn)?, 1);
            Ok(())
        })
        .unwrap();
        assert!(db.write(|txn| sub.delete(txn, b"k")).unwrap());
        db.read(|txn| {
            assert_eq!(sub.get(txn, b"k")?, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn failed_write_rolls_back() {
        let (_dir, db, sub) = scratch();
        let result: Result<(), StorageError> = db.write(|txn| {
            sub.put(txn, b"k", b"v")?;
            Err(StorageError::NotFound("deliberate".into()))
        });
        assert!(result.is_err());
        db.read(|txn| {
            assert_eq!(sub.len(txn)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn range_scan_is_lexicographic_and_exclusive() {
        let (_dir, db, sub) = scratch();
        db.write(|txn| {
            for key in [&b"a"[..], b"b", b"c", b"d"] {
                sub.put(txn, key, b"")?;
            }
            Ok(())
        })
        .unwrap();
        db.read(|txn| {
            let mut seen = Vec::new();
            sub.for_each_in_range(txn, b"b", Some(b"d"), false, |key, _| {
                seen.push(key.to_vec());
                Ok(())
            })?;
            assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
            assert_eq!(sub.count_in_range(txn, b"b", Some(b"d"), true)?, 3);
            assert_eq!(sub.count_in_range(txn, b"b", None, false)?, 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn list_sub_dbs_reports_names() {
        let (_dir, db, _sub) = scratch();
        db.write(|txn| {
            db.create_sub_db(txn, "other")?;
            Ok(())
        })
        .unwrap();
        let names = db.read(|txn| db.list_sub_dbs(txn)).unwrap();
        assert!(names.contains(&"test".to_owned()));
        assert!(names.contains(&"other".to_owned()));
    }
}
