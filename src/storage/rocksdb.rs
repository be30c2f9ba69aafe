use std::{
    marker::PhantomData,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DB, DBCompactionStyle,
    DBCompressionType, FlushOptions, Options, WriteBatch, WriteOptions,
};

use super::{DataSourceUpdateParts, DataSourceUpdates, StorageError, VirtualDataSource};
use crate::{
    codec::{VirtualKey, VirtualValue},
    hash::{DIGEST_BYTES, Digest},
    merkle::{PATH_KEY_BYTES, Path},
    utils::{Deserializable, Serializable},
};

/// The name of the RocksDB column family used for storing internal node hashes.
const HASHES_CF: &str = "hashes";
/// The name of the RocksDB column family used for storing leaf records by path.
const RECORDS_CF: &str = "records";
/// The name of the RocksDB column family used for storing the key index.
const LEAVES_CF: &str = "leaves";
/// The name of the RocksDB column family used for storing metadata (first and last leaf paths).
const METADATA_CF: &str = "metadata";

const ALL_CFS: [&str; 4] = [HASHES_CF, RECORDS_CF, LEAVES_CF, METADATA_CF];

/// The key used in the `METADATA_CF` column family to store the first leaf path.
const FIRST_LEAF_KEY: &[u8] = b"first_leaf_path";
/// The key used in the `METADATA_CF` column family to store the last leaf path.
const LAST_LEAF_KEY: &[u8] = b"last_leaf_path";

/// A RocksDB-backed persistent data source for a virtual Merkle tree.
///
/// Implements the `VirtualDataSource` trait using one column family per kind of record:
/// - `HASHES_CF` ("hashes"): internal node hashes, keyed by the 9-byte path key.
/// - `RECORDS_CF` ("records"): leaf records keyed by path key; the value is the 32-byte leaf
///   hash followed by the serialized key.
/// - `LEAVES_CF` ("leaves"): the key index, keyed by the serialized key; the value is the path
///   key followed by the serialized value.
/// - `METADATA_CF` ("metadata"): the first and last leaf paths. A missing entry means the tree
///   is empty.
///
/// [`VirtualDataSource::apply`] writes each commit phase as one `WriteBatch`.
#[derive(Debug)]
pub struct RocksDbDataSource<K, V> {
    db: DB,
    closed: AtomicBool,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K: VirtualKey, V: VirtualValue> RocksDbDataSource<K, V> {
    /// Opens or creates a RocksDB database at the configured path and sets up the column
    /// families of a virtual tree.
    ///
    /// # Errors
    /// Returns `StorageError::Backend` if the database cannot be opened or configured,
    /// for example, due to path issues, permissions, or RocksDB internal errors.
    pub fn open(config: RocksDbConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_max_total_wal_size(512 * 1024 * 1024);

        // Shared block cache across all column families
        let cache = Cache::new_lru_cache(config.cache_size);

        // Point lookups dominate: whole-key bloom filters on every table
        let mut table_opts = BlockBasedOptions::default();
        table_opts.set_block_cache(&cache);
        table_opts.set_bloom_filter(10.0, false);
        table_opts.set_whole_key_filtering(true);
        table_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);

        let data_cf = |write_buffer_size: usize| {
            let mut opts = Options::default();
            opts.set_block_based_table_factory(&table_opts);
            opts.set_write_buffer_size(write_buffer_size);
            opts.set_max_write_buffer_number(3);
            opts.set_min_write_buffer_number_to_merge(1);
            opts.set_compaction_style(DBCompactionStyle::Level);
            opts.set_compression_type(DBCompressionType::Lz4);
            opts.set_level_zero_file_num_compaction_trigger(8);
            opts
        };

        let mut metadata_opts = Options::default();
        metadata_opts.set_compression_type(DBCompressionType::None);

        let cfs = vec![
            ColumnFamilyDescriptor::new(HASHES_CF, data_cf(64 << 20)),
            ColumnFamilyDescriptor::new(RECORDS_CF, data_cf(64 << 20)),
            ColumnFamilyDescriptor::new(LEAVES_CF, data_cf(128 << 20)),
            ColumnFamilyDescriptor::new(METADATA_CF, metadata_opts),
        ];

        let db = DB::open_cf_descriptors(&db_opts, &config.path, cfs)?;
        tracing::debug!(path = %config.path.display(), "opened rocksdb data source");

        Ok(Self {
            db,
            closed: AtomicBool::new(false),
            _entries: PhantomData,
        })
    }

    /// Syncs the RocksDB database to disk.
    ///
    /// # Errors
    /// - Returns `StorageError::Backend` if the flush operation fails.
    fn sync(&self) -> Result<(), StorageError> {
        let mut fopts = FlushOptions::default();
        fopts.set_wait(true);

        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            self.db.flush_cf_opt(cf, &fopts)?;
        }

        self.db.flush_wal(true)?;
        Ok(())
    }

    /// Retrieves a handle to a RocksDB column family by its name.
    ///
    /// # Errors
    /// Returns `StorageError::Closed` after [`VirtualDataSource::close`], and
    /// `StorageError::Unsupported` if the column family with the given `name` does not exist.
    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Unsupported(format!("unknown column family `{name}`")))
    }

    /// Returns the key stored in the record at `path`, if any.
    fn record_owner(&self, path: Path) -> Result<Option<K>, StorageError> {
        Ok(self.load_record(path)?.map(|(key, _)| key))
    }

    fn metadata_path(&self, name: &[u8]) -> Result<Option<Path>, StorageError> {
        let cf = self.cf_handle(METADATA_CF)?;
        self.db.get_cf(cf, name)?.map(|bytes| decode_path(&bytes, "leaf path")).transpose()
    }

    fn put_metadata_path(
        &self,
        batch: &mut WriteBatch,
        name: &[u8],
        path: Option<Path>,
    ) -> Result<(), StorageError> {
        let cf = self.cf_handle(METADATA_CF)?;
        match path {
            Some(path) => batch.put_cf(cf, name, path.to_key_bytes()),
            None => batch.delete_cf(cf, name),
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut write_opts = WriteOptions::default();
        // Disable immediate WAL sync to disk for better performance
        write_opts.set_sync(false);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}

impl<K: VirtualKey, V: VirtualValue> VirtualDataSource<K, V> for RocksDbDataSource<K, V> {
    fn load_hash(&self, path: Path) -> Result<Option<Digest>, StorageError> {
        let cf = self.cf_handle(HASHES_CF)?;
        match self.db.get_cf(cf, path.to_key_bytes())? {
            Some(bytes) => Ok(Some(Digest::read_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_hash(&self, path: Path, hash: Digest) -> Result<(), StorageError> {
        let cf = self.cf_handle(HASHES_CF)?;
        self.db.put_cf(cf, path.to_key_bytes(), hash.as_bytes())?;
        Ok(())
    }

    fn delete_hash(&self, path: Path) -> Result<(), StorageError> {
        let cf = self.cf_handle(HASHES_CF)?;
        self.db.delete_cf(cf, path.to_key_bytes())?;
        Ok(())
    }

    /// Record values are `[leaf hash][serialized key]`.
    fn load_record(&self, path: Path) -> Result<Option<(K, Digest)>, StorageError> {
        let cf = self.cf_handle(RECORDS_CF)?;
        let Some(bytes) = self.db.get_cf(cf, path.to_key_bytes())? else {
            return Ok(None);
        };
        if bytes.len() < DIGEST_BYTES {
            return Err(StorageError::BadValueLen {
                what: "leaf record",
                expected: DIGEST_BYTES,
                found: bytes.len(),
            });
        }
        let hash = Digest::read_from_bytes(&bytes[..DIGEST_BYTES])?;
        let key = K::read_from_bytes(&bytes[DIGEST_BYTES..])?;
        Ok(Some((key, hash)))
    }

    fn save_record(&self, path: Path, key: &K, hash: Digest) -> Result<(), StorageError> {
        let cf = self.cf_handle(RECORDS_CF)?;
        self.db.put_cf(cf, path.to_key_bytes(), encode_record(key, hash))?;
        Ok(())
    }

    fn delete_record(&self, path: Path) -> Result<(), StorageError> {
        let cf = self.cf_handle(RECORDS_CF)?;
        self.db.delete_cf(cf, path.to_key_bytes())?;
        Ok(())
    }

    fn load_value_by_key(&self, key: &K) -> Result<Option<V>, StorageError> {
        let cf = self.cf_handle(LEAVES_CF)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(decode_leaf::<V>(&bytes)?.1)),
            None => Ok(None),
        }
    }

    fn load_path_by_key(&self, key: &K) -> Result<Option<Path>, StorageError> {
        let cf = self.cf_handle(LEAVES_CF)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => {
                let prefix = bytes.get(..PATH_KEY_BYTES).unwrap_or(&bytes);
                Ok(Some(decode_path(prefix, "leaf entry")?))
            },
            None => Ok(None),
        }
    }

    fn save_leaf(&self, key: &K, path: Path, value: &V) -> Result<(), StorageError> {
        let cf = self.cf_handle(LEAVES_CF)?;
        self.db.put_cf(cf, key.to_bytes(), encode_leaf(path, value))?;
        Ok(())
    }

    fn delete_leaf(&self, key: &K, path: Path) -> Result<(), StorageError> {
        let leaves_cf = self.cf_handle(LEAVES_CF)?;
        let records_cf = self.cf_handle(RECORDS_CF)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(leaves_cf, key.to_bytes());
        if self.record_owner(path)?.as_ref() == Some(key) {
            batch.delete_cf(records_cf, path.to_key_bytes());
        }
        self.write(batch)
    }

    fn update_path(&self, key: &K, old: Path, new: Path) -> Result<(), StorageError> {
        let leaves_cf = self.cf_handle(LEAVES_CF)?;
        let records_cf = self.cf_handle(RECORDS_CF)?;
        let key_bytes = key.to_bytes();

        let mut batch = WriteBatch::default();
        if let Some(bytes) = self.db.get_cf(leaves_cf, &key_bytes)? {
            let (_, value) = decode_leaf::<V>(&bytes)?;
            batch.put_cf(leaves_cf, &key_bytes, encode_leaf(new, &value));
        }
        if old != new {
            if let Some((owner, hash)) = self.load_record(old)? {
                if &owner == key {
                    batch.delete_cf(records_cf, old.to_key_bytes());
                    batch.put_cf(records_cf, new.to_key_bytes(), encode_record(key, hash));
                }
            }
        }
        self.write(batch)
    }

    fn first_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.metadata_path(FIRST_LEAF_KEY)
    }

    fn write_first_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        self.put_metadata_path(&mut batch, FIRST_LEAF_KEY, path)?;
        self.write(batch)
    }

    fn last_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.metadata_path(LAST_LEAF_KEY)
    }

    fn write_last_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        self.put_metadata_path(&mut batch, LAST_LEAF_KEY, path)?;
        self.write(batch)
    }

    /// Applies the detach, move and attach phases as three `WriteBatch`es.
    ///
    /// Ownership of records is checked against the state left by the previous phase. Within the
    /// move phase every old record is deleted before any moved record is written, so chained
    /// and swapped moves land correctly.
    fn apply(&self, updates: DataSourceUpdates<K, V>) -> Result<(), StorageError> {
        let hashes_cf = self.cf_handle(HASHES_CF)?;
        let records_cf = self.cf_handle(RECORDS_CF)?;
        let leaves_cf = self.cf_handle(LEAVES_CF)?;

        let DataSourceUpdateParts {
            hash_updates,
            removed_leaves,
            moved_leaves,
            leaf_updates,
            first_leaf_path,
            last_leaf_path,
        } = updates.into_parts();

        // detach
        let mut batch = WriteBatch::default();
        for (path, _) in hash_updates.iter().filter(|(_, hash)| hash.is_none()) {
            batch.delete_cf(hashes_cf, path.to_key_bytes());
        }
        for (key, path) in removed_leaves.iter() {
            batch.delete_cf(leaves_cf, key.to_bytes());
            if self.record_owner(*path)?.as_ref() == Some(key) {
                batch.delete_cf(records_cf, path.to_key_bytes());
            }
        }
        self.write(batch)?;

        // move
        let mut deletes = WriteBatch::default();
        let mut puts = Vec::new();
        for (key, (old, new)) in moved_leaves.iter() {
            let key_bytes = key.to_bytes();
            if let Some(bytes) = self.db.get_cf(leaves_cf, &key_bytes)? {
                let (_, value) = decode_leaf::<V>(&bytes)?;
                puts.push((leaves_cf, key_bytes.clone(), encode_leaf(*new, &value)));
            }
            if old == new {
                continue;
            }
            if let Some((owner, hash)) = self.load_record(*old)? {
                if &owner == key {
                    deletes.delete_cf(records_cf, old.to_key_bytes());
                    puts.push((records_cf, new.to_key_bytes().to_vec(), encode_record(key, hash)));
                }
            }
        }
        for (cf, key, value) in puts {
            deletes.put_cf(cf, key, value);
        }
        self.write(deletes)?;

        // attach
        let mut batch = WriteBatch::default();
        for (key, leaf) in leaf_updates.iter() {
            batch.put_cf(records_cf, leaf.path.to_key_bytes(), encode_record(key, leaf.hash));
            batch.put_cf(leaves_cf, key.to_bytes(), encode_leaf(leaf.path, &leaf.value));
        }
        for (path, hash) in hash_updates {
            if let Some(hash) = hash {
                batch.put_cf(hashes_cf, path.to_key_bytes(), hash.as_bytes());
            }
        }
        self.put_metadata_path(&mut batch, FIRST_LEAF_KEY, first_leaf_path)?;
        self.put_metadata_path(&mut batch, LAST_LEAF_KEY, last_leaf_path)?;
        self.write(batch)
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.sync()?;
        self.closed.store(true, Ordering::Release);
        tracing::debug!("closed rocksdb data source");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<K, V> Drop for RocksDbDataSource<K, V> {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut fopts = FlushOptions::default();
        fopts.set_wait(true);
        for name in ALL_CFS {
            if let Some(cf) = self.db.cf_handle(name) {
                if let Err(err) = self.db.flush_cf_opt(cf, &fopts) {
                    tracing::error!(%err, cf = name, "failed to flush rocksdb on drop");
                }
            }
        }
        if let Err(err) = self.db.flush_wal(true) {
            tracing::error!(%err, "failed to flush rocksdb wal on drop");
        }
    }
}

// ENCODING
// --------------------------------------------------------------------------------------------

fn encode_record<K: Serializable>(key: &K, hash: Digest) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(DIGEST_BYTES + key.get_size_hint());
    bytes.extend_from_slice(&hash.as_bytes());
    key.write_into(&mut bytes);
    bytes
}

fn encode_leaf<V: Serializable>(path: Path, value: &V) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(PATH_KEY_BYTES + value.get_size_hint());
    bytes.extend_from_slice(&path.to_key_bytes());
    value.write_into(&mut bytes);
    bytes
}

fn decode_leaf<V: Deserializable>(bytes: &[u8]) -> Result<(Path, V), StorageError> {
    if bytes.len() < PATH_KEY_BYTES {
        return Err(StorageError::BadValueLen {
            what: "leaf entry",
            expected: PATH_KEY_BYTES,
            found: bytes.len(),
        });
    }
    let path = decode_path(&bytes[..PATH_KEY_BYTES], "leaf entry")?;
    let value = V::read_from_bytes(&bytes[PATH_KEY_BYTES..])?;
    Ok((path, value))
}

fn decode_path(bytes: &[u8], what: &'static str) -> Result<Path, StorageError> {
    let arr: [u8; PATH_KEY_BYTES] = bytes.try_into().map_err(|_| StorageError::BadValueLen {
        what,
        expected: PATH_KEY_BYTES,
        found: bytes.len(),
    })?;
    Ok(Path::from_key_bytes(arr)?)
}

// CONFIG
// --------------------------------------------------------------------------------------------

/// Configuration for opening a [RocksDbDataSource].
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// The filesystem path where the RocksDB database will be stored.
    pub(crate) path: PathBuf,

    /// The size of the RocksDB block cache in bytes. Default: 1GB (1 << 30 bytes)
    pub(crate) cache_size: usize,

    /// The maximum number of files that RocksDB can have open simultaneously. Default: 512 files
    pub(crate) max_open_files: i32,
}

impl RocksDbConfig {
    /// Creates a new RocksDbConfig with the given database path and default settings.
    ///
    /// # Default Settings
    /// * `cache_size`: 1GB (1,073,741,824 bytes)
    /// * `max_open_files`: 512
    ///
    /// # Examples
    /// ```
    /// use virtual_merkle::RocksDbConfig;
    ///
    /// let config = RocksDbConfig::new("/path/to/database");
    /// ```
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache_size: 1 << 30,
            max_open_files: 512,
        }
    }

    /// Sets the block cache size for RocksDB, in bytes.
    ///
    /// # Examples
    /// ```
    /// use virtual_merkle::RocksDbConfig;
    ///
    /// let config = RocksDbConfig::new("/path/to/database")
    ///     .with_cache_size(256 * 1024 * 1024); // 256MB cache
    /// ```
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the maximum number of files that RocksDB can have open simultaneously.
    ///
    /// # Examples
    /// ```
    /// use virtual_merkle::RocksDbConfig;
    ///
    /// let config = RocksDbConfig::new("/path/to/database")
    ///     .with_max_open_files(1024); // Allow up to 1024 open files
    /// ```
    pub fn with_max_open_files(mut self, count: i32) -> Self {
        self.max_open_files = count;
        self
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(Box::new(e))
    }
}
