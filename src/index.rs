//! Extensible hashing index over a record store
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bucket::{index_schema, read_rid, Bucket, IndexEntry};
use crate::config::IndexConfig;
use crate::consts::*;
use crate::directory::{Directory, DirectoryRow};
use crate::error::{IndexError, Result, StoreError};
use crate::hash::{hash_constant, mask, suffix};
use crate::record::{Constant, FieldType, RecordScan, RecordStore, Rid, Schema};
use crate::split::split_bucket;

/// The operations every secondary index offers the planner
#[allow(async_fn_in_trait)]
pub trait Index {
    /// Positions the index before the first entry with `key`
    async fn before_first(&mut self, key: &Constant) -> Result<()>;

    /// Moves to the next entry matching the search key
    async fn next(&mut self) -> Result<bool>;

    /// Locator of the entry the index is positioned on
    fn data_rid(&self) -> Result<Rid>;

    async fn insert(&mut self, key: &Constant, rid: Rid) -> Result<()>;

    /// Deletes the entry for `key` and `rid`. Returns false when there was no
    /// such entry, which is not an error.
    async fn delete(&mut self, key: &Constant, rid: Rid) -> Result<bool>;

    async fn close(&mut self) -> Result<()>;

    /// Estimated block accesses to find all entries of one key in an index
    /// of `num_blocks` blocks holding `records_per_block` entries each
    fn search_cost(num_blocks: usize, records_per_block: usize) -> usize;
}

/// Block accesses for reading one bucket of `capacity` entries
pub fn search_cost_for(capacity: usize, num_blocks: usize, records_per_block: usize) -> usize {
    let bucket_blocks = capacity.div_ceil(records_per_block.max(1)).max(1);
    bucket_blocks.min(num_blocks.max(1))
}

/// Shape of the index as seen by [`ExHashIndex::verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub global_depth: u32,
    pub slots: usize,
    pub buckets: usize,
    pub entries: usize,
}

/// An open bucket scan
///
/// The cursor holds no lock between calls. A split that moves entries while
/// it is open bumps the directory version, and `next` then rescans the bucket
/// the key resolves to, skipping the locators it already returned.
struct Cursor<T> {
    scan: T,
    bucket: Bucket,
    hash: u64,
    version: u64,
    returned: HashSet<Rid>,
    rescanning: bool,
}

/// A handle on an extensible hash index
///
/// Handles are used by one task at a time. Handles created through the same
/// [`crate::IndexInfo`] or with [`ExHashIndex::new_handle`] share one
/// directory. Every operation takes its lock only for its own duration:
/// `before_first` and each `next` hold the read lock, `delete` holds it
/// from the bucket lookup to the removal, and `insert` holds the write lock
/// for the whole split sequence.
pub struct ExHashIndex<S: RecordStore> {
    id: Uuid,
    name: String,
    schema: Schema,
    config: IndexConfig,
    store: Arc<S>,
    directory: Arc<RwLock<Directory>>,
    search_key: Option<Constant>,
    cursor: Option<Cursor<S::Scan>>,
}

impl<S: RecordStore> ExHashIndex<S> {
    /// Opens the index `name` over keys of type `key_type`, creating its
    /// directory on first use
    pub async fn open(
        store: Arc<S>,
        name: &str,
        key_type: FieldType,
        config: IndexConfig,
    ) -> Result<Self> {
        config.validate(name)?;
        let directory = Directory::load(&*store, name).await?;
        Ok(Self::with_directory(
            store,
            name,
            index_schema(key_type),
            config,
            Arc::new(RwLock::new(directory)),
        ))
    }

    pub(crate) fn with_directory(
        store: Arc<S>,
        name: &str,
        schema: Schema,
        config: IndexConfig,
        directory: Arc<RwLock<Directory>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            schema,
            config,
            store,
            directory,
            search_key: None,
            cursor: None,
        }
    }

    /// Another handle on the same index, sharing the directory
    pub fn new_handle(&self) -> Self {
        Self::with_directory(
            Arc::clone(&self.store),
            &self.name,
            self.schema.clone(),
            self.config.clone(),
            Arc::clone(&self.directory),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Bucket the handle is currently scanning
    pub fn current_bucket(&self) -> Option<&Bucket> {
        self.cursor.as_ref().map(|c| &c.bucket)
    }

    pub async fn global_depth(&self) -> u32 {
        self.directory.read().await.global_depth()
    }

    pub async fn directory_rows(&self) -> Vec<DirectoryRow> {
        self.directory.read().await.rows()
    }

    /// Block accesses for a lookup with this index's bucket capacity
    pub fn estimated_cost(&self, num_blocks: usize, records_per_block: usize) -> usize {
        search_cost_for(self.config.bucket_capacity, num_blocks, records_per_block)
    }

    /// Locators of every entry with `key`
    pub async fn lookup(&mut self, key: &Constant) -> Result<Vec<Rid>> {
        self.before_first(key).await?;
        let mut rids = vec![];
        while self.next().await? {
            rids.push(self.data_rid()?);
        }
        self.close().await?;
        Ok(rids)
    }

    async fn open_bucket(&self, bucket: &Bucket) -> Result<S::Scan> {
        open_bucket(&*self.store, &self.schema, bucket).await
    }

    async fn count_entries(&self, bucket: &Bucket) -> Result<usize> {
        let mut scan = self.open_bucket(bucket).await?;
        let mut count = 0;
        while scan.next().await? {
            count += 1;
        }
        scan.close().await?;
        Ok(count)
    }

    /// Number of entries in `bucket`, and whether there is at least one and
    /// all of them hash to `hash`
    async fn fill(&self, bucket: &Bucket, hash: u64) -> Result<(usize, bool)> {
        let mut scan = self.open_bucket(bucket).await?;
        let mut count = 0;
        let mut same_hash = true;
        while scan.next().await? {
            count += 1;
            if same_hash {
                same_hash = hash_constant(&scan.get_val(DATAVAL_FIELD)?) == hash;
            }
        }
        scan.close().await?;
        Ok((count, count > 0 && same_hash))
    }

    /// Splits buckets until the one `hash` falls into has room for another
    /// entry and returns it
    ///
    /// A full bucket whose entries all share `hash` cannot be split apart, so
    /// that case fails before the directory is touched.
    async fn make_room(&self, directory: &mut Directory, hash: u64) -> Result<Bucket> {
        let mut splits = 0;
        loop {
            let bucket = directory.resolve(hash)?;
            let (count, same_hash) = self.fill(&bucket, hash).await?;
            if count < self.config.bucket_capacity {
                return Ok(bucket);
            }

            let global_depth = directory.global_depth();
            let directory_full = bucket.local_depth == global_depth
                && global_depth >= self.config.max_global_depth;
            if same_hash || splits >= self.config.max_splits_per_insert || directory_full {
                warn!(
                    handle = %self.id,
                    index = %self.name,
                    bucket = %bucket.name,
                    splits,
                    global_depth,
                    same_hash,
                    "bucket overflow cannot be resolved by splitting"
                );
                return Err(IndexError::SplitLimitExceeded {
                    index: self.name.clone(),
                    splits,
                });
            }

            if bucket.local_depth == global_depth {
                directory.double(&*self.store).await?;
            }
            self.split(directory, &bucket).await?;
            splits += 1;
        }
    }

    /// Splits `bucket` on its next hash bit. Slots with that bit set move to
    /// the new sibling, the rest keep the bucket, all at the deeper depth.
    async fn split(&self, directory: &mut Directory, bucket: &Bucket) -> Result<()> {
        let local_depth = bucket.local_depth + 1;
        let sibling = Bucket::for_suffix(
            &self.name,
            bucket.bits | (1 << bucket.local_depth),
            local_depth,
        );

        split_bucket(&*self.store, &self.schema, bucket, &sibling).await?;

        let mask = mask(local_depth);
        directory
            .repoint(&*self.store, sibling.bits, mask, &sibling.name, local_depth)
            .await?;
        directory
            .repoint(&*self.store, bucket.bits, mask, &bucket.name, local_depth)
            .await?;
        Ok(())
    }

    /// Walks the directory and every bucket, checking that each entry sits in
    /// the bucket its hash resolves to
    pub async fn verify(&mut self) -> Result<IndexStats> {
        self.close().await?;
        let directory = self.directory.read().await;
        directory.check()?;

        let mut stats = IndexStats {
            global_depth: directory.global_depth(),
            slots: directory.len(),
            buckets: 0,
            entries: 0,
        };
        for bucket in directory.buckets() {
            let mut scan = self.open_bucket(&bucket).await?;
            while scan.next().await? {
                let entry = IndexEntry::read(&scan)?;
                let bits = suffix(hash_constant(&entry.key), bucket.local_depth);
                if bits != bucket.bits {
                    return Err(IndexError::corrupt(
                        &self.name,
                        format!(
                            "entry {} of bucket `{}` has suffix {:b}, the bucket holds {:b}",
                            entry.key, bucket.name, bits, bucket.bits
                        ),
                    ));
                }
                stats.entries += 1;
            }
            scan.close().await?;
            stats.buckets += 1;
        }
        Ok(stats)
    }

    /// Every distinct bucket with the number of entries it holds
    pub async fn occupancy(&mut self) -> Result<Vec<(Bucket, usize)>> {
        self.close().await?;
        let directory = self.directory.read().await;
        let mut occupancy = vec![];
        for bucket in directory.buckets() {
            let count = self.count_entries(&bucket).await?;
            occupancy.push((bucket, count));
        }
        Ok(occupancy)
    }

    /// Human readable listing of the directory and the hashed keys of every
    /// bucket
    pub async fn dump(&mut self) -> Result<String> {
        self.close().await?;
        let directory = self.directory.read().await;
        let width = directory.global_depth().max(1) as usize;
        let mut out = String::new();

        for row in directory.rows() {
            let _ = writeln!(
                out,
                "{:0width$b} -> {} (local depth {})",
                row.bits, row.bucket, row.local_depth
            );
        }
        for bucket in directory.buckets() {
            let _ = writeln!(out, "{}:", bucket.name);
            let mut scan = self.open_bucket(&bucket).await?;
            while scan.next().await? {
                let entry = IndexEntry::read(&scan)?;
                let hash = hash_constant(&entry.key);
                let _ = writeln!(
                    out,
                    "\t{:0width$b}\t{}\t{}",
                    suffix(hash, directory.global_depth()),
                    entry.key,
                    entry.rid
                );
            }
            scan.close().await?;
        }
        Ok(out)
    }
}

impl<S: RecordStore> Index for ExHashIndex<S> {
    async fn before_first(&mut self, key: &Constant) -> Result<()> {
        self.close().await?;

        let hash = hash_constant(key);
        let directory = self.directory.read().await;
        let bucket = directory.resolve(hash)?;
        let scan = self.open_bucket(&bucket).await?;
        let version = directory.version();
        drop(directory);

        self.search_key = Some(key.clone());
        self.cursor = Some(Cursor {
            scan,
            bucket,
            hash,
            version,
            returned: HashSet::new(),
            rescanning: false,
        });
        Ok(())
    }

    async fn next(&mut self) -> Result<bool> {
        let (Some(key), Some(cursor)) = (&self.search_key, &mut self.cursor) else {
            return Err(IndexError::NotPositioned);
        };
        let lock = Arc::clone(&self.directory);
        loop {
            let directory = lock.read().await;
            while cursor.scan.next().await? {
                if cursor.scan.get_val(DATAVAL_FIELD)? != *key {
                    continue;
                }
                let rid = read_rid(&cursor.scan)?;
                if cursor.returned.insert(rid) || !cursor.rescanning {
                    return Ok(true);
                }
            }
            if directory.version() == cursor.version {
                return Ok(false);
            }

            // a split ran since the scan was opened
            let bucket = directory.resolve(cursor.hash)?;
            debug!(
                handle = %self.id,
                index = %self.name,
                from = %cursor.bucket.name,
                to = %bucket.name,
                "rescanning after split"
            );
            cursor.scan.close().await?;
            cursor.scan = open_bucket(&*self.store, &self.schema, &bucket).await?;
            cursor.bucket = bucket;
            cursor.version = directory.version();
            cursor.rescanning = true;
        }
    }

    fn data_rid(&self) -> Result<Rid> {
        let cursor = self.cursor.as_ref().ok_or(IndexError::NotPositioned)?;
        Ok(read_rid(&cursor.scan)?)
    }

    async fn insert(&mut self, key: &Constant, rid: Rid) -> Result<()> {
        self.close().await?;
        if let Some(key_type) = self.schema.field_type(DATAVAL_FIELD) {
            key_type.check(DATAVAL_FIELD, key)?;
        }

        let hash = hash_constant(key);
        let lock = Arc::clone(&self.directory);
        let mut directory = lock.write().await;
        let bucket = self.make_room(&mut directory, hash).await?;

        let mut scan = self.open_bucket(&bucket).await?;
        IndexEntry::new(key.clone(), rid).write(&mut scan).await?;
        scan.close().await?;

        debug!(
            handle = %self.id,
            index = %self.name,
            key = %key,
            rid = %rid,
            bucket = %bucket.name,
            directory_size = directory.len(),
            "inserted entry"
        );
        Ok(())
    }

    async fn delete(&mut self, key: &Constant, rid: Rid) -> Result<bool> {
        self.close().await?;

        let directory = self.directory.read().await;
        let bucket = directory.resolve(hash_constant(key))?;
        let mut scan = self.open_bucket(&bucket).await?;
        let mut deleted = false;
        while scan.next().await? {
            if scan.get_val(DATAVAL_FIELD)? == *key && read_rid(&scan)? == rid {
                deleted = remove_current(&mut scan).await?;
                break;
            }
        }
        scan.close().await?;
        drop(directory);

        debug!(
            handle = %self.id,
            index = %self.name,
            key = %key,
            rid = %rid,
            deleted,
            "delete"
        );
        Ok(deleted)
    }

    async fn close(&mut self) -> Result<()> {
        self.search_key = None;
        if let Some(mut cursor) = self.cursor.take() {
            cursor.scan.close().await?;
        }
        Ok(())
    }

    fn search_cost(num_blocks: usize, records_per_block: usize) -> usize {
        search_cost_for(DEFAULT_BUCKET_CAPACITY, num_blocks, records_per_block)
    }
}

async fn open_bucket<S: RecordStore>(
    store: &S,
    schema: &Schema,
    bucket: &Bucket,
) -> Result<S::Scan> {
    store
        .open_scan(&bucket.name, schema)
        .await
        .map_err(IndexError::bucket(&bucket.name))
}

/// Deletes the record `scan` is on. False when another handle removed it
/// first.
async fn remove_current<T: RecordScan>(scan: &mut T) -> Result<bool> {
    match scan.delete().await {
        Ok(()) => Ok(true),
        Err(StoreError::NoCurrentRecord { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryStore;

    async fn int_index(capacity: usize) -> ExHashIndex<MemoryStore> {
        ExHashIndex::open(
            Arc::new(MemoryStore::new()),
            "idx",
            FieldType::Int,
            IndexConfig::default().with_bucket_capacity(capacity),
        )
        .await
        .unwrap()
    }

    #[test]
    fn cost_is_one_bucket_of_blocks() {
        assert_eq!(search_cost_for(16, 100, 4), 4);
        assert_eq!(search_cost_for(16, 100, 5), 4);
        assert_eq!(search_cost_for(16, 100, 200), 1);
        assert_eq!(search_cost_for(16, 2, 4), 2);
        assert_eq!(search_cost_for(16, 0, 0), 1);
        assert_eq!(
            <ExHashIndex<MemoryStore> as Index>::search_cost(1000, 8),
            DEFAULT_BUCKET_CAPACITY / 8
        );
    }

    #[tokio::test]
    async fn next_requires_positioning() {
        let mut index = int_index(4).await;
        assert!(matches!(index.next().await, Err(IndexError::NotPositioned)));
        assert!(matches!(index.data_rid(), Err(IndexError::NotPositioned)));

        index.before_first(&Constant::Int(1)).await.unwrap();
        assert!(index.current_bucket().is_some());
        assert!(!index.next().await.unwrap());
        index.close().await.unwrap();
        assert!(index.current_bucket().is_none());
        assert!(matches!(index.next().await, Err(IndexError::NotPositioned)));
    }

    #[tokio::test]
    async fn split_moves_slots_with_the_new_bit() {
        let mut index = int_index(2).await;
        for k in 0..6 {
            index.insert(&Constant::Int(k), Rid::new(k, 0)).await.unwrap();
        }
        let stats = index.verify().await.unwrap();
        assert_eq!(stats.entries, 6);
        assert!(stats.buckets >= 3);
        assert_eq!(stats.slots, 1 << stats.global_depth);

        let occupancy = index.occupancy().await.unwrap();
        assert_eq!(occupancy.len(), stats.buckets);
        assert!(occupancy.iter().all(|(_, n)| *n <= 2));
    }

    #[tokio::test]
    async fn duplicates_beyond_capacity_fail_without_splitting() {
        let mut index = int_index(2).await;
        let key = Constant::Int(7);
        index.insert(&key, Rid::new(0, 0)).await.unwrap();
        index.insert(&key, Rid::new(0, 1)).await.unwrap();
        let before = index.directory_rows().await;

        let err = index.insert(&key, Rid::new(0, 2)).await.unwrap_err();
        assert!(matches!(err, IndexError::SplitLimitExceeded { splits: 0, .. }));
        assert_eq!(index.directory_rows().await, before);

        // the index stays usable and consistent
        assert_eq!(index.lookup(&key).await.unwrap().len(), 2);
        let stats = index.verify().await.unwrap();
        assert_eq!(stats.global_depth, 1);
        assert_eq!(stats.entries, 2);
    }

    #[tokio::test]
    async fn full_bucket_with_other_keys_still_splits() {
        let mut index = int_index(2).await;
        let key = Constant::Int(7);
        let bits = suffix(hash_constant(&key), 1);
        let other = (0..100)
            .map(Constant::Int)
            .find(|k| *k != key && suffix(hash_constant(k), 1) == bits)
            .unwrap();

        index.insert(&key, Rid::new(0, 0)).await.unwrap();
        index.insert(&other, Rid::new(0, 1)).await.unwrap();
        // the new key shares the bucket with a different hash, so splitting helps
        match index.insert(&key, Rid::new(0, 2)).await {
            Ok(()) => assert_eq!(index.lookup(&key).await.unwrap().len(), 2),
            Err(IndexError::SplitLimitExceeded { splits, .. }) => assert!(splits > 0),
            Err(e) => panic!("unexpected error {e}"),
        }
        index.verify().await.unwrap();
    }

    #[tokio::test]
    async fn removing_an_entry_someone_else_removed() {
        let store = Arc::new(MemoryStore::new());
        let mut index = ExHashIndex::open(
            Arc::clone(&store),
            "idx",
            FieldType::Int,
            IndexConfig::default(),
        )
        .await
        .unwrap();
        let key = Constant::Int(5);
        index.insert(&key, Rid::new(2, 3)).await.unwrap();

        let bucket = index.directory.read().await.resolve(hash_constant(&key)).unwrap();
        let mut scan = open_bucket(&*store, &index.schema, &bucket).await.unwrap();
        assert!(scan.next().await.unwrap());

        let mut other = index.new_handle();
        assert!(other.delete(&key, Rid::new(2, 3)).await.unwrap());
        assert_eq!(read_rid(&scan).unwrap(), Rid::new(2, 3));
        assert!(!remove_current(&mut scan).await.unwrap());
        assert!(!other.delete(&key, Rid::new(2, 3)).await.unwrap());
    }

    #[tokio::test]
    async fn dump_lists_slots_and_entries() {
        let mut index = int_index(4).await;
        index.insert(&Constant::Int(3), Rid::new(1, 2)).await.unwrap();
        let dump = index.dump().await.unwrap();
        assert!(dump.contains("0 -> idx0 (local depth 1)"));
        assert!(dump.contains("1 -> idx1 (local depth 1)"));
        assert!(dump.contains("\t3\t[1, 2]"));
    }
}
