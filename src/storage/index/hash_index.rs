use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::buffer::{PageId, ParallelBufferPool};
use crate::config::HashTableConfig;
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::{HashTableBucketPageCodec, HashTableDirectoryPageCodec};
use crate::storage::index::comparator::{
    default_comparator, default_hash_function, HashFunction, KeyComparator,
};
use crate::storage::page::{
    default_bucket_capacity, HashTableBucketPage, HashTableDirectoryPage, RecordId,
    DIRECTORY_MAX_DEPTH,
};

/// Disk-backed extendible hash table over fixed-width byte-string keys,
/// supporting duplicate keys (multiple values per key, unique pairs).
///
/// Point operations take the table latch shared and drop it once the target
/// bucket is latched; splits and merges run under the exclusive table latch.
#[derive(Debug)]
pub struct ExtendibleHashTable {
    buffer_pool: Arc<ParallelBufferPool>,
    directory_page_id: PageId,
    bucket_max_size: u32,
    key_size: u32,
    comparator: KeyComparator,
    hash_fn: HashFunction,
    table_latch: RwLock<()>,
}

impl ExtendibleHashTable {
    pub fn try_new(
        buffer_pool: Arc<ParallelBufferPool>,
        key_size: u32,
        config: HashTableConfig,
    ) -> PalletDBResult<Self> {
        Self::try_new_with(
            buffer_pool,
            key_size,
            config,
            default_comparator,
            default_hash_function,
        )
    }

    pub fn try_new_with(
        buffer_pool: Arc<ParallelBufferPool>,
        key_size: u32,
        config: HashTableConfig,
        comparator: KeyComparator,
        hash_fn: HashFunction,
    ) -> PalletDBResult<Self> {
        let bucket_max_size = config
            .bucket_max_size
            .unwrap_or_else(|| default_bucket_capacity(key_size as usize));

        // One directory page plus bucket 0 at depth zero.
        let mut bucket_guard = buffer_pool.new_page_write()?;
        let bucket_page_id = bucket_guard.page_id();
        bucket_guard.overwrite(&HashTableBucketPageCodec::encode(&HashTableBucketPage::new(
            bucket_max_size,
            key_size,
        )));
        drop(bucket_guard);

        let mut dir_guard = buffer_pool.new_page_write()?;
        let directory_page_id = dir_guard.page_id();
        let mut directory = HashTableDirectoryPage::new(directory_page_id);
        directory.set_bucket_page_id(0, bucket_page_id);
        dir_guard.overwrite(&HashTableDirectoryPageCodec::encode(&directory));
        drop(dir_guard);

        debug!(
            "Created hash table: directory {} bucket {} capacity {}",
            directory_page_id, bucket_page_id, bucket_max_size
        );
        Ok(Self {
            buffer_pool,
            directory_page_id,
            bucket_max_size,
            key_size,
            comparator,
            hash_fn,
            table_latch: RwLock::new(()),
        })
    }

    /// Reattach to a persisted table given its directory page id; bucket
    /// geometry is read back from bucket 0.
    pub fn try_open(
        buffer_pool: Arc<ParallelBufferPool>,
        directory_page_id: PageId,
        comparator: KeyComparator,
        hash_fn: HashFunction,
    ) -> PalletDBResult<Self> {
        let (bucket_max_size, key_size) = {
            let dir_guard = buffer_pool.fetch_page_read(directory_page_id)?;
            let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
            let bucket_guard = buffer_pool.fetch_page_read(directory.get_bucket_page_id(0))?;
            let (bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;
            (bucket.max_size, bucket.key_size)
        };
        Ok(Self {
            buffer_pool,
            directory_page_id,
            bucket_max_size,
            key_size,
            comparator,
            hash_fn,
            table_latch: RwLock::new(()),
        })
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &[u8]) -> u32 {
        (self.hash_fn)(key) as u32
    }

    fn check_key(&self, key: &[u8]) -> PalletDBResult<()> {
        if key.len() != self.key_size as usize {
            return Err(PalletDBError::Internal(format!(
                "Hash key length {} does not match table key size {}",
                key.len(),
                self.key_size
            )));
        }
        Ok(())
    }

    /// All live values stored under `key`.
    pub fn get_value(&self, key: &[u8]) -> PalletDBResult<Vec<RecordId>> {
        self.check_key(key)?;
        let table_guard = self.table_latch.read();
        let dir_guard = self.buffer_pool.fetch_page_read(self.directory_page_id)?;
        let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
        let index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
        let bucket_page_id = directory.get_bucket_page_id(index);
        let bucket_guard = self.buffer_pool.fetch_page_read(bucket_page_id)?;
        drop(dir_guard);
        drop(table_guard);

        let (bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;
        Ok(bucket.get_value(key, self.comparator))
    }

    /// Insert a (key, value) pair; exact duplicates are rejected. A full
    /// bucket routes through the exclusive split path.
    pub fn insert(&self, key: &[u8], value: RecordId) -> PalletDBResult<bool> {
        self.check_key(key)?;
        {
            let table_guard = self.table_latch.read();
            let dir_guard = self.buffer_pool.fetch_page_read(self.directory_page_id)?;
            let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
            let index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
            let bucket_page_id = directory.get_bucket_page_id(index);
            let mut bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id)?;
            drop(dir_guard);
            drop(table_guard);

            let (mut bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;
            if bucket.contains(key, value, self.comparator) {
                return Ok(false);
            }
            if !bucket.is_full() {
                bucket.insert(key, value, self.comparator);
                bucket_guard.overwrite(&HashTableBucketPageCodec::encode(&bucket));
                return Ok(true);
            }
        }
        self.split_insert(key, value)
    }

    /// Slow insert path: split the target bucket (relocating pairs under the
    /// new layout, doubling the directory when the local depth outgrows the
    /// global depth) until the key's bucket has room.
    fn split_insert(&self, key: &[u8], value: RecordId) -> PalletDBResult<bool> {
        let _table_guard = self.table_latch.write();
        let mut dir_guard = self.buffer_pool.fetch_page_write(self.directory_page_id)?;
        let (mut directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;

        let mut index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
        let mut bucket_page_id = directory.get_bucket_page_id(index);
        let mut bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id)?;
        let (mut bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;

        if bucket.contains(key, value, self.comparator) {
            return Ok(false);
        }

        let mut dir_dirty = false;
        while bucket.is_full() {
            if directory.get_local_depth(index) >= DIRECTORY_MAX_DEPTH {
                return Err(PalletDBError::Storage(
                    "Cannot split bucket: directory depth exhausted".to_string(),
                ));
            }

            let mut image_guard = self.buffer_pool.new_page_write()?;
            let image_page_id = image_guard.page_id();
            let mut image_bucket = HashTableBucketPage::new(self.bucket_max_size, self.key_size);
            let image_index = index ^ (1usize << directory.get_local_depth(index));

            directory.incr_local_depth(index);
            let local_depth = directory.get_local_depth(index);
            let mask = directory.get_local_depth_mask(index);
            let old_size = directory.size();

            if local_depth > directory.get_global_depth() {
                // Mirror the lower half into the upper half, then grow.
                for i in 0..old_size {
                    directory.set_bucket_page_id(i + old_size, directory.get_bucket_page_id(i));
                    directory.set_local_depth(i + old_size, directory.get_local_depth(i));
                }
                directory.incr_global_depth();
                directory.set_bucket_page_id(image_index, image_page_id);
                debug!(
                    "Doubled hash directory to global depth {}",
                    directory.get_global_depth()
                );
            } else {
                let diff = 1usize << local_depth;
                let size = directory.size();
                let mut i = index & mask as usize;
                while i < size {
                    directory.set_local_depth(i, local_depth);
                    i += diff;
                }
                let mut i = image_index & mask as usize;
                while i < size {
                    directory.set_local_depth(i, local_depth);
                    directory.set_bucket_page_id(i, image_page_id);
                    i += diff;
                }
            }
            dir_dirty = true;

            // Relocate under the new layout, clearing first so the rehashed
            // source keeps the occupied-prefix invariant.
            let pairs = bucket.get_all_pairs();
            bucket.clear();
            for (pair_key, pair_value) in pairs {
                if self.hash(&pair_key) & mask == index as u32 & mask {
                    bucket.insert(&pair_key, pair_value, self.comparator);
                } else {
                    image_bucket.insert(&pair_key, pair_value, self.comparator);
                }
            }
            debug!(
                "Split bucket {} into {} at local depth {}",
                bucket_page_id, image_page_id, local_depth
            );

            // Write both buckets back, then continue with whichever one the
            // key now belongs to.
            let target_index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
            let target_page_id = directory.get_bucket_page_id(target_index);
            bucket_guard.overwrite(&HashTableBucketPageCodec::encode(&bucket));
            image_guard.overwrite(&HashTableBucketPageCodec::encode(&image_bucket));
            if target_page_id == bucket_page_id {
                drop(image_guard);
            } else {
                drop(bucket_guard);
                bucket_guard = image_guard;
                bucket = image_bucket;
                bucket_page_id = image_page_id;
            }
            index = target_index;
        }

        let inserted = bucket.insert(key, value, self.comparator);
        bucket_guard.overwrite(&HashTableBucketPageCodec::encode(&bucket));
        if dir_dirty {
            dir_guard.overwrite(&HashTableDirectoryPageCodec::encode(&directory));
        }
        Ok(inserted)
    }

    /// Remove an exact (key, value) pair. An emptied bucket whose image
    /// shares its depth triggers the exclusive merge path.
    pub fn remove(&self, key: &[u8], value: RecordId) -> PalletDBResult<bool> {
        self.check_key(key)?;
        let (removed, try_merge) = {
            let table_guard = self.table_latch.read();
            let dir_guard = self.buffer_pool.fetch_page_read(self.directory_page_id)?;
            let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
            let index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
            let bucket_page_id = directory.get_bucket_page_id(index);
            let mut bucket_guard = self.buffer_pool.fetch_page_write(bucket_page_id)?;
            drop(dir_guard);
            drop(table_guard);

            let (mut bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;
            let removed = bucket.remove(key, value, self.comparator);
            if removed {
                bucket_guard.overwrite(&HashTableBucketPageCodec::encode(&bucket));
            }

            let local_depth = directory.get_local_depth(index);
            let image_index = if local_depth > 0 {
                index ^ (1usize << (local_depth - 1))
            } else {
                index
            };
            let try_merge = removed
                && bucket.is_empty()
                && local_depth > 0
                && directory.get_local_depth(image_index) == local_depth;
            (removed, try_merge)
        };

        if try_merge {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Fold empty buckets into their images while depths allow, shrinking
    /// the directory whenever no bucket still needs the top bit. Orphaned
    /// bucket pages are deleted eagerly.
    fn merge(&self, key: &[u8]) -> PalletDBResult<()> {
        let _table_guard = self.table_latch.write();
        let mut dir_guard = self.buffer_pool.fetch_page_write(self.directory_page_id)?;
        let (mut directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;

        let mut index = (self.hash(key) & directory.get_global_depth_mask()) as usize;
        let mut dir_dirty = false;

        loop {
            let local_depth = directory.get_local_depth(index);
            if local_depth == 0 {
                break;
            }
            let image_index = index ^ (1usize << (local_depth - 1));
            if directory.get_local_depth(image_index) != local_depth {
                break;
            }

            let bucket_page_id = directory.get_bucket_page_id(index);
            let is_empty = {
                let bucket_guard = self.buffer_pool.fetch_page_read(bucket_page_id)?;
                let (bucket, _) = HashTableBucketPageCodec::decode(bucket_guard.data())?;
                bucket.is_empty()
            };
            if !is_empty {
                break;
            }

            let image_page_id = directory.get_bucket_page_id(image_index);
            let diff = 1usize << local_depth;
            let size = directory.size();
            let new_local_depth = local_depth - 1;

            let mut i = index & (diff - 1);
            while i < size {
                directory.set_local_depth(i, new_local_depth);
                directory.set_bucket_page_id(i, image_page_id);
                i += diff;
            }
            let mut i = image_index & (diff - 1);
            while i < size {
                directory.set_local_depth(i, new_local_depth);
                i += diff;
            }

            if directory.can_shrink() {
                debug!(
                    "Shrunk hash directory to global depth {}",
                    directory.get_global_depth()
                );
            }

            self.buffer_pool.delete_page(bucket_page_id)?;
            debug!("Merged empty bucket {} into {}", bucket_page_id, image_page_id);
            dir_dirty = true;

            // The slot index may now lie past the active region.
            index &= directory.get_global_depth_mask() as usize;
        }

        if dir_dirty {
            dir_guard.overwrite(&HashTableDirectoryPageCodec::encode(&directory));
        }
        Ok(())
    }

    pub fn get_global_depth(&self) -> PalletDBResult<u32> {
        let _table_guard = self.table_latch.read();
        let dir_guard = self.buffer_pool.fetch_page_read(self.directory_page_id)?;
        let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
        Ok(directory.get_global_depth())
    }

    /// Debug check: aborts the process if the directory violates the
    /// shared-bucket invariant.
    pub fn verify_integrity(&self) -> PalletDBResult<()> {
        let _table_guard = self.table_latch.read();
        let dir_guard = self.buffer_pool.fetch_page_read(self.directory_page_id)?;
        let (directory, _) = HashTableDirectoryPageCodec::decode(dir_guard.data())?;
        directory.verify_integrity();
        Ok(())
    }
}
