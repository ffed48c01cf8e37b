#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    /// Frames per buffer pool instance.
    pub pool_size: usize,
    /// Number of sharded instances; page ids are distributed mod this count.
    pub num_instances: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            pool_size: 1000,
            num_instances: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        BTreeConfig {
            leaf_max_size: 32,
            internal_max_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashTableConfig {
    /// Slots per bucket page. `None` derives the largest capacity that fits
    /// one page for the table's key size.
    pub bucket_max_size: Option<u32>,
}

impl Default for HashTableConfig {
    fn default() -> Self {
        HashTableConfig {
            bucket_max_size: None,
        }
    }
}
