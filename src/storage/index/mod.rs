pub mod btree_index;
pub mod btree_iterator;
pub mod comparator;
pub mod hash_index;

pub use btree_index::BPlusTreeIndex;
pub use btree_iterator::IndexIterator;
pub use hash_index::ExtendibleHashTable;
