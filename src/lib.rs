//! Extensible hashing secondary index.
//!
//! The index maps key values to the locators of table rows. It keeps a
//! directory of `2^global_depth` slots, each naming the bucket table that holds
//! the entries whose key hash ends in the slot's bits. A bucket that overflows
//! splits on one more hash bit, doubling the directory first when the bucket
//! already uses every directory bit.

pub mod bucket;
pub mod bytes;
pub mod config;
pub mod consts;
pub mod directory;
pub mod error;
pub mod hash;
pub mod index;
pub mod info;
pub mod record;
pub mod split;

pub use bucket::{Bucket, IndexEntry};
pub use config::IndexConfig;
pub use directory::{Directory, DirectoryRow};
pub use error::{IndexError, StoreError};
pub use index::{search_cost_for, ExHashIndex, Index, IndexStats};
pub use info::{IndexInfo, IndexType, StatInfo};
pub use record::{
    Constant, FieldType, FileStore, MemoryStore, RecordScan, RecordStore, Rid, Schema,
};
