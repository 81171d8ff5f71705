use std::hash::{Hash, Hasher};

use crate::consts::*;
use crate::record::{Constant, FieldType, RecordScan, Rid, Schema};
use crate::error::StoreError;

/// One partition of the index keyspace
///
/// A bucket is a table of index entries in the record store. The directory
/// holds its local depth for every slot pointing at it, this struct carries a
/// copy of it between the directory and the split routine.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Hash suffix shared by every entry of the bucket, `local_depth` bits wide
    pub bits: u64,

    /// Name of the table holding the entries
    pub name: String,

    pub local_depth: u32,
}

impl Bucket {
    /// Creates the bucket responsible for suffix `bits` at depth `local_depth`,
    /// named after the index and the suffix
    pub fn for_suffix(index_name: &str, bits: u64, local_depth: u32) -> Self {
        Self {
            bits,
            name: bucket_name(index_name, bits),
            local_depth,
        }
    }
}

impl PartialEq for Bucket {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Bucket {}

impl Hash for Bucket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Bucket tables are named `index_name + suffix`
pub fn bucket_name(index_name: &str, bits: u64) -> String {
    format!("{}{}", index_name, bits)
}

/// Schema of the records stored in bucket tables
pub fn index_schema(key_type: FieldType) -> Schema {
    let mut schema = Schema::new();
    schema
        .add_int_field(BLOCK_FIELD)
        .add_int_field(ID_FIELD)
        .add_field(DATAVAL_FIELD, key_type);
    schema
}

/// An indexed value and the locator of the row it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Constant,
    pub rid: Rid,
}

impl IndexEntry {
    pub fn new(key: Constant, rid: Rid) -> Self {
        Self { key, rid }
    }

    /// Reads the entry the scan is positioned on
    pub fn read<T: RecordScan>(scan: &T) -> Result<Self, StoreError> {
        Ok(Self {
            key: scan.get_val(DATAVAL_FIELD)?,
            rid: read_rid(scan)?,
        })
    }

    /// Inserts the entry as a new record of the scanned bucket
    pub async fn write<T: RecordScan>(&self, scan: &mut T) -> Result<(), StoreError> {
        scan.insert().await?;
        scan.set_int(BLOCK_FIELD, self.rid.block).await?;
        scan.set_int(ID_FIELD, self.rid.slot).await?;
        scan.set_val(DATAVAL_FIELD, self.key.clone()).await
    }
}

pub(crate) fn read_rid<T: RecordScan>(scan: &T) -> Result<Rid, StoreError> {
    Ok(Rid::new(scan.get_int(BLOCK_FIELD)?, scan.get_int(ID_FIELD)?))
}
