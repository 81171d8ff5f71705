use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};

use crate::bucket::index_schema;
use crate::bytes::ByteLength;
use crate::config::IndexConfig;
use crate::consts::BLOCK_SIZE;
use crate::directory::Directory;
use crate::error::{IndexError, Result};
use crate::index::{search_cost_for, ExHashIndex};
use crate::record::{FieldType, RecordStore, Schema};

/// Index implementations known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    ExtensibleHash,
}

impl FromStr for IndexType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eh" => Ok(IndexType::ExtensibleHash),
            // static hash ("sh") and btree ("bt") indexes live elsewhere
            _ => Err(IndexError::UnsupportedIndexType(s.to_string())),
        }
    }
}

/// Statistics of the indexed table
#[derive(Debug, Clone, Default)]
pub struct StatInfo {
    pub num_blocks: usize,
    pub num_records: usize,
    distinct: HashMap<String, usize>,
}

impl StatInfo {
    pub fn new(num_blocks: usize, num_records: usize) -> Self {
        Self {
            num_blocks,
            num_records,
            distinct: HashMap::new(),
        }
    }

    pub fn with_distinct_values(mut self, field: &str, values: usize) -> Self {
        self.distinct.insert(field.to_string(), values);
        self
    }

    /// Distinct values of `field`, a third of the records when unknown
    pub fn distinct_values(&self, field: &str) -> usize {
        self.distinct
            .get(field)
            .copied()
            .unwrap_or(1 + self.num_records / 3)
    }
}

/// What the planner knows about one index
///
/// Every handle opened through the same `IndexInfo` shares one in-memory
/// directory, loaded on the first `open`.
pub struct IndexInfo<S: RecordStore> {
    index_type: IndexType,
    index_name: String,
    field_name: String,
    key_type: FieldType,
    config: IndexConfig,
    stats: StatInfo,
    store: Arc<S>,
    directory: OnceCell<Arc<RwLock<Directory>>>,
}

impl<S: RecordStore> IndexInfo<S> {
    pub fn new(
        index_type: &str,
        index_name: &str,
        field_name: &str,
        key_type: FieldType,
        stats: StatInfo,
        store: Arc<S>,
        config: IndexConfig,
    ) -> Result<Self> {
        let index_type = index_type.parse()?;
        config.validate(index_name)?;
        Ok(Self {
            index_type,
            index_name: index_name.to_string(),
            field_name: field_name.to_string(),
            key_type,
            config,
            stats,
            store,
            directory: OnceCell::new(),
        })
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Schema of the index records: the locator of the row and the indexed value
    pub fn schema(&self) -> Schema {
        index_schema(self.key_type)
    }

    pub async fn open(&self) -> Result<ExHashIndex<S>> {
        let directory = self
            .directory
            .get_or_try_init(|| async {
                let directory = Directory::load(&*self.store, &self.index_name).await?;
                Ok::<_, IndexError>(Arc::new(RwLock::new(directory)))
            })
            .await?;

        Ok(ExHashIndex::with_directory(
            Arc::clone(&self.store),
            &self.index_name,
            self.schema(),
            self.config.clone(),
            Arc::clone(directory),
        ))
    }

    /// Estimated block accesses to find all index records of one search key
    pub fn blocks_accessed(&self) -> usize {
        let records_per_block = (BLOCK_SIZE / self.schema().byte_len()).max(1);
        let num_blocks = self.stats.num_records / records_per_block;
        search_cost_for(self.config.bucket_capacity, num_blocks, records_per_block)
    }

    /// Estimated number of rows having a given search key
    pub fn records_output(&self) -> usize {
        self.stats.num_records / self.stats.distinct_values(&self.field_name).max(1)
    }

    /// Distinct values of `field` among the rows an index lookup returns
    pub fn distinct_values(&self, field: &str) -> usize {
        if field == self.field_name {
            1
        } else {
            self.stats.distinct_values(field).min(self.records_output())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::record::{Constant, MemoryStore, Rid};

    fn info(stats: StatInfo) -> IndexInfo<MemoryStore> {
        IndexInfo::new(
            "eh",
            "sidx",
            "sid",
            FieldType::Int,
            stats,
            Arc::new(MemoryStore::new()),
            IndexConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn only_extensible_hash_is_supported() {
        assert_eq!("eh".parse::<IndexType>().unwrap(), IndexType::ExtensibleHash);
        for code in ["sh", "bt", "zz"] {
            assert!(matches!(
                code.parse::<IndexType>(),
                Err(IndexError::UnsupportedIndexType(c)) if c == code
            ));
        }
    }

    #[test]
    fn planner_estimates() {
        let stats = StatInfo::new(50, 1000).with_distinct_values("sid", 100);
        let info = info(stats);
        assert_eq!(info.records_output(), 10);
        assert_eq!(info.distinct_values("sid"), 1);
        // unknown field: 1 + 1000 / 3, capped by the rows returned
        assert_eq!(info.distinct_values("grade"), 10);

        // 13 byte entries, 315 per block, one bucket fits in a block
        assert_eq!(info.schema().byte_len(), 13);
        assert_eq!(info.blocks_accessed(), 1);
    }

    #[tokio::test]
    async fn handles_share_one_directory() {
        let info = info(StatInfo::default());
        let mut writer = info.open().await.unwrap();
        for k in 0..100 {
            writer.insert(&Constant::Int(k), Rid::new(k, 1)).await.unwrap();
        }

        let mut reader = info.open().await.unwrap();
        assert_ne!(reader.id(), writer.id());
        assert_eq!(reader.global_depth().await, writer.global_depth().await);
        assert!(reader.global_depth().await > 1);
        for k in 0..100 {
            assert_eq!(
                reader.lookup(&Constant::Int(k)).await.unwrap(),
                vec![Rid::new(k, 1)]
            );
        }
    }
}
