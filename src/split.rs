use tracing::debug;

use crate::bucket::{Bucket, IndexEntry};
use crate::error::{IndexError, Result};
use crate::hash::{hash_constant, suffix};
use crate::record::{RecordScan, RecordStore, Schema};

/// Entry counts of the two halves of a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOutcome {
    pub kept: usize,
    pub moved: usize,
}

/// Partitions the entries of `from` between it and `sibling`
///
/// Every entry whose hash ends in `sibling.bits` over `sibling.local_depth`
/// bits is inserted into the sibling and deleted from `from`, the others stay
/// where they are. Entries are moved, never copied.
pub async fn split_bucket<S: RecordStore>(
    store: &S,
    schema: &Schema,
    from: &Bucket,
    sibling: &Bucket,
) -> Result<SplitOutcome> {
    let mut source = store
        .open_scan(&from.name, schema)
        .await
        .map_err(IndexError::bucket(&from.name))?;
    let mut target = store
        .open_scan(&sibling.name, schema)
        .await
        .map_err(IndexError::bucket(&sibling.name))?;

    let mut outcome = SplitOutcome { kept: 0, moved: 0 };
    while source.next().await? {
        let entry = IndexEntry::read(&source)?;
        if suffix(hash_constant(&entry.key), sibling.local_depth) == sibling.bits {
            entry.write(&mut target).await?;
            source.delete().await?;
            outcome.moved += 1;
        } else {
            outcome.kept += 1;
        }
    }
    source.close().await?;
    target.close().await?;

    debug!(
        from = %from.name,
        to = %sibling.name,
        depth = sibling.local_depth,
        kept = outcome.kept,
        moved = outcome.moved,
        "split bucket"
    );
    Ok(outcome)
}
