//! The directory of an extensible hash index
//!
//! The directory is persisted as a table of `(bits, filename, localdepth)`
//! rows, one per slot. It is read once when the index is opened and kept in
//! memory as a vector indexed by slot, so resolving a key is a single lookup.
//! Structural changes write the persisted rows first and then the cache.
use std::collections::HashMap;

use tracing::{debug, info};

use crate::bucket::{bucket_name, Bucket};
use crate::consts::*;
use crate::error::{IndexError, Result};
use crate::hash::suffix;
use crate::record::{RecordScan, RecordStore, Schema};

/// A row of the persisted directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    pub bits: u64,
    pub bucket: String,
    pub local_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    bucket: String,
    local_depth: u32,
}

#[derive(Debug)]
pub struct Directory {
    index_name: String,

    /// Table the rows are persisted in
    table: String,

    schema: Schema,

    /// Slot `i` serves every hash whose low global depth bits equal `i`.
    /// The length is always a power of two.
    slots: Vec<Slot>,

    /// Bumped on every repoint, that is whenever entries may have moved
    /// between buckets. Not persisted.
    version: u64,
}

/// Name of the table holding the directory of `index_name`
pub fn directory_table(index_name: &str) -> String {
    format!("{}{}", index_name, DIRECTORY_TABLE_SUFFIX)
}

pub fn directory_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_int_field(DIR_BITS_FIELD)
        .add_string_field(DIR_FILENAME_FIELD, BUCKET_NAME_LENGTH)
        .add_int_field(DIR_LOCAL_DEPTH_FIELD);
    schema
}

impl Directory {
    /// Loads the directory of `index_name`, creating it on first use with two
    /// empty buckets of local depth 1.
    pub async fn load<S: RecordStore>(store: &S, index_name: &str) -> Result<Self> {
        let table = directory_table(index_name);
        let schema = directory_schema();
        let mut scan = store.open_scan(&table, &schema).await?;

        let mut rows = vec![];
        while scan.next().await? {
            rows.push(read_row(&scan, index_name)?);
        }

        if rows.is_empty() {
            for bits in 0..(1u64 << INITIAL_GLOBAL_DEPTH) {
                let row = DirectoryRow {
                    bits,
                    bucket: bucket_name(index_name, bits),
                    local_depth: INITIAL_GLOBAL_DEPTH,
                };
                write_row(&mut scan, &row).await?;
                rows.push(row);
            }
            info!(index = index_name, table = %table, "created directory");
        }
        scan.close().await?;

        let directory = Self::from_rows(index_name, table, schema, rows)?;
        info!(
            index = index_name,
            global_depth = directory.global_depth(),
            slots = directory.len(),
            "loaded directory"
        );
        Ok(directory)
    }

    fn from_rows(
        index_name: &str,
        table: String,
        schema: Schema,
        rows: Vec<DirectoryRow>,
    ) -> Result<Self> {
        let count = rows.len();
        if !count.is_power_of_two() {
            return Err(IndexError::corrupt(
                index_name,
                format!("{} rows is not a power of two", count),
            ));
        }

        let mut slots: Vec<Option<Slot>> = vec![None; count];
        for row in rows {
            let slot = slots
                .get_mut(row.bits as usize)
                .filter(|_| row.bits < count as u64)
                .ok_or_else(|| {
                    IndexError::corrupt(
                        index_name,
                        format!("row bits {} out of range for {} rows", row.bits, count),
                    )
                })?;
            if slot.is_some() {
                return Err(IndexError::corrupt(
                    index_name,
                    format!("duplicate row for bits {}", row.bits),
                ));
            }
            *slot = Some(Slot {
                bucket: row.bucket,
                local_depth: row.local_depth,
            });
        }

        let directory = Self {
            index_name: index_name.to_string(),
            table,
            schema,
            // every row landed in a distinct slot and there are `count` of them
            slots: slots.into_iter().flatten().collect(),
            version: 0,
        };
        directory.check()?;
        Ok(directory)
    }

    /// Checks the structural invariants: every local depth is at most the
    /// global depth, all slots sharing a local depth suffix point at the same
    /// bucket, and no bucket is shared between two suffixes.
    pub fn check(&self) -> Result<()> {
        let global_depth = self.global_depth();
        let mut owners: HashMap<&str, (u64, u32)> = HashMap::new();

        for (bits, slot) in self.slots.iter().enumerate() {
            let bits = bits as u64;
            if slot.local_depth > global_depth {
                return Err(self.corrupt(format!(
                    "slot {:b} has local depth {} above global depth {}",
                    bits, slot.local_depth, global_depth
                )));
            }

            let owner = (suffix(bits, slot.local_depth), slot.local_depth);
            let base = &self.slots[owner.0 as usize];
            if base != slot {
                return Err(self.corrupt(format!(
                    "slot {:b} points at `{}` but slot {:b} points at `{}`",
                    bits, slot.bucket, owner.0, base.bucket
                )));
            }

            if let Some(existing) = owners.insert(slot.bucket.as_str(), owner) {
                if existing != owner {
                    return Err(self.corrupt(format!(
                        "bucket `{}` is shared by suffixes {:b} and {:b}",
                        slot.bucket, existing.0, owner.0
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Number of slots, `2^global_depth`
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn global_depth(&self) -> u32 {
        self.slots.len().trailing_zeros()
    }

    /// Changes whenever a split may have moved entries to another bucket
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Finds the bucket responsible for `hash`
    pub fn resolve(&self, hash: u64) -> Result<Bucket> {
        let bits = suffix(hash, self.global_depth());
        self.bucket_at(bits as usize)
            .ok_or_else(|| self.corrupt(format!("no slot for bits {:b}", bits)))
    }

    pub fn bucket_at(&self, bits: usize) -> Option<Bucket> {
        self.slots.get(bits).map(|slot| Bucket {
            bits: suffix(bits as u64, slot.local_depth),
            name: slot.bucket.clone(),
            local_depth: slot.local_depth,
        })
    }

    /// Every distinct bucket, in order of suffix
    ///
    /// The slot whose bits equal a bucket's suffix is the one with no bits set
    /// above the local depth, so each bucket is listed once.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(bits, slot)| suffix(*bits as u64, slot.local_depth) == *bits as u64)
            .map(|(bits, slot)| Bucket {
                bits: bits as u64,
                name: slot.bucket.clone(),
                local_depth: slot.local_depth,
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<DirectoryRow> {
        self.slots
            .iter()
            .enumerate()
            .map(|(bits, slot)| DirectoryRow {
                bits: bits as u64,
                bucket: slot.bucket.clone(),
                local_depth: slot.local_depth,
            })
            .collect()
    }

    /// Doubles the directory
    ///
    /// Every slot `bits` gets a mirror `bits + 2^global_depth` pointing at the
    /// same bucket with the same local depth, so resolution does not change
    /// until a split tells the two apart. Only call this when a bucket whose
    /// local depth equals the global depth has to split.
    pub async fn double<S: RecordStore>(&mut self, store: &S) -> Result<()> {
        let offset = self.slots.len() as u64;
        let mut scan = store.open_scan(&self.table, &self.schema).await?;
        for (bits, slot) in self.slots.iter().enumerate() {
            let row = DirectoryRow {
                bits: bits as u64 + offset,
                bucket: slot.bucket.clone(),
                local_depth: slot.local_depth,
            };
            write_row(&mut scan, &row).await?;
        }
        scan.close().await?;

        self.slots.extend_from_within(..);
        debug!(
            index = %self.index_name,
            global_depth = self.global_depth(),
            slots = self.len(),
            "doubled directory"
        );
        Ok(())
    }

    /// Points every slot whose bits agree with `bits` under `mask` at `bucket`
    /// with local depth `local_depth`. Returns the number of slots changed.
    pub async fn repoint<S: RecordStore>(
        &mut self,
        store: &S,
        bits: u64,
        mask: u64,
        bucket: &str,
        local_depth: u32,
    ) -> Result<usize> {
        let mut scan = store.open_scan(&self.table, &self.schema).await?;
        while scan.next().await? {
            let row_bits = read_bits(&scan, &self.index_name)?;
            if row_bits & mask == bits {
                scan.set_string(DIR_FILENAME_FIELD, bucket).await?;
                scan.set_int(DIR_LOCAL_DEPTH_FIELD, local_depth as i32).await?;
            }
        }
        scan.close().await?;

        let mut changed = 0;
        for (slot_bits, slot) in self.slots.iter_mut().enumerate() {
            if slot_bits as u64 & mask == bits {
                slot.bucket = bucket.to_string();
                slot.local_depth = local_depth;
                changed += 1;
            }
        }
        self.version += 1;
        debug!(
            index = %self.index_name,
            bits = %format!("{:b}", bits),
            depth = local_depth,
            bucket,
            changed,
            "repointed slots"
        );
        Ok(changed)
    }

    fn corrupt(&self, reason: String) -> IndexError {
        IndexError::corrupt(&self.index_name, reason)
    }
}

fn read_bits<T: RecordScan>(scan: &T, index_name: &str) -> Result<u64> {
    let bits = scan.get_int(DIR_BITS_FIELD)?;
    u64::try_from(bits)
        .map_err(|_| IndexError::corrupt(index_name, format!("negative row bits {}", bits)))
}

fn read_row<T: RecordScan>(scan: &T, index_name: &str) -> Result<DirectoryRow> {
    let local_depth = scan.get_int(DIR_LOCAL_DEPTH_FIELD)?;
    Ok(DirectoryRow {
        bits: read_bits(scan, index_name)?,
        bucket: scan.get_string(DIR_FILENAME_FIELD)?,
        local_depth: u32::try_from(local_depth).map_err(|_| {
            IndexError::corrupt(index_name, format!("negative local depth {}", local_depth))
        })?,
    })
}

async fn write_row<T: RecordScan>(scan: &mut T, row: &DirectoryRow) -> Result<()> {
    scan.insert().await?;
    scan.set_int(DIR_BITS_FIELD, row.bits as i32).await?;
    scan.set_string(DIR_FILENAME_FIELD, &row.bucket).await?;
    scan.set_int(DIR_LOCAL_DEPTH_FIELD, row.local_depth as i32).await?;
    Ok(())
}
