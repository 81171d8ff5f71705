//! File backed record store
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{unknown_field, Constant, FieldType, RecordScan, RecordStore, Rid, Schema};
use crate::bytes::{ByteLength, IntoBytes, ParseFromBytes};
use crate::consts::*;
use crate::error::StoreError;

/// Record store keeping one file per table under a root directory
///
/// ## File layout
/// - The file is a sequence of blocks of PAGE_SIZE bytes
/// - Each block holds `PAGE_SIZE / slot length` fixed length slots, a slot never
///   straddles two blocks
/// - First byte of a slot is 1 when it holds a live record, 0 when it is free
/// - Followed by the fields in schema order, ints as 4 LE bytes and strings as
///   a u16 LE length and the bytes padded to the declared length
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.tbl", table))
    }
}

impl RecordStore for FileStore {
    type Scan = FileScan;

    async fn open_scan(&self, table: &str, schema: &Schema) -> Result<FileScan, StoreError> {
        let slot_len = schema.byte_len();
        if slot_len > PAGE_SIZE {
            return Err(StoreError::RecordTooLarge {
                table: table.to_string(),
                len: slot_len,
            });
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.table_path(table))
            .await?;

        Ok(FileScan {
            file,
            table: table.to_string(),
            schema: schema.clone(),
            slot_len,
            per_block: PAGE_SIZE / slot_len,
            current: None,
            record: None,
        })
    }
}

pub struct FileScan {
    file: File,
    table: String,
    schema: Schema,
    slot_len: usize,
    per_block: usize,

    /// Slot number the scan is on, counted from the start of the file
    current: Option<u64>,

    /// Decoded copy of the current record
    record: Option<Vec<Constant>>,
}

impl FileScan {
    fn offset(&self, slot: u64) -> u64 {
        let per_block = self.per_block as u64;
        (slot / per_block) * PAGE_SIZE as u64 + (slot % per_block) * self.slot_len as u64
    }

    async fn file_len(&self) -> Result<u64, StoreError> {
        Ok(self.file.metadata().await?.len())
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(buf).await?;
        Ok(())
    }

    async fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        Ok(())
    }

    async fn write_record(&mut self, slot: u64, record: &[Constant]) -> Result<(), StoreError> {
        let mut buf = Vec::with_capacity(self.slot_len);
        buf.push(1);
        for (field, value) in self.schema.fields().iter().zip(record) {
            value.write_bytes(&mut buf, field.ty);
        }
        let offset = self.offset(slot);
        self.write_at(offset, &buf).await
    }

    fn decode(&self, bytes: &[u8], offset: u64) -> Result<Vec<Constant>, StoreError> {
        let malformed = || StoreError::Malformed {
            table: self.table.clone(),
            offset,
        };
        let mut rest = bytes;
        let mut record = Vec::with_capacity(self.schema.fields().len());
        for field in self.schema.fields() {
            let (value, tail) = Constant::from_bytes(rest, field.ty).map_err(|_| malformed())?;
            record.push(value);
            rest = tail;
        }
        Ok(record)
    }

    fn no_current(&self) -> StoreError {
        StoreError::NoCurrentRecord {
            table: self.table.clone(),
        }
    }

    /// Fails unless the current slot still holds the record the scan read
    async fn check_live(&mut self) -> Result<u64, StoreError> {
        let slot = self.current.ok_or_else(|| self.no_current())?;
        let offset = self.offset(slot);
        if self.record.is_none() || offset + self.slot_len as u64 > self.file_len().await? {
            return Err(self.no_current());
        }

        let mut buf = vec![0; self.slot_len];
        self.read_at(offset, &mut buf).await?;
        if buf[0] != 1 {
            return Err(self.no_current());
        }
        let stored = self.decode(&buf[SLOT_HEADER..], offset)?;
        if self.record.as_ref() != Some(&stored) {
            return Err(self.no_current());
        }
        Ok(slot)
    }
}

impl RecordScan for FileScan {
    fn table(&self) -> &str {
        &self.table
    }

    async fn before_first(&mut self) -> Result<(), StoreError> {
        self.current = None;
        self.record = None;
        Ok(())
    }

    async fn next(&mut self) -> Result<bool, StoreError> {
        let len = self.file_len().await?;
        let mut slot = self.current.map_or(0, |c| c + 1);
        let mut buf = vec![0; self.slot_len];
        loop {
            let offset = self.offset(slot);
            if offset + self.slot_len as u64 > len {
                self.current = Some(slot);
                self.record = None;
                return Ok(false);
            }
            self.read_at(offset, &mut buf).await?;
            if buf[0] == 1 {
                let record = self.decode(&buf[SLOT_HEADER..], offset)?;
                self.current = Some(slot);
                self.record = Some(record);
                return Ok(true);
            }
            slot += 1;
        }
    }

    fn get_val(&self, field: &str) -> Result<Constant, StoreError> {
        let idx = self
            .schema
            .index_of(field)
            .ok_or_else(|| unknown_field(&self.table, field))?;
        self.record
            .as_ref()
            .map(|record| record[idx].clone())
            .ok_or_else(|| self.no_current())
    }

    async fn set_val(&mut self, field: &str, value: Constant) -> Result<(), StoreError> {
        let idx = self
            .schema
            .index_of(field)
            .ok_or_else(|| unknown_field(&self.table, field))?;
        self.schema.fields()[idx].ty.check(field, &value)?;
        let slot = self.check_live().await?;
        let mut record = self.record.take().ok_or_else(|| self.no_current())?;
        record[idx] = value;
        let written = self.write_record(slot, &record).await;
        self.record = Some(record);
        written
    }

    async fn insert(&mut self) -> Result<(), StoreError> {
        let len = self.file_len().await?;
        let mut slot = 0;
        let mut flag = [0u8; 1];
        loop {
            let offset = self.offset(slot);
            if offset + self.slot_len as u64 > len {
                break;
            }
            self.read_at(offset, &mut flag).await?;
            if flag[0] == 0 {
                break;
            }
            slot += 1;
        }

        let record = self.schema.empty_record();
        self.write_record(slot, &record).await?;
        self.current = Some(slot);
        self.record = Some(record);
        Ok(())
    }

    async fn delete(&mut self) -> Result<(), StoreError> {
        let slot = self.check_live().await?;
        let offset = self.offset(slot);
        self.write_at(offset, &[0]).await?;
        self.record = None;
        Ok(())
    }

    fn rid(&self) -> Result<Rid, StoreError> {
        match (self.current, &self.record) {
            (Some(slot), Some(_)) => {
                let per_block = self.per_block as u64;
                Ok(Rid::new(
                    (slot / per_block) as i32,
                    (slot % per_block) as i32,
                ))
            }
            _ => Err(self.no_current()),
        }
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.file.flush().await?;
        self.current = None;
        self.record = None;
        Ok(())
    }
}

impl IntoBytes for Constant {
    type Metadata = FieldType;

    fn write_bytes(&self, buf: &mut Vec<u8>, ty: FieldType) {
        match (ty, self) {
            (FieldType::Int, Constant::Int(v)) => buf.extend(v.to_le_bytes()),
            (FieldType::Str(max), Constant::Str(s)) => {
                let bytes = &s.as_bytes()[..s.len().min(max)];
                buf.extend((bytes.len() as u16).to_le_bytes());
                buf.extend(bytes);
                buf.resize(buf.len() + max - bytes.len(), 0);
            }
            // values are checked against the field type before they get here
            (ty, _) => buf.resize(buf.len() + ty.byte_len(), 0),
        }
    }
}

impl<'a> ParseFromBytes<'a> for Constant {
    type Error = ();
    type Metadata = FieldType;

    fn from_bytes(bytes: &'a [u8], ty: FieldType) -> Result<(Self, &'a [u8]), ()> {
        if bytes.len() < ty.byte_len() {
            return Err(());
        }
        match ty {
            FieldType::Int => {
                let v = i32::from_le_bytes(bytes[..INT_LENGTH].try_into().map_err(|_| ())?);
                Ok((Constant::Int(v), &bytes[INT_LENGTH..]))
            }
            FieldType::Str(max) => {
                let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
                if len > max {
                    return Err(());
                }
                let start = STRING_LENGTH_HEADER;
                let s = std::str::from_utf8(&bytes[start..start + len]).map_err(|_| ())?;
                Ok((Constant::Str(s.to_string()), &bytes[start + max..]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_int_field(BLOCK_FIELD)
            .add_int_field(ID_FIELD)
            .add_string_field(DATAVAL_FIELD, 12);
        schema
    }

    #[test]
    fn constants_encode_to_fixed_width() {
        let mut buf = vec![];
        Constant::from("hey").write_bytes(&mut buf, FieldType::Str(6));
        Constant::Int(-7).write_bytes(&mut buf, FieldType::Int);
        assert_eq!(buf.len(), 2 + 6 + 4);

        let (s, rest) = Constant::from_bytes(&buf, FieldType::Str(6)).unwrap();
        let (i, rest) = Constant::from_bytes(rest, FieldType::Int).unwrap();
        assert_eq!(s, Constant::from("hey"));
        assert_eq!(i, Constant::Int(-7));
        assert!(rest.is_empty());

        assert!(Constant::from_bytes(&buf[..3], FieldType::Str(6)).is_err());
    }

    #[tokio::test]
    async fn records_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let schema = entry_schema();

        let mut scan = store.open_scan("bucket", &schema).await.unwrap();
        for i in 0..5 {
            scan.insert().await.unwrap();
            scan.set_int(BLOCK_FIELD, i).await.unwrap();
            scan.set_int(ID_FIELD, i * 10).await.unwrap();
            scan.set_string(DATAVAL_FIELD, &format!("key{}", i)).await.unwrap();
        }
        scan.close().await.unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let mut scan = store.open_scan("bucket", &schema).await.unwrap();
        let mut seen = vec![];
        while scan.next().await.unwrap() {
            seen.push((
                scan.get_int(BLOCK_FIELD).unwrap(),
                scan.get_int(ID_FIELD).unwrap(),
                scan.get_string(DATAVAL_FIELD).unwrap(),
            ));
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[3], (3, 30, "key3".to_string()));
    }

    #[tokio::test]
    async fn deleted_slots_are_skipped_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let schema = entry_schema();

        let mut scan = store.open_scan("bucket", &schema).await.unwrap();
        for i in 0..3 {
            scan.insert().await.unwrap();
            scan.set_int(BLOCK_FIELD, i).await.unwrap();
        }
        scan.before_first().await.unwrap();
        while scan.next().await.unwrap() {
            if scan.get_int(BLOCK_FIELD).unwrap() == 1 {
                scan.delete().await.unwrap();
            }
        }

        let mut other = store.open_scan("bucket", &schema).await.unwrap();
        let mut blocks = vec![];
        while other.next().await.unwrap() {
            blocks.push(other.get_int(BLOCK_FIELD).unwrap());
        }
        assert_eq!(blocks, vec![0, 2]);

        other.insert().await.unwrap();
        assert_eq!(other.rid().unwrap(), Rid::new(0, 1));
    }

    #[tokio::test]
    async fn slots_do_not_straddle_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let mut schema = Schema::new();
        schema.add_string_field("wide", 1500);
        let per_block = PAGE_SIZE / schema.byte_len();
        assert_eq!(per_block, 2);

        let mut scan = store.open_scan("wide", &schema).await.unwrap();
        for _ in 0..3 {
            scan.insert().await.unwrap();
        }
        assert_eq!(scan.rid().unwrap(), Rid::new(1, 0));

        scan.before_first().await.unwrap();
        let mut count = 0;
        while scan.next().await.unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn oversized_schemas_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let mut schema = Schema::new();
        schema.add_string_field("huge", PAGE_SIZE);
        assert!(matches!(
            store.open_scan("huge", &schema).await,
            Err(StoreError::RecordTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn record_removed_by_another_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let schema = entry_schema();

        let mut first = store.open_scan("bucket", &schema).await.unwrap();
        first.insert().await.unwrap();
        first.set_int(BLOCK_FIELD, 3).await.unwrap();
        first.before_first().await.unwrap();
        assert!(first.next().await.unwrap());

        let mut second = store.open_scan("bucket", &schema).await.unwrap();
        assert!(second.next().await.unwrap());
        second.delete().await.unwrap();

        assert_eq!(first.get_int(BLOCK_FIELD).unwrap(), 3);
        assert_eq!(first.rid().unwrap(), Rid::new(0, 0));
        assert!(matches!(
            first.delete().await,
            Err(StoreError::NoCurrentRecord { .. })
        ));

        second.insert().await.unwrap();
        second.set_int(BLOCK_FIELD, 9).await.unwrap();
        assert!(matches!(
            first.set_int(BLOCK_FIELD, 4).await,
            Err(StoreError::NoCurrentRecord { .. })
        ));

        second.before_first().await.unwrap();
        let mut blocks = vec![];
        while second.next().await.unwrap() {
            blocks.push(second.get_int(BLOCK_FIELD).unwrap());
        }
        assert_eq!(blocks, vec![9]);
    }
}
