use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{unknown_field, Constant, RecordScan, RecordStore, Rid, Schema};
use crate::bytes::ByteLength;
use crate::consts::PAGE_SIZE;
use crate::error::StoreError;

/// Slots of a table, `None` marks a free slot
type Slots = Vec<Option<Vec<Constant>>>;

/// Record store keeping every table in memory
///
/// Cloning the store hands out another reference to the same tables. Record
/// ids are derived as if the records were packed into `PAGE_SIZE` blocks so
/// they look like the ones a [`super::FileStore`] would produce.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, Slots>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live records in `table`, None if the table was never created
    pub fn live_records(&self, table: &str) -> Option<usize> {
        self.tables
            .lock()
            .get(table)
            .map(|slots| slots.iter().filter(|s| s.is_some()).count())
    }
}

impl RecordStore for MemoryStore {
    type Scan = MemoryScan;

    async fn open_scan(&self, table: &str, schema: &Schema) -> Result<MemoryScan, StoreError> {
        self.tables.lock().entry(table.to_string()).or_default();
        Ok(MemoryScan {
            tables: Arc::clone(&self.tables),
            table: table.to_string(),
            schema: schema.clone(),
            per_block: (PAGE_SIZE / schema.byte_len()).max(1),
            current: None,
            record: None,
        })
    }
}

pub struct MemoryScan {
    tables: Arc<Mutex<HashMap<String, Slots>>>,
    table: String,
    schema: Schema,
    per_block: usize,

    /// Slot the scan is on, None while positioned before the first record
    current: Option<usize>,

    /// Copy of the current record taken when the scan moved onto it
    record: Option<Vec<Constant>>,
}

impl MemoryScan {
    fn no_current(&self) -> StoreError {
        StoreError::NoCurrentRecord {
            table: self.table.clone(),
        }
    }

    fn field_index(&self, field: &str) -> Result<usize, StoreError> {
        self.schema
            .index_of(field)
            .ok_or_else(|| unknown_field(&self.table, field))
    }

    /// The current slot, as long as it still holds the record the scan read
    fn live_slot<'a>(
        &self,
        slots: &'a mut Slots,
    ) -> Result<&'a mut Option<Vec<Constant>>, StoreError> {
        let (Some(current), Some(record)) = (self.current, &self.record) else {
            return Err(self.no_current());
        };
        match slots.get_mut(current) {
            Some(slot) if slot.as_ref() == Some(record) => Ok(slot),
            _ => Err(self.no_current()),
        }
    }
}

impl RecordScan for MemoryScan {
    fn table(&self) -> &str {
        &self.table
    }

    async fn before_first(&mut self) -> Result<(), StoreError> {
        self.current = None;
        self.record = None;
        Ok(())
    }

    async fn next(&mut self) -> Result<bool, StoreError> {
        let tables = self.tables.lock();
        let slots = tables.get(&self.table).map(Vec::as_slice).unwrap_or(&[]);
        let start = self.current.map_or(0, |c| c + 1);
        match (start..slots.len()).find(|&i| slots[i].is_some()) {
            Some(i) => {
                self.current = Some(i);
                self.record = slots[i].clone();
                Ok(true)
            }
            None => {
                self.current = Some(slots.len().max(start));
                self.record = None;
                Ok(false)
            }
        }
    }

    fn get_val(&self, field: &str) -> Result<Constant, StoreError> {
        let idx = self.field_index(field)?;
        self.record
            .as_ref()
            .map(|record| record[idx].clone())
            .ok_or_else(|| self.no_current())
    }

    async fn set_val(&mut self, field: &str, value: Constant) -> Result<(), StoreError> {
        let idx = self.field_index(field)?;
        self.schema.fields()[idx].ty.check(field, &value)?;
        let mut tables = self.tables.lock();
        let slots = tables.entry(self.table.clone()).or_default();
        let slot = self.live_slot(slots)?;
        if let Some(stored) = slot.as_mut() {
            stored[idx] = value.clone();
        }
        if let Some(record) = self.record.as_mut() {
            record[idx] = value;
        }
        Ok(())
    }

    async fn insert(&mut self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let slots = tables.entry(self.table.clone()).or_default();
        let record = self.schema.empty_record();
        let at = match slots.iter().position(|s| s.is_none()) {
            Some(free) => {
                slots[free] = Some(record.clone());
                free
            }
            None => {
                slots.push(Some(record.clone()));
                slots.len() - 1
            }
        };
        self.current = Some(at);
        self.record = Some(record);
        Ok(())
    }

    async fn delete(&mut self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let slots = tables.entry(self.table.clone()).or_default();
        *self.live_slot(slots)? = None;
        self.record = None;
        Ok(())
    }

    fn rid(&self) -> Result<Rid, StoreError> {
        match (self.current, &self.record) {
            (Some(current), Some(_)) => Ok(Rid::new(
                (current / self.per_block) as i32,
                (current % self.per_block) as i32,
            )),
            _ => Err(self.no_current()),
        }
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.current = None;
        self.record = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Schema {
        let mut schema = Schema::new();
        schema.add_int_field("age").add_string_field("name", 8);
        schema
    }

    #[tokio::test]
    async fn insert_scan_and_delete() {
        let store = MemoryStore::new();
        let mut scan = store.open_scan("people", &people()).await.unwrap();
        for (age, name) in [(30, "ann"), (41, "bob"), (25, "cat")] {
            scan.insert().await.unwrap();
            scan.set_int("age", age).await.unwrap();
            scan.set_string("name", name).await.unwrap();
        }

        scan.before_first().await.unwrap();
        let mut names = vec![];
        while scan.next().await.unwrap() {
            if scan.get_int("age").unwrap() == 41 {
                scan.delete().await.unwrap();
                continue;
            }
            names.push(scan.get_string("name").unwrap());
        }
        assert_eq!(names, vec!["ann", "cat"]);
        assert_eq!(store.live_records("people"), Some(2));

        // the freed slot is reused
        scan.insert().await.unwrap();
        assert_eq!(scan.rid().unwrap(), Rid::new(0, 1));
        scan.close().await.unwrap();
    }

    #[tokio::test]
    async fn field_errors() {
        let store = MemoryStore::new();
        let mut scan = store.open_scan("people", &people()).await.unwrap();
        assert!(matches!(
            scan.get_int("age"),
            Err(StoreError::NoCurrentRecord { .. })
        ));
        scan.insert().await.unwrap();
        assert!(matches!(
            scan.get_int("height"),
            Err(StoreError::UnknownField { .. })
        ));
        assert!(matches!(
            scan.set_string("name", "far too long").await,
            Err(StoreError::ValueTooLong { .. })
        ));
        assert!(matches!(
            scan.get_string("age"),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert_eq!(scan.get_val("name").unwrap(), Constant::from(""));
    }

    #[tokio::test]
    async fn tables_are_created_on_open() {
        let store = MemoryStore::new();
        assert_eq!(store.live_records("t"), None);
        let mut scan = store.open_scan("t", &people()).await.unwrap();
        assert!(!scan.next().await.unwrap());
        assert_eq!(store.live_records("t"), Some(0));
        assert_eq!(store.table_names(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn record_removed_by_another_scan() {
        let store = MemoryStore::new();
        let mut first = store.open_scan("people", &people()).await.unwrap();
        first.insert().await.unwrap();
        first.set_int("age", 30).await.unwrap();

        let mut second = store.open_scan("people", &people()).await.unwrap();
        first.before_first().await.unwrap();
        assert!(first.next().await.unwrap());
        assert!(second.next().await.unwrap());
        second.delete().await.unwrap();

        // reads serve the record as it was when the scan reached it
        assert_eq!(first.get_int("age").unwrap(), 30);
        assert_eq!(first.rid().unwrap(), Rid::new(0, 0));
        assert!(matches!(
            first.delete().await,
            Err(StoreError::NoCurrentRecord { .. })
        ));

        // a new record in the freed slot is not the one the scan is on
        second.insert().await.unwrap();
        second.set_int("age", 55).await.unwrap();
        assert!(matches!(
            first.set_int("age", 31).await,
            Err(StoreError::NoCurrentRecord { .. })
        ));
        assert_eq!(store.live_records("people"), Some(1));
    }
}
