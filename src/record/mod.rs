//! The record store the index is built on.
//!
//! A store hands out scans over named tables of fixed-schema records. A scan
//! walks the table forward, can be rewound with `before_first`, and exposes the
//! record it is positioned on for reading, updating and deleting.
use std::fmt;

use crate::bytes::ByteLength;
use crate::consts::*;
use crate::error::StoreError;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constant {
    Int(i32),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Str(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::Int(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::Str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    /// Fixed-length string, the length is the maximum number of bytes
    Str(usize),
}

impl FieldType {
    /// The value a freshly inserted record holds in a field of this type
    pub fn default_value(&self) -> Constant {
        match self {
            FieldType::Int => Constant::Int(0),
            FieldType::Str(_) => Constant::Str(String::new()),
        }
    }

    /// Checks that `value` can be stored in a field of this type
    pub fn check(&self, field: &str, value: &Constant) -> Result<(), StoreError> {
        match (self, value) {
            (FieldType::Int, Constant::Int(_)) => Ok(()),
            (FieldType::Str(max), Constant::Str(s)) => {
                if s.len() > *max {
                    Err(StoreError::ValueTooLong {
                        field: field.to_string(),
                        len: s.len(),
                        max: *max,
                    })
                } else {
                    Ok(())
                }
            }
            (FieldType::Int, _) => Err(StoreError::TypeMismatch {
                field: field.to_string(),
                expected: "an int",
            }),
            (FieldType::Str(_), _) => Err(StoreError::TypeMismatch {
                field: field.to_string(),
                expected: "a string",
            }),
        }
    }
}

impl ByteLength for FieldType {
    fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => INT_LENGTH,
            FieldType::Str(len) => STRING_LENGTH_HEADER + len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

/// The ordered fields of a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: &str, ty: FieldType) -> &mut Self {
        self.fields.push(Field {
            name: name.to_string(),
            ty,
        });
        self
    }

    pub fn add_int_field(&mut self, name: &str) -> &mut Self {
        self.add_field(name, FieldType::Int)
    }

    pub fn add_string_field(&mut self, name: &str, len: usize) -> &mut Self {
        self.add_field(name, FieldType::Str(len))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.ty)
    }

    /// A record holding the default value of every field
    pub fn empty_record(&self) -> Vec<Constant> {
        self.fields.iter().map(|f| f.ty.default_value()).collect()
    }
}

/// Length of one record slot, header byte included
impl ByteLength for Schema {
    fn byte_len(&self) -> usize {
        SLOT_HEADER + self.fields.iter().map(|f| f.ty.byte_len()).sum::<usize>()
    }
}

/// Physical location of a record: the block it lives in and its slot there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub block: i32,
    pub slot: i32,
}

impl Rid {
    pub fn new(block: i32, slot: i32) -> Self {
        Self { block, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.block, self.slot)
    }
}

/// Hands out scans over named tables
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    type Scan: RecordScan;

    /// Opens a scan positioned before the first record of `table`, creating
    /// the table if it does not exist yet.
    async fn open_scan(&self, table: &str, schema: &Schema) -> Result<Self::Scan, StoreError>;
}

/// A forward cursor over one table
#[allow(async_fn_in_trait)]
pub trait RecordScan {
    /// Name of the table being scanned
    fn table(&self) -> &str;

    async fn before_first(&mut self) -> Result<(), StoreError>;

    /// Moves to the next live record, false once the table is exhausted
    async fn next(&mut self) -> Result<bool, StoreError>;

    /// Reads a field of the current record as it was when the scan moved
    /// onto it, even if another scan has removed it since
    fn get_val(&self, field: &str) -> Result<Constant, StoreError>;

    /// Updates a field of the current record. Fails with `NoCurrentRecord`
    /// once another scan has deleted or replaced the record.
    async fn set_val(&mut self, field: &str, value: Constant) -> Result<(), StoreError>;

    /// Inserts a record holding default values and positions the scan on it
    async fn insert(&mut self) -> Result<(), StoreError>;

    /// Deletes the current record, the scan stays where it is so that `next`
    /// moves to the record after it. Fails with `NoCurrentRecord` when the
    /// record is already gone.
    async fn delete(&mut self) -> Result<(), StoreError>;

    fn rid(&self) -> Result<Rid, StoreError>;

    async fn close(&mut self) -> Result<(), StoreError>;

    fn get_int(&self, field: &str) -> Result<i32, StoreError> {
        match self.get_val(field)? {
            Constant::Int(v) => Ok(v),
            Constant::Str(_) => Err(StoreError::TypeMismatch {
                field: field.to_string(),
                expected: "an int",
            }),
        }
    }

    fn get_string(&self, field: &str) -> Result<String, StoreError> {
        match self.get_val(field)? {
            Constant::Str(v) => Ok(v),
            Constant::Int(_) => Err(StoreError::TypeMismatch {
                field: field.to_string(),
                expected: "a string",
            }),
        }
    }

    async fn set_int(&mut self, field: &str, value: i32) -> Result<(), StoreError> {
        self.set_val(field, Constant::Int(value)).await
    }

    async fn set_string(&mut self, field: &str, value: &str) -> Result<(), StoreError> {
        self.set_val(field, Constant::Str(value.to_string())).await
    }
}

pub(crate) fn unknown_field(table: &str, field: &str) -> StoreError {
    StoreError::UnknownField {
        table: table.to_string(),
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_length_covers_every_field() {
        let mut schema = Schema::new();
        schema.add_int_field("block").add_int_field("id").add_string_field("dataval", 10);
        assert_eq!(schema.byte_len(), SLOT_HEADER + 4 + 4 + 2 + 10);
        assert_eq!(schema.index_of("id"), Some(1));
        assert_eq!(schema.field_type("dataval"), Some(FieldType::Str(10)));
        assert_eq!(schema.field_type("missing"), None);
    }

    #[test]
    fn field_types_check_values() {
        assert!(FieldType::Int.check("a", &Constant::Int(3)).is_ok());
        assert!(matches!(
            FieldType::Int.check("a", &Constant::from("x")),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(FieldType::Str(3).check("a", &Constant::from("abc")).is_ok());
        assert!(matches!(
            FieldType::Str(3).check("a", &Constant::from("abcd")),
            Err(StoreError::ValueTooLong { len: 4, max: 3, .. })
        ));
    }
}
