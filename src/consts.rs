/// Size of one block in a file-backed table
pub const PAGE_SIZE: usize = 4096;

/// Block size the planner assumes when estimating records per block
pub const BLOCK_SIZE: usize = PAGE_SIZE;

/// One byte in front of every record slot, 1 when the slot holds a live record
pub const SLOT_HEADER: usize = 1;

pub const INT_LENGTH: usize = 4;

/// Strings are stored as a u16 length followed by the padded bytes
pub const STRING_LENGTH_HEADER: usize = 2;

/// Maximum number of index entries a bucket holds before it has to split
pub const DEFAULT_BUCKET_CAPACITY: usize = 16;

pub const DEFAULT_MAX_SPLITS_PER_INSERT: u32 = 16;

pub const DEFAULT_MAX_GLOBAL_DEPTH: u32 = 20;

/// Hard ceiling for `max_global_depth`, the directory holds `2^depth` rows
pub const GLOBAL_DEPTH_CEILING: u32 = 24;

/// Global depth of a freshly created directory
pub const INITIAL_GLOBAL_DEPTH: u32 = 1;

/// Suffix appended to the index name to name its directory table
pub const DIRECTORY_TABLE_SUFFIX: &str = ".dir";

/// Declared length of the bucket name column in the directory table
pub const BUCKET_NAME_LENGTH: usize = 20;

pub const DIR_BITS_FIELD: &str = "bits";
pub const DIR_FILENAME_FIELD: &str = "filename";
pub const DIR_LOCAL_DEPTH_FIELD: &str = "localdepth";

pub const BLOCK_FIELD: &str = "block";
pub const ID_FIELD: &str = "id";
pub const DATAVAL_FIELD: &str = "dataval";
