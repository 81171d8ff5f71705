/// Errors raised by a record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table `{table}` has no field `{field}`")]
    UnknownField { table: String, field: String },

    #[error("field `{field}` expects {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("value for `{field}` is {len} bytes, the field holds at most {max}")]
    ValueTooLong {
        field: String,
        len: usize,
        max: usize,
    },

    #[error("scan on `{table}` is not positioned on a record")]
    NoCurrentRecord { table: String },

    #[error("schema of `{table}` does not fit a single block ({len} bytes)")]
    RecordTooLarge { table: String, len: usize },

    #[error("malformed record in `{table}` at offset {offset}")]
    Malformed { table: String, offset: u64 },
}

/// Errors raised by the extensible hash index
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The directory no longer satisfies its structural invariants. The index
    /// has to be rebuilt from the base table.
    #[error("directory of index `{index}` is corrupt: {reason}")]
    DirectoryCorrupt { index: String, reason: String },

    #[error("bucket `{bucket}` unavailable: {source}")]
    BucketUnavailable {
        bucket: String,
        #[source]
        source: StoreError,
    },

    #[error("insert into index `{index}` gave up after {splits} bucket splits")]
    SplitLimitExceeded { index: String, splits: u32 },

    #[error("index handle is not positioned, call before_first first")]
    NotPositioned,

    #[error("invalid index configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("unsupported index type `{0}`")]
    UnsupportedIndexType(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    pub(crate) fn corrupt(index: &str, reason: impl Into<String>) -> Self {
        IndexError::DirectoryCorrupt {
            index: index.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn bucket(bucket: &str) -> impl FnOnce(StoreError) -> Self + '_ {
        move |source| IndexError::BucketUnavailable {
            bucket: bucket.to_string(),
            source,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
