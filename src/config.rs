use crate::consts::*;
use crate::error::{IndexError, Result};

/// Tunables of an extensible hash index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Number of entries a bucket may hold before an insert splits it
    pub bucket_capacity: usize,

    /// Upper bound on consecutive splits a single insert may trigger
    pub max_splits_per_insert: u32,

    /// The directory never grows past `2^max_global_depth` rows
    pub max_global_depth: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            max_splits_per_insert: DEFAULT_MAX_SPLITS_PER_INSERT,
            max_global_depth: DEFAULT_MAX_GLOBAL_DEPTH,
        }
    }
}

impl IndexConfig {
    pub fn with_bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    pub fn with_max_splits_per_insert(mut self, splits: u32) -> Self {
        self.max_splits_per_insert = splits;
        self
    }

    pub fn with_max_global_depth(mut self, depth: u32) -> Self {
        self.max_global_depth = depth;
        self
    }

    /// Checks the configuration on its own and against the name of the index
    /// it is going to be used for.
    ///
    /// Bucket names are `index_name + suffix` and have to fit the bucket name
    /// column of the directory table for every suffix the directory can reach.
    /// Names may not end in a digit: the suffix is all digits, so `a` with
    /// suffix 10 and `a1` with suffix 0 would share the bucket `a10`.
    pub fn validate(&self, index_name: &str) -> Result<()> {
        if self.max_global_depth < INITIAL_GLOBAL_DEPTH
            || self.max_global_depth > GLOBAL_DEPTH_CEILING
        {
            return Err(invalid(format!(
                "max_global_depth must be within {}..={}, got {}",
                INITIAL_GLOBAL_DEPTH, GLOBAL_DEPTH_CEILING, self.max_global_depth
            )));
        }

        if index_name.is_empty()
            || !index_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid(format!(
                "index name `{}` must be non-empty ascii alphanumeric or `_`",
                index_name
            )));
        }

        if index_name.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid(format!(
                "index name `{}` must not end in a digit",
                index_name
            )));
        }

        let widest_suffix = ((1u64 << self.max_global_depth) - 1).to_string().len();
        if index_name.len() + widest_suffix > BUCKET_NAME_LENGTH {
            return Err(invalid(format!(
                "index name `{}` leaves no room for {} suffix digits in a {} character bucket name",
                index_name, widest_suffix, BUCKET_NAME_LENGTH
            )));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> IndexError {
    IndexError::InvalidConfig { reason }
}
