//! Storage configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Database configuration settings.
///
/// Bucket counts must be configured before a store can be created; the
/// defaults deliberately leave them at zero so that an unconfigured store
/// fails fast instead of hashing everything into one chain.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The root directory for all database files.
    pub directory: PathBuf,

    /// Flush to disk on every write, guarded by the flush sentinel.
    ///
    /// Slow, but a crash mid-write is detected on the next open instead of
    /// silently reusing a possibly corrupt store.
    pub flush_writes: bool,

    /// Unspent-output cache capacity, in transactions. `0` disables the
    /// cache.
    pub cache_capacity: u32,

    /// File expansion padding applied on remap, in percent of the current
    /// capacity. `0` grows files to exactly the requested size.
    pub file_growth_rate: u16,

    /// Hash table bucket counts.
    pub block_table_buckets: u32,
    pub transaction_table_buckets: u32,
    pub payment_table_buckets: u32,
    pub neutrino_filter_table_buckets: u32,

    /// Minimum file sizes, in bytes.
    pub block_table_size: u64,
    pub candidate_index_size: u64,
    pub confirmed_index_size: u64,
    pub transaction_index_size: u64,
    pub transaction_table_size: u64,
    pub payment_table_size: u64,
    pub payment_index_size: u64,
    pub neutrino_filter_table_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("blockchain"),
            flush_writes: false,
            cache_capacity: 0,
            file_growth_rate: 5,

            // Hash table sizes (must be configured).
            block_table_buckets: 0,
            transaction_table_buckets: 0,
            payment_table_buckets: 0,
            neutrino_filter_table_buckets: 0,

            // Minimum file sizes.
            block_table_size: 1,
            candidate_index_size: 1,
            confirmed_index_size: 1,
            transaction_index_size: 1,
            transaction_table_size: 1,
            payment_table_size: 1,
            payment_index_size: 1,
            neutrino_filter_table_size: 1,
        }
    }
}

impl Config {
    /// Settings sized for a mainnet chain.
    pub fn mainnet(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            block_table_buckets: 650_000,
            transaction_table_buckets: 110_000_000,
            payment_table_buckets: 107_000_000,
            neutrino_filter_table_buckets: 650_000,
            block_table_size: 80_000_000,
            candidate_index_size: 3_000_000,
            confirmed_index_size: 3_000_000,
            transaction_index_size: 3_000_000_000,
            transaction_table_size: 220_000_000_000,
            payment_table_size: 100_000_000,
            payment_index_size: 100_000_000_000,
            neutrino_filter_table_size: 80_000_000,
            ..Self::default()
        }
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// `catalog` and `filters` select which optional indexes must be
    /// configured.
    pub(crate) fn validate(&self, catalog: bool, filters: bool) -> Result<()> {
        if self.block_table_buckets == 0 || self.transaction_table_buckets == 0 {
            return Err(Error::OperationFailed);
        }

        if catalog && self.payment_table_buckets == 0 {
            return Err(Error::OperationFailed);
        }

        if filters && self.neutrino_filter_table_buckets == 0 {
            return Err(Error::OperationFailed);
        }

        Ok(())
    }
}
