use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use okapi_chain::block;
use okapi_chain::compactint::CompactInt;
use okapi_chain::serialization::{BitcoinDeserialize, BitcoinSerialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::FileStorage;
use crate::primitives::{HashTable, SlabManager};
use crate::store;

/// The BIP-158 basic filter type; the only type this store accepts.
pub const FILTER_TYPE_BASIC: u8 = 0;

/// A link into the filter slab table.
pub type FilterLink = u64;

// Slab value layout, after the key and chain link:
// [ filter_header:32 | filter:varint + bytes ]
const FILTER_HEADER_SIZE: u64 = 32;

type FilterTable = HashTable<SlabManager<FilterLink>, block::Hash>;

/// A stored compact filter and its header-chain entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterResult {
    pub block_hash: block::Hash,
    pub header: [u8; 32],
    pub filter: Vec<u8>,
}

/// Stores BIP-157/158 neutrino filters keyed by block hash, plus the
/// in-memory filter-header checkpoint list served to peers.
pub struct FilterDatabase {
    table_file: Arc<FileStorage>,
    table: FilterTable,
    checkpoints: RwLock<Vec<block::Hash>>,
    filter_type: u8,
}

impl FilterDatabase {
    pub fn new(settings: &Config) -> Result<Self> {
        let buckets = settings.neutrino_filter_table_buckets as u64;

        let table_file = Arc::new(FileStorage::open(
            &settings.directory.join(store::NEUTRINO_FILTER_TABLE),
            settings.neutrino_filter_table_size,
            settings.file_growth_rate,
        )?);
        let table = HashTable::new(
            SlabManager::new(table_file.clone(), FilterTable::header_size(buckets)),
            buckets,
        );

        Ok(Self {
            table_file,
            table,
            checkpoints: RwLock::new(Vec::new()),
            filter_type: FILTER_TYPE_BASIC,
        })
    }

    // Startup and shutdown.

    pub fn create(&self) -> Result<()> {
        self.table.create()
    }

    pub fn open(&self) -> Result<()> {
        self.table.start()
    }

    pub fn commit(&self) -> Result<()> {
        self.table.commit()
    }

    pub fn flush(&self) -> Result<()> {
        self.table_file.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.table_file.close()
    }

    // Queries.

    /// Fetch the filter stored for a block.
    pub fn get(&self, block_hash: &block::Hash) -> Option<FilterResult> {
        let element = self.table.find(block_hash)?;

        element.read(|value| {
            let mut header = [0u8; 32];
            header.copy_from_slice(&value[..FILTER_HEADER_SIZE as usize]);

            let mut body = &value[FILTER_HEADER_SIZE as usize..];
            let length = CompactInt::bitcoin_deserialize(&mut body).ok()?.value() as usize;

            Some(FilterResult {
                block_hash: *block_hash,
                header,
                filter: body.get(..length)?.to_vec(),
            })
        })
    }

    /// The published filter-header checkpoint list.
    pub fn checkpoints(&self) -> Vec<block::Hash> {
        self.checkpoints.read().clone()
    }

    /// Replace the filter-header checkpoint list.
    pub fn set_checkpoints(&self, checkpoints: Vec<block::Hash>) {
        *self.checkpoints.write() = checkpoints;
    }

    // Writers.

    /// Store a filter for `block_hash`.
    ///
    /// Rejects filter types other than the basic type this database was
    /// built for.
    pub fn store(
        &self,
        block_hash: &block::Hash,
        filter_type: u8,
        header: &[u8; 32],
        filter: &[u8],
    ) -> Result<FilterLink> {
        if filter_type != self.filter_type {
            return Err(Error::OperationFailed);
        }

        let length = CompactInt::from(filter.len())
            .bitcoin_serialize_to_vec()
            .expect("serializing a varint into memory cannot fail");
        let value_size = FILTER_HEADER_SIZE + length.len() as u64 + filter.len() as u64;

        let element = self.table.allocate(block_hash, value_size, |value| {
            value[..32].copy_from_slice(header);
            value[32..32 + length.len()].copy_from_slice(&length);
            value[32 + length.len()..].copy_from_slice(filter);
        })?;
        self.table.link(&element);

        trace!(?block_hash, bytes = filter.len(), "stored filter");
        Ok(element.link())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn database(dir: &TempDir) -> FilterDatabase {
        let settings = Config {
            directory: dir.path().to_owned(),
            neutrino_filter_table_buckets: 8,
            block_table_buckets: 8,
            transaction_table_buckets: 8,
            ..Config::default()
        };
        let database = FilterDatabase::new(&settings).unwrap();
        database.create().unwrap();
        database
    }

    #[test]
    fn store_get_roundtrip() {
        let dir = TempDir::new("filter_database").unwrap();
        let database = database(&dir);

        let hash = block::Hash([5; 32]);
        let header = [9; 32];
        let filter = vec![1, 2, 3, 4, 5];

        database
            .store(&hash, FILTER_TYPE_BASIC, &header, &filter)
            .unwrap();

        let result = database.get(&hash).expect("stored filter resolves");
        assert_eq!(result.header, header);
        assert_eq!(result.filter, filter);
    }

    #[test]
    fn unknown_filter_types_are_rejected() {
        let dir = TempDir::new("filter_database").unwrap();
        let database = database(&dir);

        assert!(database
            .store(&block::Hash([0; 32]), 1, &[0; 32], &[])
            .is_err());
    }

    #[test]
    fn checkpoints_replace_wholesale() {
        let dir = TempDir::new("filter_database").unwrap();
        let database = database(&dir);
        assert!(database.checkpoints().is_empty());

        let list = vec![block::Hash([1; 32]), block::Hash([2; 32])];
        database.set_checkpoints(list.clone());
        assert_eq!(database.checkpoints(), list);
    }
}
