use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;
use tracing::trace;

use okapi_chain::block::{self, Header};
use okapi_chain::serialization::{BitcoinDeserialize, BitcoinSerialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::FileStorage;
use crate::primitives::{HashTable, Link, RecordManager};
use crate::store;

use super::transactions::TxLink;
use super::{read_u32, write_u32, write_u32_at};

bitflags! {
    /// Validation and chain membership state of a stored header.
    ///
    /// At most one of `CANDIDATE`/`CONFIRMED` and at most one of
    /// `VALID`/`INVALID` is set; `POOLED` excludes both chain bits.
    pub struct BlockState: u8 {
        /// Stored but on neither index.
        const POOLED = 0b0000_0001;
        const VALID = 0b0000_0010;
        const INVALID = 0b0000_0100;
        const CANDIDATE = 0b0000_1000;
        const CONFIRMED = 0b0001_0000;
    }
}

/// A link into the block record table.
pub type BlockLink = u32;

// Value layout of a block record, after the key and chain link:
// [ header:80 | median_time_past:4 | checksum:4 | state:1 | height:4
//   | tx_start:4 | tx_count:4 ]
//
// The header bytes and height are immutable once stored; the remaining
// fields are guarded by the metadata mutex.
const HEADER_OFFSET: u64 = 0;
const MEDIAN_TIME_PAST_OFFSET: u64 = 80;
const CHECKSUM_OFFSET: u64 = 84;
const STATE_OFFSET: u64 = 88;
const HEIGHT_OFFSET: u64 = 89;
const TX_START_OFFSET: u64 = 93;
const TX_COUNT_OFFSET: u64 = 97;
const VALUE_SIZE: u64 = 101;

const RECORD_SIZE: u64 = 32 + <BlockLink as Link>::SIZE + VALUE_SIZE;

/// The tx-association sentinel for headers without transactions.
const NO_ASSOCIATION: u32 = std::u32::MAX;

type BlockTable = HashTable<RecordManager<BlockLink>, block::Hash>;
type IndexManager = RecordManager<BlockLink>;

/// A read-only snapshot of a stored block record.
#[derive(Clone, Debug)]
pub struct BlockResult {
    pub link: BlockLink,
    pub hash: block::Hash,
    pub header: Header,
    pub height: u32,
    pub median_time_past: u32,
    pub checksum: u32,
    pub state: BlockState,
    pub tx_start: u32,
    pub tx_count: u32,
}

impl BlockResult {
    pub fn is_pooled(&self) -> bool {
        self.state.contains(BlockState::POOLED)
    }

    pub fn is_candidate(&self) -> bool {
        self.state.contains(BlockState::CANDIDATE)
    }

    pub fn is_confirmed(&self) -> bool {
        self.state.contains(BlockState::CONFIRMED)
    }

    pub fn is_invalid(&self) -> bool {
        self.state.contains(BlockState::INVALID)
    }

    pub fn is_associated(&self) -> bool {
        self.tx_start != NO_ASSOCIATION && self.tx_count > 0
    }
}

/// Stores block headers, each with a run of transaction references.
///
/// Lookup is possible by hash (the record table) or by height (the
/// candidate and confirmed indexes, which are strict stacks of record
/// links).
pub struct BlockDatabase {
    table_file: Arc<FileStorage>,
    table: BlockTable,

    candidate_file: Arc<FileStorage>,
    candidate_index: IndexManager,

    confirmed_file: Arc<FileStorage>,
    confirmed_index: IndexManager,

    // The association table between blocks and their transactions. A
    // block's transactions are a contiguous run of tx-table links here, so
    // block records stay fixed-size.
    tx_index_file: Arc<FileStorage>,
    tx_index: IndexManager,

    /// Provides atomicity for checksum, tx_start, tx_count, and state.
    metadata_mutex: RwLock<()>,
}

impl BlockDatabase {
    pub fn new(settings: &Config) -> Result<Self> {
        let directory = &settings.directory;
        let growth = settings.file_growth_rate;
        let buckets = settings.block_table_buckets as u64;

        let table_file = Arc::new(FileStorage::open(
            &directory.join(store::BLOCK_TABLE),
            settings.block_table_size,
            growth,
        )?);
        let table = HashTable::new(
            RecordManager::new(
                table_file.clone(),
                BlockTable::header_size(buckets),
                RECORD_SIZE,
            ),
            buckets,
        );

        let candidate_file = Arc::new(FileStorage::open(
            &directory.join(store::CANDIDATE_INDEX),
            settings.candidate_index_size,
            growth,
        )?);
        let candidate_index =
            RecordManager::new(candidate_file.clone(), 0, <BlockLink as Link>::SIZE);

        let confirmed_file = Arc::new(FileStorage::open(
            &directory.join(store::CONFIRMED_INDEX),
            settings.confirmed_index_size,
            growth,
        )?);
        let confirmed_index =
            RecordManager::new(confirmed_file.clone(), 0, <BlockLink as Link>::SIZE);

        let tx_index_file = Arc::new(FileStorage::open(
            &directory.join(store::TRANSACTION_INDEX),
            settings.transaction_index_size,
            growth,
        )?);
        let tx_index = RecordManager::new(tx_index_file.clone(), 0, <TxLink as Link>::SIZE);

        Ok(Self {
            table_file,
            table,
            candidate_file,
            candidate_index,
            confirmed_file,
            confirmed_index,
            tx_index_file,
            tx_index,
            metadata_mutex: RwLock::new(()),
        })
    }

    // Startup and shutdown.

    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        self.candidate_index.create()?;
        self.confirmed_index.create()?;
        self.tx_index.create()
    }

    pub fn open(&self) -> Result<()> {
        self.table.start()?;
        self.candidate_index.start()?;
        self.confirmed_index.start()?;
        self.tx_index.start()
    }

    pub fn commit(&self) -> Result<()> {
        self.tx_index.commit()?;
        self.candidate_index.commit()?;
        self.confirmed_index.commit()?;
        self.table.commit()
    }

    pub fn flush(&self) -> Result<()> {
        self.table_file.flush()?;
        self.candidate_file.flush()?;
        self.confirmed_file.flush()?;
        self.tx_index_file.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.table_file.close()?;
        self.candidate_file.close()?;
        self.confirmed_file.close()?;
        self.tx_index_file.close()
    }

    // Queries.

    /// The height of the highest candidate or confirmed block.
    pub fn top(&self, candidate: bool) -> Option<u32> {
        let count = self.index(candidate).count();
        if count == 0 {
            None
        } else {
            Some((count - 1) as u32)
        }
    }

    /// Fetch a block record by index height.
    pub fn get_at(&self, height: u32, candidate: bool) -> Option<BlockResult> {
        let index = self.index(candidate);
        if height as u64 >= index.count() {
            return None;
        }

        let link = self.index_link(index, height);
        Some(self.read_result(link))
    }

    /// Fetch a block record by hash.
    pub fn get(&self, hash: &block::Hash) -> Option<BlockResult> {
        let link = self.table.find(hash)?.link();
        Some(self.read_result(link))
    }

    /// The transaction-table links associated with `result`'s block.
    pub fn transaction_links(&self, result: &BlockResult) -> Vec<TxLink> {
        if !result.is_associated() {
            return Vec::new();
        }

        let access = self.tx_index.storage().access();
        (0..result.tx_count)
            .map(|position| {
                let offset = self.tx_index.offset(result.tx_start + position);
                TxLink::read(access.read(offset, <TxLink as Link>::SIZE as usize))
            })
            .collect()
    }

    // Writers.

    /// Store a header at `height`, pooled and unvalidated.
    ///
    /// The caller ensures the header is not already present.
    pub fn store(&self, header: &Header, height: u32, median_time_past: u32) -> Result<BlockLink> {
        let hash = header.hash();
        let header_bytes = header
            .bitcoin_serialize_to_vec()
            .expect("serializing a header into memory cannot fail");

        let element = self.table.allocate(&hash, VALUE_SIZE, |value| {
            value[HEADER_OFFSET as usize..][..Header::LEN].copy_from_slice(&header_bytes);
            write_u32(value, MEDIAN_TIME_PAST_OFFSET, median_time_past);
            write_u32(value, CHECKSUM_OFFSET, 0);
            value[STATE_OFFSET as usize] = BlockState::POOLED.bits();
            write_u32(value, HEIGHT_OFFSET, height);
            write_u32(value, TX_START_OFFSET, NO_ASSOCIATION);
            write_u32(value, TX_COUNT_OFFSET, 0);
        })?;
        self.table.link(&element);

        trace!(?hash, height, "stored header");
        Ok(element.link())
    }

    /// Populate a stored block's transaction associations.
    ///
    /// `tx_links` are the transaction-table links of the block's
    /// transactions, in block order. The block's state is unchanged.
    pub fn update(&self, hash: &block::Hash, tx_links: &[TxLink]) -> Result<()> {
        let element = self.table.find(hash).ok_or(Error::NotFound)?;
        let value_offset = element.value_offset();

        let tx_start = self.associate(tx_links)?;

        // The checksum mirrors the hash prefix so compact-block style
        // queries can skip reading the header bytes.
        let checksum = u32::read(&hash.0[..4]);

        let _guard = self.metadata_mutex.write();
        let access = self.table_file.access();
        write_u32_at(&access, value_offset + TX_START_OFFSET, tx_start);
        write_u32_at(&access, value_offset + TX_COUNT_OFFSET, tx_links.len() as u32);
        write_u32_at(&access, value_offset + CHECKSUM_OFFSET, checksum);
        Ok(())
    }

    /// Promote an unvalidated block to valid or invalid.
    pub fn validate(&self, hash: &block::Hash, valid: bool) -> Result<()> {
        let element = self.table.find(hash).ok_or(Error::NotFound)?;
        let value_offset = element.value_offset();

        let _guard = self.metadata_mutex.write();
        let mut state = self.read_state(value_offset);
        state.remove(BlockState::VALID | BlockState::INVALID);
        state.insert(if valid {
            BlockState::VALID
        } else {
            BlockState::INVALID
        });
        self.write_state(value_offset, state);
        Ok(())
    }

    /// Promote a pooled block to candidate, or a candidate to confirmed,
    /// appending its link to the corresponding height index.
    ///
    /// The indexes are strict stacks: `height` must be exactly the current
    /// top plus one.
    pub fn promote(&self, hash: &block::Hash, height: u32, candidate: bool) -> Result<()> {
        let element = self.table.find(hash).ok_or(Error::NotFound)?;
        let link = element.link();
        let value_offset = element.value_offset();

        let _guard = self.metadata_mutex.write();

        if self.read_height(value_offset) != height {
            return Err(Error::BlockInvalidHeight);
        }

        let index = self.index(candidate);
        if index.count() != height as u64 {
            return Err(Error::BlockInvalidHeight);
        }

        let expected = if candidate {
            BlockState::POOLED
        } else {
            BlockState::CANDIDATE
        };
        let target = if candidate {
            BlockState::CANDIDATE
        } else {
            BlockState::CONFIRMED
        };

        let mut state = self.read_state(value_offset);
        if !state.contains(expected) {
            return Err(Error::OperationFailed);
        }

        self.push_link(index, link)?;
        state.remove(expected);
        state.insert(target);
        self.write_state(value_offset, state);

        trace!(?hash, height, candidate, "promoted block");
        Ok(())
    }

    /// Demote the candidate or confirmed block at the top of its index back
    /// to pooled, truncating the index by one.
    pub fn demote(&self, hash: &block::Hash, height: u32, candidate: bool) -> Result<()> {
        let element = self.table.find(hash).ok_or(Error::NotFound)?;
        let link = element.link();
        let value_offset = element.value_offset();

        let _guard = self.metadata_mutex.write();

        let index = self.index(candidate);
        if index.count() != height as u64 + 1 {
            return Err(Error::BlockInvalidHeight);
        }

        if self.index_link(index, height) != link {
            return Err(Error::BlockInvalidHash);
        }

        let target = if candidate {
            BlockState::CANDIDATE
        } else {
            BlockState::CONFIRMED
        };

        let mut state = self.read_state(value_offset);
        if !state.contains(target) {
            return Err(Error::OperationFailed);
        }

        index.truncate(height as u64);
        state.remove(target);
        state.insert(BlockState::POOLED);
        self.write_state(value_offset, state);

        trace!(?hash, height, candidate, "demoted block");
        Ok(())
    }

    // Index utilities.

    fn index(&self, candidate: bool) -> &IndexManager {
        if candidate {
            &self.candidate_index
        } else {
            &self.confirmed_index
        }
    }

    fn index_link(&self, index: &IndexManager, height: u32) -> BlockLink {
        let access = index.storage().access();
        BlockLink::read(access.read(index.offset(height), <BlockLink as Link>::SIZE as usize))
    }

    fn push_link(&self, index: &IndexManager, link: BlockLink) -> Result<()> {
        let slot = index.allocate(1)?;
        let access = index.storage().access();
        let mut word = [0u8; 4];
        link.write(&mut word);
        access.write(index.offset(slot), &word);
        Ok(())
    }

    /// Append the run of transaction links to the association table.
    fn associate(&self, tx_links: &[TxLink]) -> Result<u32> {
        if tx_links.is_empty() {
            return Ok(NO_ASSOCIATION);
        }

        let start = self.tx_index.allocate(tx_links.len() as u64)?;
        let access = self.tx_index.storage().access();
        for (position, tx_link) in tx_links.iter().enumerate() {
            let mut word = [0u8; 8];
            tx_link.write(&mut word);
            access.write(self.tx_index.offset(start + position as u32), &word);
        }

        Ok(start)
    }

    fn read_result(&self, link: BlockLink) -> BlockResult {
        let element = self.table.get(link);
        let hash = element.key();

        let _guard = self.metadata_mutex.read();
        element.read(|value| BlockResult {
            link,
            hash,
            header: Header::bitcoin_deserialize(&value[..Header::LEN])
                .expect("stored header bytes parse"),
            height: read_u32(value, HEIGHT_OFFSET),
            median_time_past: read_u32(value, MEDIAN_TIME_PAST_OFFSET),
            checksum: read_u32(value, CHECKSUM_OFFSET),
            state: BlockState::from_bits_truncate(value[STATE_OFFSET as usize]),
            tx_start: read_u32(value, TX_START_OFFSET),
            tx_count: read_u32(value, TX_COUNT_OFFSET),
        })
    }

    fn read_state(&self, value_offset: u64) -> BlockState {
        let access = self.table_file.access();
        BlockState::from_bits_truncate(access.read(value_offset + STATE_OFFSET, 1)[0])
    }

    fn write_state(&self, value_offset: u64, state: BlockState) {
        let access = self.table_file.access();
        access.write(value_offset + STATE_OFFSET, &[state.bits()]);
    }

    fn read_height(&self, value_offset: u64) -> u32 {
        let access = self.table_file.access();
        u32::read(access.read(value_offset + HEIGHT_OFFSET, 4))
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use okapi_chain::parameters::{genesis_block, Network};

    use super::*;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            directory: dir.path().to_owned(),
            block_table_buckets: 16,
            transaction_table_buckets: 16,
            ..Config::default()
        }
    }

    fn database(dir: &TempDir) -> BlockDatabase {
        let database = BlockDatabase::new(&test_config(dir)).unwrap();
        database.create().unwrap();
        database
    }

    fn genesis_header() -> Header {
        genesis_block(Network::Mainnet).header
    }

    #[test]
    fn store_get_roundtrip() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();

        database.store(&header, 0, 1_231_006_505).unwrap();

        let result = database.get(&header.hash()).expect("stored block resolves");
        assert_eq!(result.header, header);
        assert_eq!(result.height, 0);
        assert_eq!(result.median_time_past, 1_231_006_505);
        assert!(result.is_pooled());
        assert!(!result.is_associated());
    }

    #[test]
    fn missing_hash_is_not_found() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        assert!(database.get(&block::Hash([0x42; 32])).is_none());
    }

    #[test]
    fn promote_appends_and_demote_truncates() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();
        let hash = header.hash();

        database.store(&header, 0, 0).unwrap();
        assert_eq!(database.top(true), None);

        database.promote(&hash, 0, true).unwrap();
        assert_eq!(database.top(true), Some(0));
        assert!(database.get(&hash).unwrap().is_candidate());
        assert_eq!(database.get_at(0, true).unwrap().hash, hash);

        database.demote(&hash, 0, true).unwrap();
        assert_eq!(database.top(true), None);
        assert!(database.get(&hash).unwrap().is_pooled());
    }

    #[test]
    fn promote_rejects_height_gaps() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();

        database.store(&header, 2, 0).unwrap();

        // The index is empty, so height 2 is not the next slot.
        match database.promote(&header.hash(), 2, true) {
            Err(Error::BlockInvalidHeight) => {}
            other => panic!("expected invalid height, got {:?}", other),
        }
    }

    #[test]
    fn confirmed_promotion_requires_candidate_state() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();
        let hash = header.hash();

        database.store(&header, 0, 0).unwrap();
        assert!(database.promote(&hash, 0, false).is_err());

        database.promote(&hash, 0, true).unwrap();
        database.promote(&hash, 0, false).unwrap();

        let result = database.get(&hash).unwrap();
        assert!(result.is_confirmed());
        assert!(!result.is_candidate());
    }

    #[test]
    fn validate_sets_exactly_one_bit() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();
        let hash = header.hash();

        database.store(&header, 0, 0).unwrap();

        database.validate(&hash, false).unwrap();
        assert!(database.get(&hash).unwrap().is_invalid());

        database.validate(&hash, true).unwrap();
        let result = database.get(&hash).unwrap();
        assert!(result.state.contains(BlockState::VALID));
        assert!(!result.is_invalid());
    }

    #[test]
    fn update_associates_transactions() {
        let dir = TempDir::new("block_database").unwrap();
        let database = database(&dir);
        let header = genesis_header();
        let hash = header.hash();

        database.store(&header, 0, 0).unwrap();
        database.update(&hash, &[8, 80, 800]).unwrap();

        let result = database.get(&hash).unwrap();
        assert_eq!(result.tx_count, 3);
        assert_eq!(database.transaction_links(&result), vec![8, 80, 800]);
        assert_eq!(result.checksum, u32::from_le_bytes([hash.0[0], hash.0[1], hash.0[2], hash.0[3]]));
    }

    #[test]
    fn watermarks_survive_reopen() {
        let dir = TempDir::new("block_database").unwrap();
        let header = genesis_header();
        let hash = header.hash();

        {
            let database = database(&dir);
            database.store(&header, 0, 0).unwrap();
            database.promote(&hash, 0, true).unwrap();
            database.commit().unwrap();
            database.flush().unwrap();
            database.close().unwrap();
        }

        let database = BlockDatabase::new(&test_config(&dir)).unwrap();
        database.open().unwrap();
        assert_eq!(database.top(true), Some(0));
        assert_eq!(database.get_at(0, true).unwrap().hash, hash);
    }
}
