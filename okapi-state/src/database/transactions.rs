use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use okapi_chain::block::Block;
use okapi_chain::serialization::{BitcoinDeserialize, BitcoinSerialize};
use okapi_chain::transaction::{self, Transaction};
use okapi_chain::transparent::OutPoint;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::FileStorage;
use crate::primitives::{HashTable, Link, SlabManager};
use crate::store;

use super::unspent_outputs::{UnspentOutput, UnspentOutputs};
use super::{read_u32, write_u32, write_u32_at};

/// A link into the transaction slab table.
pub type TxLink = u64;

/// Sentinel height of a transaction not yet in a confirmed block.
pub const UNCONFIRMED_HEIGHT: u32 = std::u32::MAX;

/// Sentinel position of a pooled transaction.
pub const POOLED_POSITION: u32 = std::u32::MAX;

/// Sentinel spender height of an unspent output.
pub const UNSPENT: u32 = std::u32::MAX;

// Value layout of a transaction slab, after the key and chain link:
// [ height:4 | position:4 | median_time_past:4 | cataloged:1
//   | output_count:4 | { spender_height:4, candidate_spent:1 } × outputs
//   | transaction bytes ]
//
// The per-output spender fields are fixed-offset so spends update in place
// without rewriting the body.
const HEIGHT_OFFSET: u64 = 0;
const POSITION_OFFSET: u64 = 4;
const MEDIAN_TIME_PAST_OFFSET: u64 = 8;
const CATALOGED_OFFSET: u64 = 12;
const OUTPUT_COUNT_OFFSET: u64 = 13;
const OUTPUT_META_OFFSET: u64 = 17;
const OUTPUT_META_SIZE: u64 = 5;

type TxTable = HashTable<SlabManager<TxLink>, transaction::Hash>;

/// Spend metadata for one output.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputMetadata {
    /// The confirmed height of the spending transaction, or [`UNSPENT`].
    pub spender_height: u32,
    /// Whether a candidate block's transaction spends this output.
    pub candidate_spent: bool,
}

/// A read-only snapshot of a stored transaction record.
#[derive(Clone, Debug)]
pub struct TransactionResult {
    pub link: TxLink,
    pub hash: transaction::Hash,
    pub height: u32,
    pub position: u32,
    pub median_time_past: u32,
    pub cataloged: bool,
    pub transaction: Transaction,
    pub output_metadata: Vec<OutputMetadata>,
}

impl TransactionResult {
    /// Stored but not part of any confirmed block.
    pub fn is_pooled(&self) -> bool {
        self.height == UNCONFIRMED_HEIGHT
    }
}

/// Stores transactions keyed by hash, with in-place spend tracking.
///
/// Transaction state is derived, not stored: a transaction is pooled while
/// its height is the sentinel, and confirmed when a confirmed block at its
/// height references it through the association table.
pub struct TransactionDatabase {
    table_file: Arc<FileStorage>,
    table: TxTable,
    cache: UnspentOutputs,

    /// Provides atomicity for height, position, time, and spender fields.
    metadata_mutex: RwLock<()>,
}

impl TransactionDatabase {
    pub fn new(settings: &Config) -> Result<Self> {
        let buckets = settings.transaction_table_buckets as u64;

        let table_file = Arc::new(FileStorage::open(
            &settings.directory.join(store::TRANSACTION_TABLE),
            settings.transaction_table_size,
            settings.file_growth_rate,
        )?);
        let table = HashTable::new(
            SlabManager::new(table_file.clone(), TxTable::header_size(buckets)),
            buckets,
        );

        Ok(Self {
            table_file,
            table,
            cache: UnspentOutputs::new(settings.cache_capacity),
            metadata_mutex: RwLock::new(()),
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

    /// Fetch a transaction record by hash.
    pub fn get(&self, hash: &transaction::Hash) -> Option<TransactionResult> {
        let link = self.table.find(hash)?.link();
        self.get_by_link(link).ok()
    }

    /// The slab link of a stored transaction.
    pub fn get_link(&self, hash: &transaction::Hash) -> Option<TxLink> {
        Some(self.table.find(hash)?.link())
    }

    /// Fetch a transaction record by slab link.
    pub fn get_by_link(&self, link: TxLink) -> Result<TransactionResult> {
        let element = self.table.get(link);
        let hash = element.key();

        let _guard = self.metadata_mutex.read();
        element.read(|value| {
            let output_count = read_u32(value, OUTPUT_COUNT_OFFSET) as usize;
            let output_metadata = (0..output_count)
                .map(|index| {
                    let offset = (OUTPUT_META_OFFSET + index as u64 * OUTPUT_META_SIZE) as usize;
                    OutputMetadata {
                        spender_height: u32::read(&value[offset..]),
                        candidate_spent: value[offset + 4] != 0,
                    }
                })
                .collect();

            let body = &value[(OUTPUT_META_OFFSET + output_count as u64 * OUTPUT_META_SIZE) as usize..];
            let transaction =
                Transaction::bitcoin_deserialize(body).map_err(|_| Error::OperationFailed)?;

            Ok(TransactionResult {
                link,
                hash,
                height: read_u32(value, HEIGHT_OFFSET),
                position: read_u32(value, POSITION_OFFSET),
                median_time_past: read_u32(value, MEDIAN_TIME_PAST_OFFSET),
                cataloged: value[CATALOGED_OFFSET as usize] != 0,
                transaction,
                output_metadata,
            })
        })
    }

    /// Look up an unspent output, consulting the cache first.
    pub fn unspent_output(&self, outpoint: &OutPoint) -> Option<UnspentOutput> {
        if let Some(unspent) = self.cache.get(outpoint) {
            return Some(unspent);
        }

        let result = self.get(&outpoint.hash)?;
        let metadata = result.output_metadata.get(outpoint.index as usize)?;
        if metadata.spender_height != UNSPENT {
            return None;
        }

        Some(UnspentOutput {
            output: result.transaction.outputs.get(outpoint.index as usize)?.clone(),
            height: result.height,
            median_time_past: result.median_time_past,
            coinbase: result.transaction.is_coinbase(),
        })
    }

    /// The unspent-output cache, for inspection.
    pub fn cache(&self) -> &UnspentOutputs {
        &self.cache
    }

    // Writers.

    /// Store a transaction as pooled, returning its link.
    ///
    /// Storing an already stored transaction returns the existing link.
    pub fn store(&self, transaction: &Transaction) -> Result<TxLink> {
        let hash = transaction.hash();

        if let Some(element) = self.table.find(&hash) {
            return Ok(element.link());
        }

        let body = transaction.bitcoin_serialize_to_vec()?;
        let output_count = transaction.outputs.len() as u32;
        let metadata_size = OUTPUT_META_OFFSET + output_count as u64 * OUTPUT_META_SIZE;

        let element = self
            .table
            .allocate(&hash, metadata_size + body.len() as u64, |value| {
                write_u32(value, HEIGHT_OFFSET, UNCONFIRMED_HEIGHT);
                write_u32(value, POSITION_OFFSET, POOLED_POSITION);
                write_u32(value, MEDIAN_TIME_PAST_OFFSET, 0);
                value[CATALOGED_OFFSET as usize] = 0;
                write_u32(value, OUTPUT_COUNT_OFFSET, output_count);

                for index in 0..output_count as u64 {
                    let offset = (OUTPUT_META_OFFSET + index * OUTPUT_META_SIZE) as usize;
                    write_u32(value, offset as u64, UNSPENT);
                    value[offset + 4] = 0;
                }

                value[metadata_size as usize..].copy_from_slice(&body);
            })?;
        self.table.link(&element);

        trace!(?hash, "stored transaction");
        Ok(element.link())
    }

    /// Store any missing transactions of a block, returning all links in
    /// block order.
    pub fn store_all(&self, transactions: &[Arc<Transaction>]) -> Result<Vec<TxLink>> {
        transactions
            .iter()
            .map(|transaction| self.store(transaction))
            .collect()
    }

    /// Confirm a transaction at `height`, marking every spent previous
    /// output with the spender height.
    pub fn confirm(
        &self,
        link: TxLink,
        height: u32,
        median_time_past: u32,
        position: u32,
    ) -> Result<()> {
        let result = self.get_by_link(link)?;

        {
            let _guard = self.metadata_mutex.write();
            let access = self.table_file.access();
            let value_offset = self.table.get(link).value_offset();
            write_u32_at(&access, value_offset + HEIGHT_OFFSET, height);
            write_u32_at(&access, value_offset + POSITION_OFFSET, position);
            write_u32_at(&access, value_offset + MEDIAN_TIME_PAST_OFFSET, median_time_past);
        }

        for input in &result.transaction.inputs {
            if let Some(outpoint) = input.outpoint() {
                self.spend(&outpoint, height)?;
            }
        }

        self.cache.add(&result.transaction, height, median_time_past);
        Ok(())
    }

    /// Confirm all of a block's transactions, in block order.
    pub fn confirm_all(
        &self,
        tx_links: &[TxLink],
        height: u32,
        median_time_past: u32,
    ) -> Result<()> {
        for (position, link) in tx_links.iter().enumerate() {
            self.confirm(*link, height, median_time_past, position as u32)?;
        }

        Ok(())
    }

    /// Reverse a block's confirmations: restore the pooled sentinels and
    /// clear the spender heights of every spent previous output.
    pub fn unconfirm(&self, block: &Block) -> Result<()> {
        for transaction in block.transactions.iter().rev() {
            let hash = transaction.hash();
            let element = self.table.find(&hash).ok_or(Error::NotFound)?;

            {
                let _guard = self.metadata_mutex.write();
                let access = self.table_file.access();
                let value_offset = element.value_offset();
                write_u32_at(&access, value_offset + HEIGHT_OFFSET, UNCONFIRMED_HEIGHT);
                write_u32_at(&access, value_offset + POSITION_OFFSET, POOLED_POSITION);
                write_u32_at(&access, value_offset + MEDIAN_TIME_PAST_OFFSET, 0);
            }

            self.cache.remove_transaction(&hash);

            for input in &transaction.inputs {
                if let Some(outpoint) = input.outpoint() {
                    self.unspend(&outpoint)?;
                }
            }
        }

        Ok(())
    }

    /// Mark the outputs spent by this transaction as candidate-spent.
    pub fn candidate(&self, link: TxLink) -> Result<()> {
        self.set_candidate_spends(link, true)
    }

    /// Clear the candidate-spent marks of the outputs spent by this
    /// transaction.
    pub fn uncandidate(&self, link: TxLink) -> Result<()> {
        self.set_candidate_spends(link, false)
    }

    /// Record that a transaction's payments are indexed.
    pub fn set_cataloged(&self, link: TxLink) -> Result<()> {
        let _guard = self.metadata_mutex.write();
        let access = self.table_file.access();
        let value_offset = self.table.get(link).value_offset();
        access.write(value_offset + CATALOGED_OFFSET, &[1]);
        Ok(())
    }

    fn set_candidate_spends(&self, link: TxLink, spent: bool) -> Result<()> {
        let result = self.get_by_link(link)?;

        for input in &result.transaction.inputs {
            let outpoint = match input.outpoint() {
                Some(outpoint) => outpoint,
                None => continue,
            };

            // A pooled transaction may spend outputs this store has never
            // seen; candidate marking is best effort for those.
            let element = match self.table.find(&outpoint.hash) {
                Some(element) => element,
                None => continue,
            };

            let _guard = self.metadata_mutex.write();
            let access = self.table_file.access();
            let offset = self.spender_offset(&element, &outpoint)?;
            access.write(offset + 4, &[spent as u8]);
        }

        Ok(())
    }

    fn spend(&self, outpoint: &OutPoint, spender_height: u32) -> Result<()> {
        let element = self
            .table
            .find(&outpoint.hash)
            .ok_or(Error::OperationFailed)?;

        let _guard = self.metadata_mutex.write();
        let access = self.table_file.access();
        let offset = self.spender_offset(&element, outpoint)?;
        write_u32_at(&access, offset, spender_height);
        drop(access);

        self.cache.remove(outpoint);
        Ok(())
    }

    fn unspend(&self, outpoint: &OutPoint) -> Result<()> {
        let element = self
            .table
            .find(&outpoint.hash)
            .ok_or(Error::OperationFailed)?;

        let _guard = self.metadata_mutex.write();
        let access = self.table_file.access();
        let offset = self.spender_offset(&element, outpoint)?;
        write_u32_at(&access, offset, UNSPENT);
        Ok(())
    }

    /// The absolute offset of `outpoint`'s spender metadata.
    fn spender_offset(
        &self,
        element: &crate::primitives::Element<'_, SlabManager<TxLink>, transaction::Hash>,
        outpoint: &OutPoint,
    ) -> Result<u64> {
        let value_offset = element.value_offset();
        let output_count = {
            let access = self.table_file.access();
            u32::read(access.read(value_offset + OUTPUT_COUNT_OFFSET, 4))
        };

        if outpoint.index >= output_count {
            return Err(Error::OperationFailed);
        }

        Ok(value_offset + OUTPUT_META_OFFSET + outpoint.index as u64 * OUTPUT_META_SIZE)
    }
}
