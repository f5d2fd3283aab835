//! The data-base facade: multi-database write coordination and the header
//! and block reorganization flows.

mod blocks;
mod filters;
mod payments;
mod transactions;
mod unspent_outputs;

pub use blocks::{BlockDatabase, BlockLink, BlockResult, BlockState};
pub use filters::{FilterDatabase, FilterLink, FilterResult, FILTER_TYPE_BASIC};
pub use payments::{PaymentDatabase, PaymentKey, PaymentRecord};
pub use transactions::{
    TransactionDatabase, TransactionResult, TxLink, POOLED_POSITION, UNCONFIRMED_HEIGHT, UNSPENT,
};
pub use unspent_outputs::{UnspentOutput, UnspentOutputs};

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, trace};

use okapi_chain::block::{self, Block, Header};
use okapi_chain::transaction::Transaction;
use okapi_chain::transparent::{OutPoint, Output};

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::Accessor;
use crate::store::Store;
use crate::verify;

// Little-endian field helpers shared by the record layouts.

pub(crate) fn read_u32(value: &[u8], offset: u64) -> u32 {
    LittleEndian::read_u32(&value[offset as usize..])
}

pub(crate) fn write_u32(value: &mut [u8], offset: u64, word: u32) {
    LittleEndian::write_u32(&mut value[offset as usize..], word)
}

pub(crate) fn write_u32_at(access: &Accessor<'_>, offset: u64, word: u32) {
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, word);
    access.write(offset, &bytes);
}

/// The coordinated write surface over the block, transaction, payment, and
/// filter databases.
///
/// A failure after `begin_write` is returned without calling `end_write`.
/// This leaves the flush lock engaged, preventing use after restart until
/// the store is recovered externally.
pub struct Database {
    store: Store,
    blocks: BlockDatabase,
    transactions: TransactionDatabase,
    payments: Option<PaymentDatabase>,
    filters: Option<FilterDatabase>,

    /// Serializes writes that must be atomic across databases.
    write_mutex: Mutex<()>,
}

impl Database {
    // Open and close.

    /// Create a fresh store under the configured directory and insert the
    /// genesis block. Not idempotent.
    pub fn create(
        settings: Config,
        catalog: bool,
        filters: bool,
        genesis: &Block,
    ) -> Result<Database> {
        let database = Self::locked(settings, catalog, filters)?;

        database.blocks.create()?;
        database.transactions.create()?;
        if let Some(payments) = &database.payments {
            payments.create()?;
        }
        if let Some(filters) = &database.filters {
            filters.create()?;
        }

        database.push(genesis, 0, 0)?;

        info!(directory = ?database.store.directory(), "created store");
        Ok(database)
    }

    /// Open an existing store. Fails if another process holds it or if a
    /// previous run left the flush lock engaged.
    pub fn open(settings: Config, catalog: bool, filters: bool) -> Result<Database> {
        let database = Self::locked(settings, catalog, filters)?;

        database.blocks.open()?;
        database.transactions.open()?;
        if let Some(payments) = &database.payments {
            payments.open()?;
        }
        if let Some(filters) = &database.filters {
            filters.open()?;
        }

        debug!(directory = ?database.store.directory(), "opened store");
        Ok(database)
    }

    fn locked(settings: Config, catalog: bool, filters: bool) -> Result<Database> {
        settings.validate(catalog, filters)?;

        let store = Store::open(&settings.directory, settings.flush_writes)?;
        let blocks = BlockDatabase::new(&settings)?;
        let transactions = TransactionDatabase::new(&settings)?;
        let payments = if catalog {
            Some(PaymentDatabase::new(&settings)?)
        } else {
            None
        };
        let filters = if filters {
            Some(FilterDatabase::new(&settings)?)
        } else {
            None
        };

        Ok(Database {
            store,
            blocks,
            transactions,
            payments,
            filters,
            write_mutex: Mutex::new(()),
        })
    }

    /// Flush all databases to disk.
    pub fn flush(&self) -> Result<()> {
        self.blocks.flush()?;
        self.transactions.flush()?;
        if let Some(payments) = &self.payments {
            payments.flush()?;
        }
        if let Some(filters) = &self.filters {
            filters.flush()?;
        }

        debug!("write flushed to disk");
        Ok(())
    }

    /// Flush, truncate expansion padding, and release the exclusive lock.
    pub fn close(&self) -> Result<()> {
        self.blocks.close()?;
        self.transactions.close()?;
        if let Some(payments) = &self.payments {
            payments.close()?;
        }
        if let Some(filters) = &self.filters {
            filters.close()?;
        }

        self.store.close()
    }

    // Readers.

    pub fn blocks(&self) -> &BlockDatabase {
        &self.blocks
    }

    pub fn transactions(&self) -> &TransactionDatabase {
        &self.transactions
    }

    /// The payment index, when cataloging is enabled.
    pub fn payments(&self) -> Option<&PaymentDatabase> {
        self.payments.as_ref()
    }

    /// The neutrino filter database, when enabled.
    pub fn filters(&self) -> Option<&FilterDatabase> {
        self.filters.as_ref()
    }

    // Public writers.

    /// Store a pooled transaction.
    pub fn store_transaction(&self, transaction: &Transaction) -> Result<TxLink> {
        let _conditional = self.conditional_lock();

        verify::transaction_missing(&self.transactions, &transaction.hash())?;

        self.begin_write()?;
        let link = self.transactions.store(transaction)?;
        self.transactions.commit()?;
        metrics::counter!("state.transaction.stored", 1);
        self.end_write()?;
        Ok(link)
    }

    /// Index a stored transaction's payments.
    pub fn catalog_transaction(&self, transaction: &Transaction) -> Result<()> {
        let payments = match &self.payments {
            Some(payments) => payments,
            None => return Ok(()),
        };

        let _conditional = self.conditional_lock();

        let result = self
            .transactions
            .get(&transaction.hash())
            .ok_or(Error::NotFound)?;
        // Existence check prevents duplicated indexing.
        if result.cataloged {
            return Ok(());
        }

        self.begin_write()?;
        payments.catalog(result.link, transaction, |outpoint| {
            self.resolve_prevout(outpoint)
        })?;
        self.transactions.set_cataloged(result.link)?;
        payments.commit()?;
        self.end_write()
    }

    /// Index the payments of every not-yet-cataloged transaction of a
    /// stored block.
    pub fn catalog_block(&self, block: &Block) -> Result<()> {
        let payments = match &self.payments {
            Some(payments) => payments,
            None => return Ok(()),
        };

        let _conditional = self.conditional_lock();

        verify::block_exists(&self.blocks, &block.hash())?;

        self.begin_write()?;
        self.catalog_block_transactions(block)?;
        payments.commit()?;
        self.end_write()
    }

    /// Add the missing transactions of a stored block header.
    pub fn update(&self, block: &Block, height: u32) -> Result<()> {
        let _conditional = self.conditional_lock();

        verify::update(&self.blocks, block, height)?;

        self.begin_write()?;
        let links = self.transactions.store_all(&block.transactions)?;
        self.blocks.update(&block.hash(), &links)?;
        self.commit_all()?;
        self.end_write()
    }

    /// Promote an unvalidated block to valid or invalid.
    pub fn validate(&self, hash: &block::Hash, valid: bool) -> Result<()> {
        let _conditional = self.conditional_lock();

        verify::block_exists(&self.blocks, hash)?;

        self.begin_write()?;
        self.blocks.validate(hash, valid)?;
        self.end_write()
    }

    /// Mark a validated candidate block's spends as candidate spends.
    pub fn candidate(&self, block: &Block) -> Result<()> {
        let _conditional = self.conditional_lock();

        let hash = block.hash();
        let result = verify::block_exists(&self.blocks, &hash)?;
        if result.is_invalid() {
            return Err(Error::OperationFailed);
        }

        self.begin_write()?;
        self.blocks.validate(&hash, true)?;
        for transaction in &block.transactions {
            let link = self
                .transactions
                .get_link(&transaction.hash())
                .ok_or(Error::NotFound)?;
            self.transactions.candidate(link)?;
        }
        self.end_write()
    }

    /// Confirm the candidate block at `height`: mark its transactions
    /// confirmed and promote it onto the confirmed index.
    pub fn confirm(&self, hash: &block::Hash, height: u32) -> Result<()> {
        let _write = self.write_mutex.lock();

        let result = verify::confirm(&self.blocks, hash, height)?;

        self.begin_write()?;
        let links = self.blocks.transaction_links(&result);
        self.transactions
            .confirm_all(&links, height, result.median_time_past)?;
        self.blocks.promote(hash, height, false)?;
        self.commit_all()?;
        self.end_write()
    }

    // Header reorganization.

    /// Replace the candidate chain above `fork_point` with `incoming`,
    /// returning the replaced headers in ascending height order.
    pub fn reorganize_headers(
        &self,
        fork_point: &Checkpoint,
        incoming: &[Header],
    ) -> Result<Vec<Header>> {
        if fork_point.height as u64 + incoming.len() as u64 > u32::max_value() as u64 {
            return Err(Error::OperationFailed);
        }

        let outgoing = self.pop_above_headers(fork_point)?;
        self.push_all_headers(incoming, fork_point)?;
        Ok(outgoing)
    }

    /// Store (if missing) and promote a header as the next candidate.
    pub fn push_header(&self, header: &Header, height: u32, median_time_past: u32) -> Result<()> {
        let _write = self.write_mutex.lock();

        verify::push(&self.blocks, header, height, true)?;

        self.begin_write()?;
        if self.blocks.get(&header.hash()).is_none() {
            self.blocks.store(header, height, median_time_past)?;
        }

        self.blocks.promote(&header.hash(), height, true)?;
        self.blocks.commit()?;
        metrics::gauge!("state.candidate.height", height as i64);
        self.end_write()
    }

    /// Demote the candidate at the top of the index, returning its header.
    pub fn pop_header(&self, height: u32) -> Result<Header> {
        let _write = self.write_mutex.lock();

        let result = verify::top(&self.blocks, height, true)?;

        self.begin_write()?;
        // Uncandidate previous outputs spent by this block's transactions.
        for link in self.blocks.transaction_links(&result) {
            self.transactions.uncandidate(link)?;
        }

        self.blocks.demote(&result.hash, height, true)?;
        self.blocks.commit()?;
        self.end_write()?;
        Ok(result.header)
    }

    fn push_all_headers(&self, headers: &[Header], fork_point: &Checkpoint) -> Result<()> {
        let first_height = fork_point.height + 1;

        for (index, header) in headers.iter().enumerate() {
            self.push_header(header, first_height + index as u32, 0)?;
        }

        Ok(())
    }

    fn pop_above_headers(&self, fork_point: &Checkpoint) -> Result<Vec<Header>> {
        verify::fork_point(&self.blocks, fork_point, true)?;

        let top = self.blocks.top(true).ok_or(Error::OperationFailed)?;
        let depth = top - fork_point.height;
        let mut headers = Vec::with_capacity(depth as usize);

        // Pop from the top down; prepending keeps the result ascending.
        for height in ((fork_point.height + 1)..=top).rev() {
            headers.insert(0, self.pop_header(height)?);
        }

        Ok(headers)
    }

    // Block reorganization.

    /// Replace the confirmed chain above `fork_point` with `incoming`,
    /// returning the replaced blocks in ascending height order.
    ///
    /// Incoming blocks must carry their median time past, which validation
    /// computed before handing the chain over.
    pub fn reorganize_blocks(
        &self,
        fork_point: &Checkpoint,
        incoming: &[(Arc<Block>, u32)],
    ) -> Result<Vec<Arc<Block>>> {
        if fork_point.height as u64 + incoming.len() as u64 > u32::max_value() as u64 {
            return Err(Error::OperationFailed);
        }

        let outgoing = self.pop_above_blocks(fork_point)?;
        self.push_all_blocks(incoming, fork_point)?;
        Ok(outgoing)
    }

    /// Store, associate, confirm, validate, catalog, and promote a block.
    ///
    /// This is the primary insert path: it performs whichever of the store,
    /// update, and promotion steps the block still needs, so it accepts
    /// both brand-new blocks and candidates from header-first sync.
    pub fn push(&self, block: &Block, height: u32, median_time_past: u32) -> Result<()> {
        let _write = self.write_mutex.lock();

        verify::push(&self.blocks, &block.header, height, false)?;

        self.begin_write()?;

        let hash = block.hash();
        if self.blocks.get(&hash).is_none() {
            self.blocks.store(&block.header, height, median_time_past)?;
        }
        let result = self.blocks.get(&hash).ok_or(Error::OperationFailed)?;

        // Candidate promotion is skipped when header-first sync already
        // placed this header on the candidate index.
        if !result.is_candidate() {
            self.blocks.promote(&hash, height, true)?;
        }

        // Store any missing transactions and associate them all.
        let links = self.transactions.store_all(&block.transactions)?;
        if !result.is_associated() && !block.transactions.is_empty() {
            self.blocks.update(&hash, &links)?;
        }

        // Confirm the transactions (spending their previous outputs), then
        // promote the block itself.
        self.transactions
            .confirm_all(&links, height, median_time_past)?;
        self.blocks.validate(&hash, true)?;

        if self.payments.is_some() {
            self.catalog_block_transactions(block)?;
        }

        self.blocks.promote(&hash, height, false)?;
        self.commit_all()?;

        metrics::counter!("state.block.pushed", 1);
        metrics::gauge!("state.confirmed.height", height as i64);
        trace!(?hash, height, "pushed block");

        self.end_write()
    }

    /// Demote the confirmed block at the top of the index, reversing its
    /// transaction confirmations, and return it.
    pub fn pop_block(&self, height: u32) -> Result<Arc<Block>> {
        let _write = self.write_mutex.lock();

        let result = verify::top(&self.blocks, height, false)?;

        // Reconstruct the block for unconfirmation and return.
        let links = self.blocks.transaction_links(&result);
        let mut transactions = Vec::with_capacity(links.len());
        for link in &links {
            let transaction = self.transactions.get_by_link(*link)?.transaction;
            transactions.push(Arc::new(transaction));
        }

        let block = Arc::new(Block {
            header: result.header,
            transactions,
        });

        self.begin_write()?;
        self.transactions.unconfirm(&block)?;
        self.blocks.demote(&result.hash, height, false)?;
        self.commit_all()?;
        trace!(hash = ?result.hash, height, "popped block");
        self.end_write()?;

        Ok(block)
    }

    fn push_all_blocks(&self, blocks: &[(Arc<Block>, u32)], fork_point: &Checkpoint) -> Result<()> {
        let first_height = fork_point.height + 1;

        for (index, (block, median_time_past)) in blocks.iter().enumerate() {
            self.push(block, first_height + index as u32, *median_time_past)?;
        }

        Ok(())
    }

    fn pop_above_blocks(&self, fork_point: &Checkpoint) -> Result<Vec<Arc<Block>>> {
        verify::fork_point(&self.blocks, fork_point, false)?;

        let top = self.blocks.top(false).ok_or(Error::OperationFailed)?;
        let depth = top - fork_point.height;
        let mut blocks = Vec::with_capacity(depth as usize);

        for height in ((fork_point.height + 1)..=top).rev() {
            blocks.insert(0, self.pop_block(height)?);
        }

        Ok(blocks)
    }

    // Utilities.

    /// Index every not-yet-cataloged transaction of `block`. The caller
    /// holds the write bracket and commits the payment database.
    fn catalog_block_transactions(&self, block: &Block) -> Result<()> {
        let payments = self.payments.as_ref().expect("cataloging is enabled");

        for transaction in &block.transactions {
            let result = self
                .transactions
                .get(&transaction.hash())
                .ok_or(Error::NotFound)?;
            if result.cataloged {
                continue;
            }

            payments.catalog(result.link, transaction, |outpoint| {
                self.resolve_prevout(outpoint)
            })?;
            self.transactions.set_cataloged(result.link)?;
        }

        Ok(())
    }

    /// The output spent by `outpoint`, regardless of its spend state.
    fn resolve_prevout(&self, outpoint: &OutPoint) -> Option<Output> {
        let result = self.transactions.get(&outpoint.hash)?;
        result
            .transaction
            .outputs
            .get(outpoint.index as usize)
            .cloned()
    }

    fn commit_all(&self) -> Result<()> {
        if let Some(payments) = &self.payments {
            payments.commit()?;
        }
        if let Some(filters) = &self.filters {
            filters.commit()?;
        }

        self.transactions.commit()?;
        self.blocks.commit()
    }

    fn begin_write(&self) -> Result<()> {
        self.store.begin_write()
    }

    /// Flush if per-write flushing is enabled, then disengage the flush
    /// lock. Failures skip the disengage on purpose.
    fn end_write(&self) -> Result<()> {
        if self.store.flush_each_write() {
            self.flush()?;
        }

        self.store.end_write()
    }

    /// Take the write mutex only when per-write flushing must not overlap.
    fn conditional_lock(&self) -> Option<MutexGuard<'_, ()>> {
        if self.store.flush_each_write() {
            Some(self.write_mutex.lock())
        } else {
            None
        }
    }
}
