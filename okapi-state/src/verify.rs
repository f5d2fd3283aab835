//! Write-path precondition checks.
//!
//! Each check returns the specific error code for its failed precondition;
//! the facade runs them before engaging the write bracket so invariant
//! violations never leave the flush lock behind.

use okapi_chain::block::{Block, Header};
use okapi_chain::transaction;

use crate::checkpoint::Checkpoint;
use crate::database::{BlockDatabase, BlockResult, BlockState, TransactionDatabase};
use crate::error::{Error, Result};

/// The transaction must not be stored yet.
pub(crate) fn transaction_missing(
    transactions: &TransactionDatabase,
    hash: &transaction::Hash,
) -> Result<()> {
    match transactions.get_link(hash) {
        Some(_) => Err(Error::DuplicateTransaction),
        None => Ok(()),
    }
}

/// The block header must be stored.
pub(crate) fn block_exists(blocks: &BlockDatabase, hash: &okapi_chain::block::Hash) -> Result<BlockResult> {
    blocks.get(hash).ok_or(Error::NotFound)
}

/// The block must be stored at `height` with no transaction associations
/// yet.
pub(crate) fn update(blocks: &BlockDatabase, block: &Block, height: u32) -> Result<BlockResult> {
    let result = block_exists(blocks, &block.hash())?;

    if result.height != height {
        return Err(Error::BlockInvalidHeight);
    }

    if result.is_associated() {
        return Err(Error::BlockDuplicate);
    }

    Ok(result)
}

/// The header must extend the top of the candidate or confirmed index.
pub(crate) fn push(
    blocks: &BlockDatabase,
    header: &Header,
    height: u32,
    candidate: bool,
) -> Result<()> {
    match (blocks.top(candidate), height) {
        // An empty index only accepts the genesis block.
        (None, 0) => {}
        (Some(top), height) if height != 0 && top == height - 1 => {
            let parent = blocks
                .get_at(top, candidate)
                .ok_or(Error::OperationFailed)?;
            if parent.hash != header.previous_block_hash {
                return Err(Error::BlockMissingParent);
            }
        }
        _ => return Err(Error::BlockInvalidHeight),
    }

    if let Some(existing) = blocks.get(&header.hash()) {
        let target = if candidate {
            BlockState::CANDIDATE
        } else {
            BlockState::CONFIRMED
        };
        if existing.state.contains(target) {
            return Err(Error::BlockDuplicate);
        }

        // Heights are immutable: a stored header can only be re-pushed at
        // the height it was stored with.
        if existing.height != height {
            return Err(Error::BlockInvalidHeight);
        }
    }

    Ok(())
}

/// The fork point must name a block actually stored on the index.
pub(crate) fn fork_point(
    blocks: &BlockDatabase,
    fork_point: &Checkpoint,
    candidate: bool,
) -> Result<()> {
    let top = blocks.top(candidate).ok_or(Error::OperationFailed)?;
    if fork_point.height > top {
        return Err(Error::BlockInvalidHeight);
    }

    let stored = blocks
        .get_at(fork_point.height, candidate)
        .ok_or(Error::OperationFailed)?;
    if stored.hash != fork_point.hash {
        return Err(Error::BlockInvalidHash);
    }

    Ok(())
}

/// The index top must be exactly `height`; returns its record.
pub(crate) fn top(blocks: &BlockDatabase, height: u32, candidate: bool) -> Result<BlockResult> {
    match blocks.top(candidate) {
        Some(top) if top == height => {}
        _ => return Err(Error::BlockInvalidHeight),
    }

    blocks
        .get_at(height, candidate)
        .ok_or(Error::OperationFailed)
}

/// The block must be the validated candidate ready to confirm at `height`.
pub(crate) fn confirm(
    blocks: &BlockDatabase,
    hash: &okapi_chain::block::Hash,
    height: u32,
) -> Result<BlockResult> {
    let result = block_exists(blocks, hash)?;

    if result.height != height {
        return Err(Error::BlockInvalidHeight);
    }

    if !result.is_candidate() || result.is_invalid() {
        return Err(Error::OperationFailed);
    }

    match blocks.top(false) {
        None if height == 0 => {}
        Some(top) if top + 1 == height => {}
        _ => return Err(Error::BlockInvalidHeight),
    }

    Ok(result)
}
