use std::io;

use thiserror::Error;

/// Errors returned by the storage engine.
///
/// Failures inside a write bracket abort the write and, when per-write
/// flushing is enabled, intentionally leave the flush sentinel on disk so
/// the store refuses to reopen without recovery.
#[derive(Debug, Error)]
pub enum Error {
    /// A filesystem, mapping, or sync failure.
    #[error("storage i/o failure: {0}")]
    Io(#[from] io::Error),

    /// The exclusive store lock or the flush lock could not be acquired.
    #[error("the store is locked by another process")]
    StoreLockFailure,

    /// The flush sentinel was present on open: a previous run died
    /// mid-write and the store must be recovered externally.
    #[error("the store was not shut down cleanly; recover it before reopening")]
    UncleanShutdown,

    /// A write precondition failed in a way that has no more specific code.
    #[error("operation failed")]
    OperationFailed,

    /// The transaction is already stored.
    #[error("duplicate transaction")]
    DuplicateTransaction,

    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// The pushed block's parent is not the current index top.
    #[error("stored block is missing its parent")]
    BlockMissingParent,

    /// The pushed or popped height is not the next index height.
    #[error("block height does not match the index")]
    BlockInvalidHeight,

    /// The block is already stored in the target state.
    #[error("duplicate block")]
    BlockDuplicate,

    /// A fork point does not match the stored block hash at its height.
    #[error("block hash does not match the fork point")]
    BlockInvalidHash,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
