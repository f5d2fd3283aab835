//! On-disk blockchain storage for okapi.
//!
//! The engine persists block headers, the transaction ledger, and the
//! optional payment and compact-filter indexes over a set of memory-mapped
//! files, supporting header-first synchronization, block validation, and
//! chain reorganization. See [`Database`] for the coordinated write surface.
//!
//! The store targets single-process exclusive access to a directory on a
//! local filesystem; an exclusive lock file enforces this.

mod checkpoint;
mod config;
mod database;
mod error;
mod memory;
mod primitives;
mod store;
mod verify;

pub use checkpoint::Checkpoint;
pub use config::Config;
pub use database::{
    BlockDatabase, BlockLink, BlockResult, BlockState, Database, FilterDatabase, FilterLink,
    FilterResult, PaymentDatabase, PaymentKey, PaymentRecord, TransactionDatabase,
    TransactionResult, TxLink, UnspentOutput, UnspentOutputs, FILTER_TYPE_BASIC,
    POOLED_POSITION, UNCONFIRMED_HEIGHT, UNSPENT,
};
pub use error::{Error, Result};
