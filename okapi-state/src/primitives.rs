//! Low-level storage primitives: slot allocators and the hash table.
//!
//! Every managed file is laid out as
//! `[ embedder header | watermark (u64 LE) | payload ]`. The watermark is
//! the allocation high-water mark and the only allocator state that must
//! survive restart: bodies written after the last `commit` sit above the
//! persisted watermark and are invisible (and reusable) after a crash.
//! Callers therefore order mutations as allocate, write body, commit.

mod element;
mod hash_table;
mod record_manager;
mod slab_manager;

pub use element::Element;
pub use hash_table::HashTable;
pub use record_manager::RecordManager;
pub use slab_manager::SlabManager;

use okapi_chain::{block, transaction};

use crate::error::Result;
use crate::memory::FileStorage;

/// The width of the persisted watermark word.
pub(crate) const WATERMARK_SIZE: u64 = 8;

/// An integral identity for a slot in a manager: a record index or a slab
/// byte offset.
///
/// The maximum representable value is reserved as [`Link::NOT_ALLOCATED`],
/// the terminal sentinel for chains.
pub trait Link: Copy + Eq {
    const NOT_ALLOCATED: Self;

    /// Encoded width on disk, in bytes.
    const SIZE: u64;

    fn as_u64(self) -> u64;
    fn from_u64(value: u64) -> Self;

    /// Decode from little-endian bytes.
    fn read(bytes: &[u8]) -> Self;

    /// Encode as little-endian bytes.
    fn write(self, bytes: &mut [u8]);

    fn is_terminal(self) -> bool {
        self == Self::NOT_ALLOCATED
    }
}

impl Link for u32 {
    const NOT_ALLOCATED: Self = std::u32::MAX;
    const SIZE: u64 = 4;

    fn as_u64(self) -> u64 {
        self as u64
    }

    fn from_u64(value: u64) -> Self {
        value as u32
    }

    fn read(bytes: &[u8]) -> Self {
        let mut le_bytes = [0u8; 4];
        le_bytes.copy_from_slice(&bytes[..4]);
        u32::from_le_bytes(le_bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl Link for u64 {
    const NOT_ALLOCATED: Self = std::u64::MAX;
    const SIZE: u64 = 8;

    fn as_u64(self) -> u64 {
        self
    }

    fn from_u64(value: u64) -> Self {
        value
    }

    fn read(bytes: &[u8]) -> Self {
        let mut le_bytes = [0u8; 8];
        le_bytes.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(le_bytes)
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.to_le_bytes());
    }
}

/// A fixed-width hash-table key.
pub trait Key: Copy + Eq {
    const SIZE: u64;

    fn as_bytes(&self) -> &[u8];
    fn from_bytes(bytes: &[u8]) -> Self;
}

impl Key for block::Hash {
    const SIZE: u64 = 32;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        block::Hash(hash)
    }
}

impl Key for transaction::Hash {
    const SIZE: u64 = 32;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[..32]);
        transaction::Hash(hash)
    }
}

/// The allocation seam shared by the record and slab managers.
///
/// The hash table is generic over this trait rather than over a manager
/// kind, so record tables and slab tables share one implementation.
pub trait Manager {
    type Link: Link;

    /// Initialize a fresh file region.
    fn create(&self) -> Result<()>;

    /// Read the persisted watermark; call before any query.
    fn start(&self) -> Result<()>;

    /// Persist the current watermark.
    fn commit(&self) -> Result<()>;

    /// Allocate space for one element of `size` bytes. Record managers
    /// allocate a single record and require `size` to equal the record
    /// size.
    fn allocate(&self, size: u64) -> Result<Self::Link>;

    /// The absolute file offset of `link`'s slot.
    fn offset(&self, link: Self::Link) -> u64;

    /// Whether `link` points past the current watermark.
    fn past_eof(&self, link: Self::Link) -> bool;

    /// The backing file.
    fn storage(&self) -> &FileStorage;
}
