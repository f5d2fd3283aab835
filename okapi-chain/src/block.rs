//! Blocks and block-related structures (heights, headers, etc.)

mod hash;
mod header;
mod height;
mod serialize;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

use std::{fmt, sync::Arc};

pub use hash::Hash;
pub use header::{CompactDifficulty, Header, MerkleRoot};
pub use height::Height;
pub use serialize::MAX_BLOCK_BYTES;

use crate::transaction::Transaction;

/// A block, containing a header and a list of transactions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(&self.header)
    }

    /// The height reported by this block's coinbase data, if any.
    ///
    /// Version 1 blocks predate BIP 34 and do not encode a height.
    pub fn coinbase_height(&self) -> Option<Height> {
        if self.header.version < 2 {
            return None;
        }

        self.transactions
            .get(0)
            .and_then(|tx| tx.inputs.get(0))
            .and_then(|input| input.coinbase_height())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fmter = f.debug_struct("Block");
        if let Some(height) = self.coinbase_height() {
            fmter.field("height", &height);
        }

        fmter.field("hash", &self.hash()).finish()
    }
}
