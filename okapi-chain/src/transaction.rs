//! Transactions and transaction-related structures.

mod hash;
mod serialize;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

use serde::{Deserialize, Serialize};

pub use hash::Hash;
pub use serialize::MAX_TX_BYTES;

use crate::compactint::CompactInt;
use crate::transparent;

/// A transaction: the atomic unit of value transfer.
///
/// Note that this implementation predates SegWit; a transaction is exactly
/// its legacy serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version.
    pub version: i32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// The earliest time or block height at which the transaction may be
    /// added to the ledger.
    pub lock_time: u32,
}

impl Transaction {
    /// Compute the hash (txid) of this transaction.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(
                self.inputs.get(0),
                Some(transparent::Input::Coinbase { .. })
            )
    }

    /// The serialized length of this transaction, in bytes.
    pub fn serialized_size(&self) -> usize {
        let mut size = 4 + CompactInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.serialized_size();
        }
        size += CompactInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.serialized_size();
        }
        size + 4
    }
}
