use std::{fmt, io};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::Hash;

/// The root of a block's transaction Merkle tree.
///
/// Note that because of a flaw in Bitcoin's design (CVE-2012-2459) the root
/// does not always precisely bind the contents of the block; the storage
/// layer treats it as opaque bytes.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct MerkleRoot(pub [u8; 32]);

impl fmt::Debug for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("MerkleRoot")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl BitcoinSerialize for MerkleRoot {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}

impl BitcoinDeserialize for MerkleRoot {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(MerkleRoot(<[u8; 32]>::bitcoin_deserialize(&mut reader)?))
    }
}

/// A difficulty target in the compact "nBits" format used on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct CompactDifficulty(pub u32);

/// A block header, containing metadata about a block.
///
/// Headers are chained by the backwards reference to the previous header's
/// hash; each block points to its parent, all the way back to the genesis
/// block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    pub previous_block_hash: Hash,

    /// The root of the transaction Merkle tree, binding the header to the
    /// transactions in the block.
    pub merkle_root: MerkleRoot,

    /// The block timestamp: the Unix epoch time (UTC) at which the miner
    /// started hashing the header (according to the miner).
    pub time: DateTime<Utc>,

    /// The target threshold this header's hash must not exceed, in the
    /// compact nBits encoding.
    pub difficulty_threshold: CompactDifficulty,

    /// An arbitrary field miners change to produce a hash below the target
    /// threshold.
    pub nonce: u32,
}

impl Header {
    /// The length of the canonical header serialization, in bytes.
    pub const LEN: usize = 80;

    /// Compute the hash of this header.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }
}
