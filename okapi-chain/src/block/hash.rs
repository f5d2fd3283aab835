use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::hashes;
use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};

use super::Header;

/// A hash of a block, used to identify blocks and link blocks into a chain.
///
/// Technically this is the double-SHA256 hash of a block *header*, but since
/// the header commits to the Merkle root of the transaction tree, it binds
/// the entire contents of the block.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Hash(pub [u8; 32]);

impl<'a> From<&'a Header> for Hash {
    fn from(header: &'a Header) -> Self {
        let bytes = header
            .bitcoin_serialize_to_vec()
            .expect("serializing a header into memory cannot fail");
        Hash(sha256d::hash(&bytes))
    }
}

// Hashes render in display order; see the `hashes` module.

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hashes::to_display_hex(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block::Hash(\"{}\")", hashes::to_display_hex(&self.0))
    }
}

impl FromStr for Hash {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hashes::from_display_hex(s).map(Hash)
    }
}

impl BitcoinSerialize for Hash {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}

impl BitcoinDeserialize for Hash {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::bitcoin_deserialize(&mut reader)?))
    }
}
