//! Transparent value transfer: inputs, outputs, and scripts.

use std::{
    fmt,
    io::{self, Read},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::block::Height;
use crate::compactint::CompactInt;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::transaction;

/// An encoding of a script.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl BitcoinSerialize for Script {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).bitcoin_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl BitcoinDeserialize for Script {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::bitcoin_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("truncated script"));
        }
        Ok(Script(bytes))
    }
}

/// Arbitrary data inserted by miners into a coinbase transaction.
///
/// Post BIP 34 the first push is the block height.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct CoinbaseData(pub Vec<u8>);

impl CoinbaseData {
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }

    /// The block height encoded in the leading push, if there is one.
    pub fn height(&self) -> Option<Height> {
        let push_len = *self.0.get(0)? as usize;
        if push_len == 0 || push_len > 4 || self.0.len() < 1 + push_len {
            return None;
        }

        let mut le_bytes = [0u8; 4];
        le_bytes[..push_len].copy_from_slice(&self.0[1..1 + push_len]);
        Some(Height(u32::from_le_bytes(le_bytes)))
    }
}

/// A reference to a particular transaction output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct OutPoint {
    /// The transaction that contains the output being spent.
    pub hash: transaction::Hash,

    /// The index of the output within that transaction; the first output
    /// is 0.
    pub index: u32,
}

impl OutPoint {
    /// The null reference used to mark coinbase inputs on the wire.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: std::u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash.0 == [0; 32] && self.index == std::u32::MAX
    }
}

impl BitcoinSerialize for OutPoint {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.hash.bitcoin_serialize(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.index)
    }
}

impl BitcoinDeserialize for OutPoint {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: transaction::Hash::bitcoin_deserialize(&mut reader)?,
            index: reader.read_u32::<LittleEndian>()?,
        })
    }
}

/// A transaction input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Input {
    /// A spend of an output of a previous transaction.
    PrevOut {
        /// The previous output being spent.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The sequence number.
        sequence: u32,
    },
    /// New coins created by the block reward.
    Coinbase {
        /// Free data inserted by the miner; encodes the block height after
        /// BIP 34.
        data: CoinbaseData,
        /// The sequence number.
        sequence: u32,
    },
}

impl Input {
    /// The previous output spent by this input, unless it is a coinbase.
    pub fn outpoint(&self) -> Option<OutPoint> {
        match self {
            Input::PrevOut { outpoint, .. } => Some(*outpoint),
            Input::Coinbase { .. } => None,
        }
    }

    /// The BIP 34 height for coinbase inputs that encode one.
    pub fn coinbase_height(&self) -> Option<Height> {
        match self {
            Input::Coinbase { data, .. } => data.height(),
            Input::PrevOut { .. } => None,
        }
    }

    /// The serialized length of this input, in bytes.
    pub fn serialized_size(&self) -> usize {
        match self {
            Input::PrevOut { unlock_script, .. } => 36 + unlock_script.serialized_size() + 4,
            Input::Coinbase { data, .. } => 36 + data.serialized_size() + 4,
        }
    }
}

impl BitcoinSerialize for Input {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.bitcoin_serialize(&mut writer)?;
                unlock_script.bitcoin_serialize(&mut writer)?;
                writer.write_u32::<LittleEndian>(*sequence)
            }
            Input::Coinbase { data, sequence } => {
                OutPoint::null().bitcoin_serialize(&mut writer)?;
                CompactInt::from(data.0.len()).bitcoin_serialize(&mut writer)?;
                writer.write_all(&data.0)?;
                writer.write_u32::<LittleEndian>(*sequence)
            }
        }
    }
}

impl BitcoinDeserialize for Input {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::bitcoin_deserialize(&mut reader)?;
        let script = Script::bitcoin_deserialize(&mut reader)?;
        let sequence = reader.read_u32::<LittleEndian>()?;

        if outpoint.is_null() {
            Ok(Input::Coinbase {
                data: CoinbaseData(script.0),
                sequence,
            })
        } else {
            Ok(Input::PrevOut {
                outpoint,
                unlock_script: script,
                sequence,
            })
        }
    }
}

/// A transaction output.
///
/// The coins someone "owns" are a subset of the unspent transaction outputs
/// of the global ledger. Outputs are indivisible and can only be consumed in
/// their entirety.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Output {
    /// The output value, in the smallest currency unit.
    pub value: u64,

    /// The conditions under which this output can be spent.
    pub lock_script: Script,
}

impl Output {
    pub fn serialized_size(&self) -> usize {
        8 + self.lock_script.serialized_size()
    }
}

impl BitcoinSerialize for Output {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u64::<LittleEndian>(self.value)?;
        self.lock_script.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for Output {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: reader.read_u64::<LittleEndian>()?,
            lock_script: Script::bitcoin_deserialize(&mut reader)?,
        })
    }
}
