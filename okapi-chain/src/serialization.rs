//! Consensus-critical serialization.
//!
//! `BitcoinSerialize` and `BitcoinDeserialize` are analogs of the Serde
//! `Serialize` and `Deserialize` traits, but produce the canonical
//! little-endian wire encodings that block and transaction hashes are
//! computed over. Changing any impl here changes hashes on disk.

mod deserialize;
mod error;

pub mod sha256d;

pub use deserialize::{BitcoinDeserialize, BitcoinDeserializeInto};
pub use error::SerializationError;

use std::{convert::TryFrom, sync::Arc};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::compactint::CompactInt;

pub trait BitcoinSerialize {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn bitcoin_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.bitcoin_serialize(&mut data)?;
        Ok(data)
    }
}

/// Integers are little-endian on the wire; one impl per width via the
/// matching `byteorder` writer.
macro_rules! impl_int_serialize {
    ($($int:ty => $write:ident,)*) => {
        $(
            impl BitcoinSerialize for $int {
                fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
                where
                    W: std::io::Write,
                {
                    target.$write::<LittleEndian>(*self)
                }
            }
        )*
    };
}

impl_int_serialize! {
    u16 => write_u16,
    u32 => write_u32,
    u64 => write_u64,
    i32 => write_i32,
    i64 => write_i64,
}

impl BitcoinSerialize for bool {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[u8::from(*self)])
    }
}

impl BitcoinSerialize for DateTime<Utc> {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        // Block times are u32 seconds on the wire, valid until 2106.
        let time_u32 = u32::try_from(self.timestamp()).unwrap_or(std::u32::MAX);
        time_u32.bitcoin_serialize(&mut target)
    }
}

impl BitcoinSerialize for [u8; 32] {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl<T> BitcoinSerialize for Vec<T>
where
    T: BitcoinSerialize,
{
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).bitcoin_serialize(&mut target)?;
        self.iter()
            .try_for_each(|item| item.bitcoin_serialize(&mut target))
    }
}

impl<T> BitcoinSerialize for Arc<T>
where
    T: BitcoinSerialize,
{
    fn bitcoin_serialize<W>(&self, target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        T::bitcoin_serialize(self, target)
    }
}
