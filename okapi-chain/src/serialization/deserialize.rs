use std::{io, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use super::SerializationError;
use crate::compactint::CompactInt;

type Result<R> = std::result::Result<R, SerializationError>;

pub trait BitcoinDeserialize {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait BitcoinDeserializeInto {
    /// Deserialize based on type inference
    fn bitcoin_deserialize_into<T>(self) -> Result<T>
    where
        T: BitcoinDeserialize;
}

impl<R: io::Read> BitcoinDeserializeInto for R {
    fn bitcoin_deserialize_into<T>(self) -> Result<T>
    where
        T: BitcoinDeserialize,
    {
        T::bitcoin_deserialize(self)
    }
}

/// The mirror of `impl_int_serialize`: little-endian readers per width.
macro_rules! impl_int_deserialize {
    ($($int:ty => $read:ident,)*) => {
        $(
            impl BitcoinDeserialize for $int {
                fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<$int> {
                    Ok(reader.$read::<LittleEndian>()?)
                }
            }
        )*
    };
}

impl_int_deserialize! {
    u16 => read_u16,
    u32 => read_u32,
    u64 => read_u64,
    i32 => read_i32,
    i64 => read_i64,
}

impl BitcoinDeserialize for u8 {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl BitcoinDeserialize for bool {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<bool> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("Invalid bool")),
        }
    }
}

impl BitcoinDeserialize for DateTime<Utc> {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<DateTime<Utc>> {
        Ok(Utc.timestamp(u32::bitcoin_deserialize(&mut reader)? as i64, 0))
    }
}

impl BitcoinDeserialize for [u8; 32] {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; 32]> {
        let mut result = [0u8; 32];
        reader.read_exact(&mut result)?;
        Ok(result)
    }
}

impl<T> BitcoinDeserialize for Vec<T>
where
    T: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let length = CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize;
        // Never trust a wire length for preallocation: cap the initial
        // reservation and let the reads prove the rest.
        let mut items: Vec<T> = Vec::with_capacity(length.min(1024));
        for _ in 0..length {
            items.push(T::bitcoin_deserialize(&mut reader)?);
        }

        Ok(items)
    }
}

impl<T> BitcoinDeserialize for Arc<T>
where
    T: BitcoinDeserialize,
{
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Arc<T>> {
        Ok(Arc::new(T::bitcoin_deserialize(reader)?))
    }
}
