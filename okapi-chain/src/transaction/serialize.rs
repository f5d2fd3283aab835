use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::transparent;

use super::Transaction;

/// The maximum size of a transaction, in bytes.
pub const MAX_TX_BYTES: u64 = 1_000_000;

impl BitcoinSerialize for Transaction {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_i32::<LittleEndian>(self.version)?;
        self.inputs.bitcoin_serialize(&mut writer)?;
        self.outputs.bitcoin_serialize(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.lock_time)?;
        Ok(())
    }
}

impl BitcoinDeserialize for Transaction {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // A whole transaction can never legitimately exceed the limit, so
        // reads past it hit UnexpectedEof.
        let mut limited = reader.take(MAX_TX_BYTES);
        Ok(Transaction {
            version: limited.read_i32::<LittleEndian>()?,
            inputs: <Vec<transparent::Input>>::bitcoin_deserialize(&mut limited)?,
            outputs: <Vec<transparent::Output>>::bitcoin_deserialize(&mut limited)?,
            lock_time: limited.read_u32::<LittleEndian>()?,
        })
    }
}
