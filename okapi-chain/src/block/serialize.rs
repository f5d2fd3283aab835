use std::{io, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::serialization::{
    BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError,
};
use crate::transaction::Transaction;

use super::{Block, CompactDifficulty, Hash, Header, MerkleRoot};

/// The maximum size of a block, in bytes.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;

impl BitcoinSerialize for Header {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.version)?;
        self.previous_block_hash.bitcoin_serialize(&mut writer)?;
        self.merkle_root.bitcoin_serialize(&mut writer)?;
        self.time.bitcoin_serialize(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.difficulty_threshold.0)?;
        writer.write_u32::<LittleEndian>(self.nonce)?;
        Ok(())
    }
}

impl BitcoinDeserialize for Header {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Header {
            version: reader.read_u32::<LittleEndian>()?,
            previous_block_hash: Hash::bitcoin_deserialize(&mut reader)?,
            merkle_root: MerkleRoot::bitcoin_deserialize(&mut reader)?,
            time: (&mut reader).bitcoin_deserialize_into()?,
            difficulty_threshold: CompactDifficulty(reader.read_u32::<LittleEndian>()?),
            nonce: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl BitcoinSerialize for Block {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.header.bitcoin_serialize(&mut writer)?;
        self.transactions.bitcoin_serialize(&mut writer)?;
        Ok(())
    }
}

impl BitcoinDeserialize for Block {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        // Reads past the block size limit hit UnexpectedEof.
        let mut limited = reader.take(MAX_BLOCK_BYTES);
        Ok(Block {
            header: Header::bitcoin_deserialize(&mut limited)?,
            transactions: <Vec<Arc<Transaction>>>::bitcoin_deserialize(&mut limited)?,
        })
    }
}
