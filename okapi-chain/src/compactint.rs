//! The Bitcoin variable-length integer encoding.
//!
//! Values up to 252 are a single byte; larger values are a one-byte width
//! marker followed by the value as a little-endian u16, u32, or u64.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The marker bytes selecting the wide encodings.
const MARKER_U16: u8 = 253;
const MARKER_U32: u8 = 254;
const MARKER_U64: u8 = 255;

/// The largest value that encodes as a bare byte.
const MAX_BARE: u64 = (MARKER_U16 as u64) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The encoded length of `value`, in bytes.
    pub fn size(value: usize) -> usize {
        Self::width(value as u64)
    }

    /// The total encoded width for `value`: 1, 3, 5, or 9 bytes.
    fn width(value: u64) -> usize {
        match value {
            0..=MAX_BARE => 1,
            _ if value <= u16::max_value() as u64 => 3,
            _ if value <= u32::max_value() as u64 => 5,
            _ => 9,
        }
    }
}

impl BitcoinSerialize for CompactInt {
    fn bitcoin_serialize<W>(&self, mut writer: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        match Self::width(self.0) {
            1 => writer.write_all(&[self.0 as u8]),
            3 => {
                writer.write_all(&[MARKER_U16])?;
                writer.write_u16::<LittleEndian>(self.0 as u16)
            }
            5 => {
                writer.write_all(&[MARKER_U32])?;
                writer.write_u32::<LittleEndian>(self.0 as u32)
            }
            _ => {
                writer.write_all(&[MARKER_U64])?;
                writer.write_u64::<LittleEndian>(self.0)
            }
        }
    }
}

impl BitcoinDeserialize for CompactInt {
    fn bitcoin_deserialize<R: std::io::Read>(
        mut reader: R,
    ) -> Result<CompactInt, SerializationError> {
        let value = match u8::bitcoin_deserialize(&mut reader)? {
            MARKER_U16 => u16::bitcoin_deserialize(&mut reader)? as u64,
            MARKER_U32 => u32::bitcoin_deserialize(&mut reader)? as u64,
            MARKER_U64 => u64::bitcoin_deserialize(&mut reader)?,
            bare => bare as u64,
        };

        Ok(CompactInt(value))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn compactint_boundaries_roundtrip() {
        for value in &[0u64, 1, 252, 253, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let encoded = CompactInt(*value).bitcoin_serialize_to_vec().unwrap();
            assert_eq!(encoded.len(), CompactInt::size(*value as usize));
            let decoded = CompactInt::bitcoin_deserialize(Cursor::new(encoded)).unwrap();
            assert_eq!(decoded.value(), *value);
        }
    }

    #[test]
    fn marker_bytes_select_the_width() {
        assert_eq!(CompactInt(252).bitcoin_serialize_to_vec().unwrap(), vec![252]);
        assert_eq!(
            CompactInt(253).bitcoin_serialize_to_vec().unwrap(),
            vec![MARKER_U16, 253, 0]
        );
        assert_eq!(
            CompactInt(0x1_0000).bitcoin_serialize_to_vec().unwrap()[0],
            MARKER_U32
        );
        assert_eq!(
            CompactInt(0x1_0000_0000).bitcoin_serialize_to_vec().unwrap()[0],
            MARKER_U64
        );
    }
}
