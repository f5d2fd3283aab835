//! Shared behavior of the 32-byte hash newtypes.
//!
//! Block and transaction hashes live in little-endian wire order but are
//! displayed big-endian, following the convention set by bitcoind. The
//! byte reversal lives here so the newtypes cannot disagree about it.

use crate::serialization::SerializationError;

/// Hex-encode wire-order bytes in display (big-endian) order.
pub(crate) fn to_display_hex(wire_bytes: &[u8; 32]) -> String {
    let mut display_bytes = *wire_bytes;
    display_bytes.reverse();
    hex::encode(&display_bytes)
}

/// Decode a display-order hex string into wire-order bytes.
pub(crate) fn from_display_hex(s: &str) -> Result<[u8; 32], SerializationError> {
    let mut bytes = [0u8; 32];
    if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
        return Err(SerializationError::Parse("hex decoding error"));
    }

    bytes.reverse();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_order_is_reversed_wire_order() {
        let mut wire = [0u8; 32];
        wire[0] = 0xab;

        let display = to_display_hex(&wire);
        assert!(display.starts_with("00"));
        assert!(display.ends_with("ab"));
        assert_eq!(from_display_hex(&display).unwrap(), wire);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(from_display_hex("not hex").is_err());
        assert!(from_display_hex("abcd").is_err());
    }
}
