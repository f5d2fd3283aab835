//! Chain data structures shared by the okapi storage engine and its callers.
//!
//! This crate provides the consensus wire encodings (blocks, headers,
//! transactions, scripts) that the storage layer persists. It deliberately
//! stops at serialization: script interpretation, proof-of-work checks, and
//! network messages live elsewhere.

pub mod block;
pub mod compactint;
mod hashes;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;

pub use serialization::{
    BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError,
};
