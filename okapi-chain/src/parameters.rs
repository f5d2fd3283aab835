//! Consensus parameters: networks and their genesis blocks.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::block::{self, Block};
use crate::serialization::BitcoinDeserialize;

/// The production network and its test counterpart.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The testing network (testnet3).
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

/// The previous block hash for the genesis block.
///
/// All known networks use the `null` value for the parent of the genesis
/// block.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

/// The canonical wire encoding of the mainnet genesis block.
const GENESIS_MAINNET_HEX: &str = "01000000000000000000000000000000000000000000\
0000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a5132\
3a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c01010000000100000000000000000000000000\
00000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d\
65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f662073\
65636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104\
678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38\
c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

lazy_static! {
    static ref GENESIS_MAINNET: Arc<Block> = {
        let bytes = hex::decode(GENESIS_MAINNET_HEX).expect("hard-coded genesis block is valid hex");
        Arc::new(Block::bitcoin_deserialize(&bytes[..]).expect("hard-coded genesis block parses"))
    };
    static ref GENESIS_TESTNET: Arc<Block> = {
        // Testnet3 reuses the mainnet genesis transactions and differs only
        // in the header's time and nonce.
        let mut block: Block = GENESIS_MAINNET.as_ref().clone();
        block.header.time = Utc.timestamp(1_296_688_602, 0);
        block.header.nonce = 414_098_458;
        Arc::new(block)
    };
}

/// Returns the genesis block for `network`.
pub fn genesis_block(network: Network) -> Arc<Block> {
    match network {
        Network::Mainnet => GENESIS_MAINNET.clone(),
        Network::Testnet => GENESIS_TESTNET.clone(),
    }
}

/// Returns the hash of the genesis block for `network`.
pub fn genesis_hash(network: Network) -> block::Hash {
    match network {
        // bitcoin-cli getblockhash 0
        Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        // bitcoin-cli -testnet getblockhash 0
        Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
    }
    .parse()
    .expect("hard-coded hash parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_block_hashes_to_known_value() {
        for network in &[Network::Mainnet, Network::Testnet] {
            let block = genesis_block(*network);
            assert_eq!(block.hash(), genesis_hash(*network));
            assert_eq!(
                block.header.previous_block_hash,
                GENESIS_PREVIOUS_BLOCK_HASH
            );
        }
    }

    #[test]
    fn genesis_block_has_single_coinbase() {
        let block = genesis_block(Network::Mainnet);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
    }
}
