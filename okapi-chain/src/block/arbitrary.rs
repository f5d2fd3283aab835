use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::transaction::Transaction;

use super::{Block, CompactDifficulty, Hash, Header, MerkleRoot};

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<u32>(),
            any::<Hash>(),
            any::<MerkleRoot>(),
            // Block times are u32 seconds on the wire.
            any::<u32>(),
            any::<CompactDifficulty>(),
            any::<u32>(),
        )
            .prop_map(
                |(version, previous_block_hash, merkle_root, time, difficulty_threshold, nonce)| {
                    Header {
                        version,
                        previous_block_hash,
                        merkle_root,
                        time: Utc.timestamp(time as i64, 0),
                        difficulty_threshold,
                        nonce,
                    }
                },
            )
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Block {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), vec(any::<Transaction>().prop_map(Arc::new), 0..3))
            .prop_map(|(header, transactions)| Block {
                header,
                transactions,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
