use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::transparent::{CoinbaseData, Input, OutPoint, Output, Script};

use super::Transaction;

impl Arbitrary for Input {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            (any::<OutPoint>(), any::<Script>(), any::<u32>())
                // The null outpoint marks coinbase inputs on the wire.
                .prop_filter("outpoint must not be null", |(outpoint, _, _)| !outpoint
                    .is_null())
                .prop_map(|(outpoint, unlock_script, sequence)| Input::PrevOut {
                    outpoint,
                    unlock_script,
                    sequence,
                }),
            (vec(any::<u8>(), 0..95), any::<u32>()).prop_map(|(data, sequence)| {
                Input::Coinbase {
                    data: CoinbaseData(data),
                    sequence,
                }
            }),
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Transaction {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<i32>(),
            vec(any::<Input>(), 0..4),
            vec(any::<Output>(), 0..4),
            any::<u32>(),
        )
            .prop_map(|(version, inputs, outputs, lock_time)| Transaction {
                version,
                inputs,
                outputs,
                lock_time,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
