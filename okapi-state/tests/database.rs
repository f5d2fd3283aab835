//! End-to-end scenarios over a store in a temporary directory.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempdir::TempDir;

use okapi_chain::block::{self, Block, CompactDifficulty, Header, MerkleRoot};
use okapi_chain::parameters::{genesis_block, genesis_hash, Network};
use okapi_chain::transaction::Transaction;
use okapi_chain::transparent::{CoinbaseData, Input, OutPoint, Output, Script};

use okapi_state::{BlockDatabase, Checkpoint, Config, Database, Error, UNSPENT};

fn test_config(dir: &TempDir) -> Config {
    Config {
        directory: dir.path().to_owned(),
        cache_capacity: 100,
        file_growth_rate: 50,
        block_table_buckets: 16,
        transaction_table_buckets: 16,
        payment_table_buckets: 16,
        neutrino_filter_table_buckets: 16,
        ..Config::default()
    }
}

fn create_database(dir: &TempDir) -> Database {
    Database::create(
        test_config(dir),
        true,
        true,
        &genesis_block(Network::Mainnet),
    )
    .expect("store creates")
}

/// A header extending `parent`, made unique by `nonce`.
fn child_header(parent: block::Hash, nonce: u32) -> Header {
    Header {
        version: 2,
        previous_block_hash: parent,
        merkle_root: MerkleRoot([0; 32]),
        time: Utc.timestamp(1_296_000_000 + nonce as i64, 0),
        difficulty_threshold: CompactDifficulty(0x1d00_ffff),
        nonce,
    }
}

fn coinbase(height: u32) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![Input::Coinbase {
            data: CoinbaseData(height.to_le_bytes().to_vec()),
            sequence: u32::max_value(),
        }],
        outputs: vec![Output {
            value: 50,
            lock_script: Script(vec![height as u8]),
        }],
        lock_time: 0,
    }
}

fn spend(outpoint: OutPoint, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![Input::PrevOut {
            outpoint,
            unlock_script: Script(vec![0x51]),
            sequence: u32::max_value(),
        }],
        outputs: vec![Output {
            value,
            lock_script: Script(vec![0xAB]),
        }],
        lock_time: 0,
    }
}

fn block_with(parent: block::Hash, nonce: u32, transactions: Vec<Transaction>) -> Block {
    Block {
        header: child_header(parent, nonce),
        transactions: transactions.into_iter().map(Arc::new).collect(),
    }
}

// S1: a fresh store holds exactly the genesis block.
#[test]
fn create_inserts_genesis() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    assert_eq!(database.blocks().top(false), Some(0));
    assert_eq!(database.blocks().top(true), Some(0));

    let result = database.blocks().get_at(0, false).expect("genesis resolves");
    assert_eq!(result.hash, genesis_hash(Network::Mainnet));
    assert!(result.is_confirmed());

    // The genesis coinbase is in the transaction table.
    let coinbase_hash = genesis_block(Network::Mainnet).transactions[0].hash();
    let transaction = database
        .transactions()
        .get(&coinbase_hash)
        .expect("genesis coinbase resolves");
    assert_eq!(transaction.height, 0);
    assert_eq!(transaction.position, 0);

    database.close().unwrap();
}

// S2: headers pushed above the fork point pop back out in order.
#[test]
fn header_push_pop_roundtrip() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let genesis = genesis_hash(Network::Mainnet);
    let h1 = child_header(genesis, 1);
    let h2 = child_header(h1.hash(), 2);
    let h3 = child_header(h2.hash(), 3);

    for (height, header) in [h1, h2, h3].iter().enumerate() {
        database
            .push_header(header, height as u32 + 1, 0)
            .expect("header extends the candidate chain");
    }
    assert_eq!(database.blocks().top(true), Some(3));

    let fork_point = Checkpoint::new(genesis, 0);
    let outgoing = database
        .reorganize_headers(&fork_point, &[])
        .expect("pop above the fork point");

    assert_eq!(outgoing, vec![h1, h2, h3]);
    assert_eq!(database.blocks().top(true), Some(0));

    // The popped headers are pooled, not gone.
    assert!(database.blocks().get(&h2.hash()).unwrap().is_pooled());
}

// S3: a reorganization swaps the candidate chain above the fork point.
#[test]
fn reorganize_replaces_candidate_chain() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let genesis = genesis_hash(Network::Mainnet);
    let h1 = child_header(genesis, 1);
    let h2 = child_header(h1.hash(), 2);
    let h3 = child_header(h2.hash(), 3);
    for (height, header) in [h1, h2, h3].iter().enumerate() {
        database.push_header(header, height as u32 + 1, 0).unwrap();
    }

    let h2_prime = child_header(h1.hash(), 102);
    let h3_prime = child_header(h2_prime.hash(), 103);
    let h4_prime = child_header(h3_prime.hash(), 104);

    let fork_point = Checkpoint::new(h1.hash(), 1);
    let outgoing = database
        .reorganize_headers(&fork_point, &[h2_prime, h3_prime, h4_prime])
        .expect("reorganization applies");

    assert_eq!(outgoing, vec![h2, h3]);
    assert_eq!(database.blocks().top(true), Some(4));
    assert_eq!(database.blocks().get_at(1, true).unwrap().hash, h1.hash());
    assert_eq!(
        database.blocks().get_at(2, true).unwrap().hash,
        h2_prime.hash()
    );
    assert_eq!(
        database.blocks().get_at(4, true).unwrap().hash,
        h4_prime.hash()
    );
}

// S4: confirming a block records spender heights; popping clears them.
#[test]
fn push_block_tracks_spends_and_pop_reverses_them() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let genesis = genesis_block(Network::Mainnet);
    let prevout = OutPoint {
        hash: genesis.transactions[0].hash(),
        index: 0,
    };

    let block = block_with(
        genesis.hash(),
        1,
        vec![coinbase(1), spend(prevout, 40)],
    );
    database.push(&block, 1, 1_000).expect("block confirms");

    let spent = database
        .transactions()
        .get(&prevout.hash)
        .expect("genesis coinbase resolves");
    assert_eq!(spent.output_metadata[0].spender_height, 1);

    let spender = database
        .transactions()
        .get(&block.transactions[1].hash())
        .expect("spender resolves");
    assert_eq!(spender.height, 1);
    assert_eq!(spender.position, 1);
    assert_eq!(spender.median_time_past, 1_000);

    let popped = database.pop_block(1).expect("block pops");
    assert_eq!(popped.hash(), block.hash());
    assert_eq!(popped.transactions.len(), 2);

    let unspent = database.transactions().get(&prevout.hash).unwrap();
    assert_eq!(unspent.output_metadata[0].spender_height, UNSPENT);
    assert!(database
        .transactions()
        .get(&block.transactions[1].hash())
        .unwrap()
        .is_pooled());
}

// S5: transactions colliding into one bucket chain stay distinct.
#[test]
fn colliding_transactions_resolve_independently() {
    let dir = TempDir::new("database").unwrap();
    let mut settings = test_config(&dir);
    // One bucket forces every key into the same chain.
    settings.transaction_table_buckets = 1;

    let database =
        Database::create(settings, false, false, &genesis_block(Network::Mainnet)).unwrap();

    let first = coinbase(100);
    let second = coinbase(200);
    assert_ne!(first.hash(), second.hash());

    let first_link = database.store_transaction(&first).unwrap();
    let second_link = database.store_transaction(&second).unwrap();
    assert_ne!(first_link, second_link);

    let found_first = database.transactions().get(&first.hash()).unwrap();
    let found_second = database.transactions().get(&second.hash()).unwrap();
    assert_eq!(found_first.transaction, first);
    assert_eq!(found_second.transaction, second);
}

// Idempotence: re-storing a transaction yields the same link.
#[test]
fn transaction_store_is_idempotent() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let transaction = coinbase(7);
    let link = database.store_transaction(&transaction).unwrap();

    // The facade treats an exact duplicate as an error...
    match database.store_transaction(&transaction) {
        Err(Error::DuplicateTransaction) => {}
        other => panic!("expected duplicate transaction, got {:?}", other.map(|_| ())),
    }

    // ...while the database itself is idempotent and returns the same
    // link.
    assert_eq!(database.transactions().store(&transaction).unwrap(), link);
}

// The payment index records receipts and spends of a confirmed block.
#[test]
fn confirmed_blocks_are_cataloged() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let genesis = genesis_block(Network::Mainnet);
    let prevout = OutPoint {
        hash: genesis.transactions[0].hash(),
        index: 0,
    };
    let spender = spend(prevout, 40);
    let block = block_with(genesis.hash(), 1, vec![coinbase(1), spender.clone()]);

    database.push(&block, 1, 0).unwrap();

    let payments = database.payments().expect("cataloging is enabled");

    // The new output is indexed under its own script.
    let receipts = payments.history(&(&spender.outputs[0].lock_script).into());
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].output);
    assert_eq!(receipts[0].value, 40);

    // The spend is indexed under the genesis coinbase's script.
    let spent_script = &genesis.transactions[0].outputs[0].lock_script;
    let spends = payments.history(&spent_script.into());
    assert_eq!(spends.len(), 2);
    assert!(spends.iter().any(|record| !record.output));
}

// The unspent-output cache answers lookups after confirmation.
#[test]
fn unspent_outputs_are_served_from_the_engine() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let genesis = genesis_block(Network::Mainnet);
    let block = block_with(genesis.hash(), 1, vec![coinbase(1)]);
    database.push(&block, 1, 500).unwrap();

    let outpoint = OutPoint {
        hash: block.transactions[0].hash(),
        index: 0,
    };
    let unspent = database
        .transactions()
        .unspent_output(&outpoint)
        .expect("confirmed coinbase output is unspent");
    assert_eq!(unspent.output.value, 50);
    assert_eq!(unspent.height, 1);
    assert_eq!(unspent.median_time_past, 500);
    assert!(unspent.coinbase);
}

// Filters round trip through the optional neutrino database.
#[test]
fn filters_roundtrip() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    let filters = database.filters().expect("filters are enabled");
    let hash = genesis_hash(Network::Mainnet);
    filters
        .store(&hash, 0, &[7; 32], &[1, 2, 3])
        .expect("filter stores");

    let result = filters.get(&hash).expect("filter resolves");
    assert_eq!(result.header, [7; 32]);
    assert_eq!(result.filter, vec![1, 2, 3]);
}

// The store survives close and reopen with its chain intact.
#[test]
fn reopen_preserves_the_chain() {
    let dir = TempDir::new("database").unwrap();

    let genesis = genesis_hash(Network::Mainnet);
    let h1 = child_header(genesis, 1);
    {
        let database = create_database(&dir);
        database.push_header(&h1, 1, 0).unwrap();
        database.close().unwrap();
    }

    let database = Database::open(test_config(&dir), true, true).expect("store reopens");
    assert_eq!(database.blocks().top(true), Some(1));
    assert_eq!(database.blocks().get_at(1, true).unwrap().hash, h1.hash());
    assert_eq!(database.blocks().top(false), Some(0));
}

// S6: a flush lock left by a dead writer blocks the next open.
#[test]
fn unclean_shutdown_refuses_to_open() {
    let dir = TempDir::new("database").unwrap();

    let mut settings = test_config(&dir);
    settings.flush_writes = true;

    {
        let database = Database::create(
            settings.clone(),
            false,
            false,
            &genesis_block(Network::Mainnet),
        )
        .expect("flushed store creates");
        database.close().unwrap();
    }

    // Simulate a process killed between begin_write and end_write: the
    // flush sentinel is on disk.
    std::fs::File::create(dir.path().join("flush_lock")).unwrap();

    match Database::open(settings, false, false) {
        Err(Error::UncleanShutdown) => {}
        other => panic!("expected unclean shutdown, got {:?}", other.map(|_| ())),
    }
}

mod prop {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        // Each case maps a store on disk, so keep the count low.
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        // Stored headers read back exactly as written.
        #[test]
        fn stored_headers_roundtrip(header in any::<Header>()) {
            let dir = TempDir::new("block-prop").unwrap();
            let database = BlockDatabase::new(&test_config(&dir)).unwrap();
            database.create().unwrap();

            database.store(&header, 9, 77).unwrap();

            let result = database.get(&header.hash()).expect("stored header resolves");
            prop_assert_eq!(result.header, header);
            prop_assert_eq!(result.height, 9);
            prop_assert_eq!(result.median_time_past, 77);
        }
    }
}

// A second process (simulated by a second handle) cannot open the store.
#[test]
fn exclusive_lock_blocks_second_open() {
    let dir = TempDir::new("database").unwrap();
    let database = create_database(&dir);

    match Database::open(test_config(&dir), false, false) {
        Err(Error::StoreLockFailure) => {}
        other => panic!("expected lock failure, got {:?}", other.map(|_| ())),
    }

    drop(database);
}
