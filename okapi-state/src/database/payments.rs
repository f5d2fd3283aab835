use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use tracing::trace;

use okapi_chain::serialization::sha256d;
use okapi_chain::transaction::Transaction;
use okapi_chain::transparent::{OutPoint, Output, Script};

use crate::config::Config;
use crate::error::Result;
use crate::memory::FileStorage;
use crate::primitives::{HashTable, Key, Link, RecordManager};
use crate::store;

use super::transactions::TxLink;
use super::{read_u32, write_u32};

/// The key of a payment history: the double-SHA256 of an output's lock
/// script.
///
/// Address decoding is out of scope here, so histories are keyed by the
/// script itself; wallets derive the same key from the scripts they watch.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PaymentKey(pub [u8; 32]);

impl fmt::Debug for PaymentKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PaymentKey")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl From<&Script> for PaymentKey {
    fn from(script: &Script) -> Self {
        PaymentKey(sha256d::hash(&script.0))
    }
}

impl Key for PaymentKey {
    const SIZE: u64 = 32;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);
        PaymentKey(key)
    }
}

/// One row of a payment history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentRecord {
    /// The transaction-table link of the paying or spending transaction.
    pub tx_link: TxLink,
    /// The output index (receipts) or input index (spends).
    pub point_index: u32,
    /// The output value in the smallest unit.
    pub value: u64,
    /// Whether this row is a receipt (output) or a spend (input).
    pub output: bool,
}

/// A link into the payment row index.
type RowLink = u32;

// Table element value: the head row of this key's history list.
const TABLE_VALUE_SIZE: u64 = 4;

// Row layout: [ next:4 | tx_link:8 | point_index:4 | value:8 | output:1 ]
const ROW_NEXT_OFFSET: u64 = 0;
const ROW_TX_LINK_OFFSET: u64 = 4;
const ROW_POINT_INDEX_OFFSET: u64 = 12;
const ROW_VALUE_OFFSET: u64 = 16;
const ROW_OUTPUT_OFFSET: u64 = 24;
const ROW_SIZE: u64 = 25;

type PaymentTable = HashTable<RecordManager<u32>, PaymentKey>;

/// The optional address index: per-script payment history.
///
/// Two files: `payment_table` maps a script key to the head of its row
/// list, and `payment_index` holds the rows themselves. Rows are prepended,
/// so iteration yields the most recent payment first.
pub struct PaymentDatabase {
    table_file: Arc<FileStorage>,
    table: PaymentTable,

    index_file: Arc<FileStorage>,
    rows: RecordManager<RowLink>,

    /// Provides atomicity for the per-key head links.
    metadata_mutex: RwLock<()>,
}

impl PaymentDatabase {
    pub fn new(settings: &Config) -> Result<Self> {
        let buckets = settings.payment_table_buckets as u64;

        let table_file = Arc::new(FileStorage::open(
            &settings.directory.join(store::PAYMENT_TABLE),
            settings.payment_table_size,
            settings.file_growth_rate,
        )?);
        let table = HashTable::new(
            RecordManager::new(
                table_file.clone(),
                PaymentTable::header_size(buckets),
                PaymentKey::SIZE + <u32 as Link>::SIZE + TABLE_VALUE_SIZE,
            ),
            buckets,
        );

        let index_file = Arc::new(FileStorage::open(
            &settings.directory.join(store::PAYMENT_INDEX),
            settings.payment_index_size,
            settings.file_growth_rate,
        )?);
        let rows = RecordManager::new(index_file.clone(), 0, ROW_SIZE);

        Ok(Self {
            table_file,
            table,
            index_file,
            rows,
            metadata_mutex: RwLock::new(()),
        })
    }

    // Startup and shutdown.

    pub fn create(&self) -> Result<()> {
        self.table.create()?;
        self.rows.create()
    }

    pub fn open(&self) -> Result<()> {
        self.table.start()?;
        self.rows.start()
    }

    pub fn commit(&self) -> Result<()> {
        self.rows.commit()?;
        self.table.commit()
    }

    pub fn flush(&self) -> Result<()> {
        self.table_file.flush()?;
        self.index_file.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.table_file.close()?;
        self.index_file.close()
    }

    // Queries.

    /// The payment history of `key`, most recent first.
    pub fn history(&self, key: &PaymentKey) -> Vec<PaymentRecord> {
        let head = {
            let _guard = self.metadata_mutex.read();
            match self.table.find(key) {
                Some(element) => element.read(|value| u32::read(value)),
                None => RowLink::NOT_ALLOCATED,
            }
        };

        PaymentIterator {
            database: self,
            row: head,
        }
        .collect()
    }

    // Writers.

    /// Index every payment made by `transaction`.
    ///
    /// Outputs are indexed under their own lock script; inputs are indexed
    /// under the script of the output they spend, resolved through
    /// `resolve_prevout`. Inputs whose previous output is unknown are
    /// skipped.
    pub fn catalog(
        &self,
        tx_link: TxLink,
        transaction: &Transaction,
        resolve_prevout: impl Fn(&OutPoint) -> Option<Output>,
    ) -> Result<()> {
        for (index, output) in transaction.outputs.iter().enumerate() {
            let record = PaymentRecord {
                tx_link,
                point_index: index as u32,
                value: output.value,
                output: true,
            };
            self.push(&PaymentKey::from(&output.lock_script), &record)?;
        }

        for (index, input) in transaction.inputs.iter().enumerate() {
            let outpoint = match input.outpoint() {
                Some(outpoint) => outpoint,
                None => continue,
            };

            let spent = match resolve_prevout(&outpoint) {
                Some(output) => output,
                None => continue,
            };

            let record = PaymentRecord {
                tx_link,
                point_index: index as u32,
                value: spent.value,
                output: false,
            };
            self.push(&PaymentKey::from(&spent.lock_script), &record)?;
        }

        trace!(?tx_link, "cataloged transaction");
        Ok(())
    }

    /// Prepend `record` to `key`'s history list.
    fn push(&self, key: &PaymentKey, record: &PaymentRecord) -> Result<()> {
        let _guard = self.metadata_mutex.write();

        let previous_head = match self.table.find(key) {
            Some(element) => element.read(|value| u32::read(value)),
            None => RowLink::NOT_ALLOCATED,
        };

        let row = self.rows.allocate(1)?;
        {
            let access = self.index_file.access();
            let mut body = [0u8; ROW_SIZE as usize];
            write_u32(&mut body, ROW_NEXT_OFFSET, previous_head);
            record.tx_link.write(&mut body[ROW_TX_LINK_OFFSET as usize..]);
            write_u32(&mut body, ROW_POINT_INDEX_OFFSET, record.point_index);
            LittleEndian::write_u64(&mut body[ROW_VALUE_OFFSET as usize..], record.value);
            body[ROW_OUTPUT_OFFSET as usize] = record.output as u8;
            access.write(self.rows.offset(row), &body);
        }

        match self.table.find(key) {
            Some(element) => {
                let access = self.table_file.access();
                let mut head = [0u8; 4];
                row.write(&mut head);
                access.write(element.value_offset(), &head);
            }
            None => {
                let element = self.table.allocate(key, TABLE_VALUE_SIZE, |value| {
                    write_u32(value, 0, row);
                })?;
                self.table.link(&element);
            }
        }

        Ok(())
    }

    fn read_row(&self, row: RowLink) -> (PaymentRecord, RowLink) {
        let access = self.index_file.access();
        let body = access.read(self.rows.offset(row), ROW_SIZE as usize);

        let record = PaymentRecord {
            tx_link: TxLink::read(&body[ROW_TX_LINK_OFFSET as usize..]),
            point_index: read_u32(body, ROW_POINT_INDEX_OFFSET),
            value: LittleEndian::read_u64(&body[ROW_VALUE_OFFSET as usize..]),
            output: body[ROW_OUTPUT_OFFSET as usize] != 0,
        };

        (record, RowLink::read(&body[ROW_NEXT_OFFSET as usize..]))
    }
}

/// Walks a payment history list.
struct PaymentIterator<'a> {
    database: &'a PaymentDatabase,
    row: RowLink,
}

impl<'a> Iterator for PaymentIterator<'a> {
    type Item = PaymentRecord;

    fn next(&mut self) -> Option<PaymentRecord> {
        if self.row.is_terminal() || self.database.rows.past_eof(self.row) {
            return None;
        }

        let (record, next) = self.database.read_row(self.row);
        self.row = next;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use okapi_chain::transparent::Input;

    use super::*;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            directory: dir.path().to_owned(),
            payment_table_buckets: 8,
            block_table_buckets: 8,
            transaction_table_buckets: 8,
            ..Config::default()
        }
    }

    fn database(dir: &TempDir) -> PaymentDatabase {
        let database = PaymentDatabase::new(&test_config(dir)).unwrap();
        database.create().unwrap();
        database
    }

    fn output(value: u64, script: &[u8]) -> Output {
        Output {
            value,
            lock_script: Script(script.to_vec()),
        }
    }

    #[test]
    fn outputs_are_indexed_under_their_script() {
        let dir = TempDir::new("payment_database").unwrap();
        let database = database(&dir);

        let transaction = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![output(50, b"alpha"), output(25, b"beta")],
            lock_time: 0,
        };

        database.catalog(7, &transaction, |_| None).unwrap();

        let history = database.history(&PaymentKey::from(&Script(b"alpha".to_vec())));
        assert_eq!(
            history,
            vec![PaymentRecord {
                tx_link: 7,
                point_index: 0,
                value: 50,
                output: true,
            }]
        );
    }

    #[test]
    fn histories_accumulate_most_recent_first() {
        let dir = TempDir::new("payment_database").unwrap();
        let database = database(&dir);
        let script = Script(b"shared".to_vec());

        for (link, value) in &[(1u64, 10u64), (2, 20)] {
            let transaction = Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![output(*value, &script.0)],
                lock_time: 0,
            };
            database.catalog(*link, &transaction, |_| None).unwrap();
        }

        let history = database.history(&PaymentKey::from(&script));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, 20);
        assert_eq!(history[1].value, 10);
    }

    #[test]
    fn spends_are_indexed_under_the_spent_script() {
        let dir = TempDir::new("payment_database").unwrap();
        let database = database(&dir);
        let spent = output(99, b"gamma");

        let transaction = Transaction {
            version: 1,
            inputs: vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: okapi_chain::transaction::Hash([9; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        };

        let resolved = spent.clone();
        database
            .catalog(3, &transaction, move |_| Some(resolved.clone()))
            .unwrap();

        let history = database.history(&PaymentKey::from(&Script(b"gamma".to_vec())));
        assert_eq!(history.len(), 1);
        assert!(!history[0].output);
        assert_eq!(history[0].value, 99);
    }

    #[test]
    fn unknown_prevouts_are_skipped() {
        let dir = TempDir::new("payment_database").unwrap();
        let database = database(&dir);

        let transaction = Transaction {
            version: 1,
            inputs: vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: okapi_chain::transaction::Hash([1; 32]),
                    index: 3,
                },
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        };

        database.catalog(4, &transaction, |_| None).unwrap();
        assert!(database
            .history(&PaymentKey::from(&Script(vec![])))
            .is_empty());
    }
}
