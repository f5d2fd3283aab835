use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use okapi_chain::transaction::{self, Transaction};
use okapi_chain::transparent::{OutPoint, Output};

/// A cached view of one unspent output and its confirmation context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnspentOutput {
    pub output: Output,
    pub height: u32,
    pub median_time_past: u32,
    pub coinbase: bool,
}

struct CachedTransaction {
    height: u32,
    median_time_past: u32,
    coinbase: bool,
    /// Remaining unspent outputs by output index. The entry for a
    /// transaction is dropped once all of its outputs are spent.
    outputs: HashMap<u32, Output>,
}

/// A bounded cache of recently confirmed transactions' unspent outputs.
///
/// Purely a read accelerator: it is populated on confirm and trimmed on
/// spend, and is never a source of truth. A capacity of zero disables it.
pub struct UnspentOutputs {
    cache: Option<Mutex<LruCache<transaction::Hash, CachedTransaction>>>,
    hits: AtomicU64,
    queries: AtomicU64,
}

impl UnspentOutputs {
    pub fn new(capacity: u32) -> Self {
        let cache = if capacity == 0 {
            None
        } else {
            Some(Mutex::new(LruCache::new(capacity as usize)))
        };

        Self {
            cache,
            hits: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    pub fn disabled(&self) -> bool {
        self.cache.is_none()
    }

    pub fn len(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.lock().len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fraction of queries answered from the cache.
    pub fn hit_rate(&self) -> f64 {
        let queries = self.queries.load(Ordering::Relaxed);
        if queries == 0 {
            1.0
        } else {
            self.hits.load(Ordering::Relaxed) as f64 / queries as f64
        }
    }

    /// Cache `transaction`'s outputs as unspent at `height`.
    pub fn add(&self, transaction: &Transaction, height: u32, median_time_past: u32) {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return,
        };

        if transaction.outputs.is_empty() {
            return;
        }

        let outputs = transaction
            .outputs
            .iter()
            .enumerate()
            .map(|(index, output)| (index as u32, output.clone()))
            .collect();

        cache.lock().put(
            transaction.hash(),
            CachedTransaction {
                height,
                median_time_past,
                coinbase: transaction.is_coinbase(),
                outputs,
            },
        );
    }

    /// Drop a whole transaction, e.g. when it is unconfirmed.
    pub fn remove_transaction(&self, hash: &transaction::Hash) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(hash);
        }
    }

    /// Drop one output, e.g. when it is spent.
    pub fn remove(&self, outpoint: &OutPoint) {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return,
        };

        let mut cache = cache.lock();
        let emptied = match cache.get_mut(&outpoint.hash) {
            Some(entry) => {
                entry.outputs.remove(&outpoint.index);
                entry.outputs.is_empty()
            }
            None => return,
        };

        if emptied {
            cache.pop(&outpoint.hash);
        }
    }

    /// Look up an unspent output.
    pub fn get(&self, outpoint: &OutPoint) -> Option<UnspentOutput> {
        let cache = self.cache.as_ref()?;
        self.queries.fetch_add(1, Ordering::Relaxed);

        let mut cache = cache.lock();
        let entry = cache.get(&outpoint.hash)?;
        let output = entry.outputs.get(&outpoint.index)?.clone();

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(UnspentOutput {
            output,
            height: entry.height,
            median_time_past: entry.median_time_past,
            coinbase: entry.coinbase,
        })
    }
}
