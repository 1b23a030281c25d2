// =============================================================================
// Previous RSI Store — last reported RSI per symbol
// =============================================================================
//
// Process-wide memory used to classify RSI direction. Entries are created on a
// symbol's first successful computation, overwritten on every later success
// and never removed.
//
// Thread safety:
//   - Keys are spread over a fixed number of shards, each guarded by its own
//     parking_lot::Mutex, so scans touching different symbols rarely contend.
//   - Writes are last-writer-wins per symbol. Two sessions scanning the same
//     symbol at the same time may each see the other's value as "previous";
//     the map itself is never torn.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

const SHARD_COUNT: usize = 16;

pub struct PreviousRsiStore {
    shards: Vec<Mutex<HashMap<String, f64>>>,
}

impl PreviousRsiStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, symbol: &str) -> &Mutex<HashMap<String, f64>> {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Last RSI recorded for `symbol`, if any.
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.shard(symbol).lock().get(symbol).copied()
    }

    /// Record `rsi` as the latest value for `symbol`.
    pub fn set(&self, symbol: &str, rsi: f64) {
        self.shard(symbol).lock().insert(symbol.to_string(), rsi);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl Default for PreviousRsiStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PreviousRsiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviousRsiStore")
            .field("symbols", &self.len())
            .finish()
    }
}
