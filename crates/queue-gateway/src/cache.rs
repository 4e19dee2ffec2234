use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use queue_engine::Item;

/// One cached entry: the latest observed snapshot, plus the wall-clock
/// instant it was inserted (used by the reaper, not by callers).
struct Entry {
    item: Item,
    inserted_at: Instant,
}

/// Process-local map from RequestID to the latest [`Item`] snapshot.
///
/// Grounded on `crates/agent/src/api/mod.rs`'s `App.snapshot:
/// RwLock<Snapshot>` pattern (`SPEC_FULL.md` §4.C): a plain
/// `std::sync::RwLock`-guarded map, not a third-party concurrent-map crate,
/// since nothing in this workspace's dependency stack reaches for one. The
/// cache is not authoritative — it answers polling GETs without a KV
/// round-trip and coordinates the one watcher task per RequestID that the
/// handlers spawn.
pub struct RequestCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl RequestCache {
    pub fn new() -> RequestCache {
        RequestCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached snapshot for `request_id`, if any.
    pub fn load(&self, request_id: &str) -> Option<Item> {
        self.entries
            .read()
            .unwrap()
            .get(request_id)
            .map(|e| e.item.clone())
    }

    /// Inserts or overwrites the snapshot for `request_id`. Only bumps
    /// `inserted_at` the first time a RequestID is seen, so the reaper's
    /// age check reflects how long the request has been outstanding, not
    /// how recently it was last updated.
    pub fn store(&self, request_id: &str, item: Item) {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(request_id) {
            Some(entry) => entry.item = item,
            None => {
                entries.insert(
                    request_id.to_string(),
                    Entry {
                        item,
                        inserted_at: Instant::now(),
                    },
                );
            }
        }
    }

    /// Removes `request_id`, returning its last known snapshot.
    pub fn delete(&self, request_id: &str) -> Option<Item> {
        self.entries
            .write()
            .unwrap()
            .remove(request_id)
            .map(|e| e.item)
    }

    /// True if `request_id` is still present (used by the watcher task to
    /// decide whether to keep updating a cache entry that may have been
    /// removed by a concurrent cancel).
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.read().unwrap().contains_key(request_id)
    }

    /// Sweeps every entry older than `max_age`, regardless of progress,
    /// logging a warning for each non-terminal eviction. Returns the number
    /// of entries removed.
    fn reap(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<(String, bool, u32)> = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.inserted_at) > max_age)
                .map(|(id, e)| (id.clone(), e.item.is_terminal(), e.item.progress))
                .collect()
        };

        let mut entries = self.entries.write().unwrap();
        for (request_id, terminal, progress) in &stale {
            entries.remove(request_id);
            if !terminal {
                tracing::warn!(
                    request_id,
                    progress,
                    "queue-gateway: reaping non-terminal request cache entry"
                );
            }
        }
        stale.len()
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        RequestCache::new()
    }
}

/// Runs forever, sweeping `cache` every `period` for entries older than
/// `period` itself (default 5 minutes per `SPEC_FULL.md` §6's
/// `reaperPeriod`). Follows the periodic controller task shape in
/// `crates/agent/src/controllers/periodic.rs`: wake on a fixed tick,
/// sweep, log.
pub async fn run_reaper(cache: std::sync::Arc<RequestCache>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let removed = cache.reap(period);
        if removed > 0 {
            tracing::debug!(removed, "queue-gateway: reaper swept stale request cache entries");
        }
    }
}
