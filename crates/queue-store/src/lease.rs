use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::time::Instant;

/// Identifies a lease granted by [`crate::Store::grant_lease`].
pub type LeaseId = u64;

pub(crate) struct LeaseEntry {
    pub(crate) expires_at: Instant,
    pub(crate) keys: Vec<String>,
}

/// In-memory lease table.
///
/// The original etcd-backed queue attaches leases to keys server-side and
/// relies on etcd's own expiry sweep. This embedded store has no separate
/// lease-bearing server, so lease bookkeeping lives here instead; see
/// `SPEC_FULL.md` §4.A for why this does not need to be durable across
/// restarts (the queue's Non-goals exclude multi-node scaling, and a
/// restarted single-node instance has no in-flight workers to reconcile
/// with).
pub(crate) struct LeaseTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<LeaseId, LeaseEntry>>,
}

impl LeaseTable {
    pub(crate) fn new() -> Self {
        LeaseTable {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn grant(&self, ttl: std::time::Duration) -> LeaseId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + ttl;
        self.entries.lock().unwrap().insert(
            id,
            LeaseEntry {
                expires_at,
                keys: Vec::new(),
            },
        );
        id
    }

    pub(crate) fn attach_key(&self, lease: LeaseId, key: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(&lease) {
            if !entry.keys.iter().any(|k| k == key) {
                entry.keys.push(key.to_string());
            }
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|e| e.expires_at)
            .min()
    }

    /// Removes and returns the keys of every lease that has expired as of `now`.
    pub(crate) fn drain_expired(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.lock().unwrap();
        let expired_ids: Vec<LeaseId> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut keys = Vec::new();
        for id in expired_ids {
            if let Some(entry) = entries.remove(&id) {
                keys.extend(entry.keys);
            }
        }
        keys
    }
}
