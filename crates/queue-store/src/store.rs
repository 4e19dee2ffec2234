use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::lease::LeaseTable;

pub use crate::lease::LeaseId;

/// Revision assigned to the most recent write of a key. Revisions are
/// monotonic within the store but, unlike etcd, are not exposed to callers
/// as a point-in-time snapshot marker; the queue engine only needs "has
/// this key changed since I last looked", which the watch stream already
/// answers.
pub type Revision = u64;

const WATCH_CHANNEL_CAPACITY: usize = 100;
const COMPACTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What a [`Store::watch`] call observes.
#[derive(Debug, Clone)]
pub enum WatchTarget {
    /// Watch a single, exact key.
    Key(String),
    /// Watch every key beginning with this prefix.
    Prefix(String),
}

/// An observed mutation of the store.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    /// `prev_value` is the value the key held immediately before deletion,
    /// recovered from the store's in-memory last-value cache since this
    /// backend has no first-class MVCC previous-value read (see
    /// `SPEC_FULL.md` §4.A).
    Delete {
        key: String,
        prev_value: Option<Vec<u8>>,
    },
}

pub type WatchReceiver = mpsc::Receiver<WatchEvent>;

struct Watchers {
    keyed: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
    prefixed: Vec<(String, mpsc::Sender<WatchEvent>)>,
}

impl Watchers {
    fn new() -> Self {
        Watchers {
            keyed: HashMap::new(),
            prefixed: Vec::new(),
        }
    }
}

struct Inner {
    db: rocksdb::DB,
    watchers: Mutex<Watchers>,
    prev_values: Mutex<HashMap<String, Vec<u8>>>,
    leases: LeaseTable,
    reaper_notify: Notify,
    closed: AtomicBool,
    data_dir: PathBuf,
}

/// A single-node, embedded, consistent key-value store.
///
/// Backed by `rocksdb::DB` for durable storage (grounded on
/// `derive::registers::Registers`'s use of `rocksdb::DB`), with an
/// in-process revision/lease/watch layer supplying the put/get/delete,
/// ranged-scan, lease-expiry, and watch-stream contract the queue engine
/// depends on. See `SPEC_FULL.md` §4.A for why this single-node design is
/// the resolution adopted here in place of a peer-replicated consensus
/// store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Opens (or creates) the store at `data_dir`, performs a readiness
    /// probe, and starts the background lease-reaper and compaction tasks.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Store, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let dir_for_open = data_dir.clone();

        let db = tokio::task::spawn_blocking(move || {
            let mut opts = rocksdb::Options::default();
            opts.create_if_missing(true);
            opts.create_missing_column_families(true);
            rocksdb::DB::open(&opts, &dir_for_open)
        })
        .await
        .expect("rocksdb open task panicked")?;

        let inner = Arc::new(Inner {
            db,
            watchers: Mutex::new(Watchers::new()),
            prev_values: Mutex::new(HashMap::new()),
            leases: LeaseTable::new(),
            reaper_notify: Notify::new(),
            closed: AtomicBool::new(false),
            data_dir,
        });

        // Readiness probe: a trivial read proving the database opened and
        // is servicing reads before we hand the store back to callers.
        {
            let inner = inner.clone();
            tokio::task::spawn_blocking(move || inner.db.get(b"\x00readiness-probe"))
                .await
                .expect("rocksdb readiness probe panicked")?;
        }
        info!(data_dir = %inner.data_dir.display(), "queue-store: ready");

        tokio::spawn(run_reaper(inner.clone()));
        tokio::spawn(run_compactor(inner.clone()));

        Ok(Store { inner })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Grants a lease that expires after `ttl`. Attach it to a key via
    /// [`Store::put`]; on expiry the key is deleted and watchers observe a
    /// delete event exactly as they would for an explicit delete.
    pub async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        self.ensure_open()?;
        let id = self.inner.leases.grant(ttl);
        self.inner.reaper_notify.notify_one();
        Ok(id)
    }

    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        self.ensure_open()?;

        let inner = self.inner.clone();
        let key_owned = key.to_string();
        let value_for_db = value.clone();
        tokio::task::spawn_blocking(move || inner.db.put(key_owned.as_bytes(), &value_for_db))
            .await
            .expect("rocksdb put task panicked")?;

        self.inner
            .prev_values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());

        if let Some(lease_id) = lease {
            self.inner.leases.attach_key(lease_id, key);
        }

        let revision = notify(&self.inner, WatchEvent::Put { key: key.to_string(), value }).await;
        Ok(revision)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.clone();
        let key_owned = key.to_string();
        let value = tokio::task::spawn_blocking(move || inner.db.get(key_owned.as_bytes()))
            .await
            .expect("rocksdb get task panicked")?;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        delete_and_notify(&self.inner, key).await
    }

    /// Returns every key/value pair whose key begins with `prefix`, in
    /// ascending lexicographic order — the ordering the queue engine relies
    /// on for its "first key" priority scan.
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.ensure_open()?;
        let inner = self.inner.clone();
        let prefix_owned = prefix.to_string();
        let rows = tokio::task::spawn_blocking(move || {
            let mode = rocksdb::IteratorMode::From(prefix_owned.as_bytes(), rocksdb::Direction::Forward);
            let mut rows = Vec::new();
            for item in inner.db.iterator(mode) {
                let (k, v) = item?;
                if !k.starts_with(prefix_owned.as_bytes()) {
                    break;
                }
                rows.push((String::from_utf8_lossy(&k).into_owned(), v.to_vec()));
            }
            Ok::<_, rocksdb::Error>(rows)
        })
        .await
        .expect("rocksdb scan task panicked")?;
        Ok(rows)
    }

    /// Opens a watch stream for `target`. The returned receiver is bounded
    /// at `WATCH_CHANNEL_CAPACITY`; a stalled consumer applies backpressure
    /// to the one key/prefix it's watching and does not affect others (see
    /// `SPEC_FULL.md` §5).
    pub async fn watch(&self, target: WatchTarget) -> Result<WatchReceiver, StoreError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watchers = self.inner.watchers.lock().unwrap();
        match target {
            WatchTarget::Key(key) => {
                watchers.keyed.entry(key).or_default().push(tx);
            }
            WatchTarget::Prefix(prefix) => {
                watchers.prefixed.push((prefix, tx));
            }
        }
        Ok(rx)
    }

    /// Stops serving requests. Dropping the last clone of `Store` drops the
    /// underlying `rocksdb::DB`, which flushes on drop.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        info!(data_dir = %self.inner.data_dir.display(), "queue-store: stopped");
    }

    /// The directory this store is rooted at, for introspection (e.g. the
    /// CLI's health output).
    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }
}

async fn delete_and_notify(inner: &Arc<Inner>, key: &str) -> Result<(), StoreError> {
    let inner2 = inner.clone();
    let key_owned = key.to_string();
    tokio::task::spawn_blocking(move || inner2.db.delete(key_owned.as_bytes()))
        .await
        .expect("rocksdb delete task panicked")?;

    let prev_value = inner.prev_values.lock().unwrap().remove(key);

    notify(
        inner,
        WatchEvent::Delete {
            key: key.to_string(),
            prev_value,
        },
    )
    .await;
    Ok(())
}

/// Dispatches `event` to every watcher whose target matches `event`'s key,
/// dropping senders whose receiver has gone away. Returns a synthetic
/// monotonic revision number for callers that want one.
async fn notify(inner: &Arc<Inner>, event: WatchEvent) -> Revision {
    let key = match &event {
        WatchEvent::Put { key, .. } => key.clone(),
        WatchEvent::Delete { key, .. } => key.clone(),
    };

    let (keyed_senders, prefixed_senders) = {
        let mut watchers = inner.watchers.lock().unwrap();
        let keyed = watchers
            .keyed
            .get_mut(&key)
            .map(|senders| {
                senders.retain(|tx| !tx.is_closed());
                senders.clone()
            })
            .unwrap_or_default();
        watchers.prefixed.retain(|(_, tx)| !tx.is_closed());
        let prefixed = watchers
            .prefixed
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, tx)| tx.clone())
            .collect::<Vec<_>>();
        (keyed, prefixed)
    };

    for tx in keyed_senders.into_iter().chain(prefixed_senders) {
        if tx.send(event.clone()).await.is_err() {
            debug!(%key, "queue-store: watcher dropped before delivery");
        }
    }

    // A synthetic revision: callers only use this for logging/diagnostics,
    // never for correctness (ordering is provided by the watch stream
    // itself, per `SPEC_FULL.md` §5).
    0
}

async fn run_reaper(inner: Arc<Inner>) {
    loop {
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        match inner.leases.next_deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = inner.reaper_notify.notified() => { continue; }
                }
            }
            None => {
                inner.reaper_notify.notified().await;
                continue;
            }
        }

        let expired_keys = inner.leases.drain_expired(tokio::time::Instant::now());
        for key in expired_keys {
            if let Err(err) = delete_and_notify(&inner, &key).await {
                warn!(%key, %err, "queue-store: lease reaper failed to delete expired key");
            } else {
                debug!(%key, "queue-store: reaped expired lease");
            }
        }
    }
}

async fn run_compactor(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(COMPACTION_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        let inner = inner.clone();
        let _ = tokio::task::spawn_blocking(move || {
            inner.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        })
        .await;
    }
}
