use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use queue_store::{Store, WatchEvent, WatchTarget};

use crate::cancel::{CancelHandle, CancelToken};
use crate::error::EngineError;
use crate::item::{Item, MAX_PROGRESS};
use crate::keys;
use crate::options::EnqueueOptions;

/// Bounded capacity for per-item watch channels (`SPEC_FULL.md` §5).
const WATCH_CHANNEL_CAPACITY: usize = 100;

/// A lazy, finite sequence of [`Item`] snapshots for one live key or one
/// [`Engine::front`] wait. Closes on the terminal event.
pub type ItemWatcher = mpsc::Receiver<Item>;

/// The queue engine: enqueue/front/dequeue/watch over an embedded
/// [`Store`], implementing the key layout, priority encoding, and
/// watch-driven state machine from `SPEC_FULL.md` §4.B.
///
/// `write_lock` is held only across the "write initial value, then open
/// watch" bookkeeping sequence (`SPEC_FULL.md` §5) — not across the full
/// operation, since the watcher itself must keep running after the lock
/// is released.
pub struct Engine {
    store: Store,
    write_lock: AsyncMutex<()>,
    root: CancelHandle,
}

impl Engine {
    pub fn new(store: Store) -> Engine {
        let (root, _token) = CancelHandle::new();
        Engine {
            store,
            write_lock: AsyncMutex::new(()),
            root,
        }
    }

    /// Cancels the engine's root context, tearing down every in-flight
    /// watcher spawned by `enqueue`/`front`/`watch` (they each select
    /// against a child of this handle alongside their caller-supplied
    /// `cancel`), then closes the underlying store. See `SPEC_FULL.md`
    /// §4.B operation 5.
    pub async fn stop(&self) {
        self.root.cancel();
        self.store.close().await;
        info!("engine: stopped");
    }

    /// Adds or overwrites an item in the queue, returning a watcher for its
    /// lifecycle. See `SPEC_FULL.md` §4.B operation 1.
    pub async fn enqueue(
        &self,
        item: Item,
        opts: EnqueueOptions,
        cancel: CancelToken,
    ) -> ItemWatcher {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut cur = item;

        let guard = self.write_lock.lock().await;

        let data = match serde_json::to_vec(&cur) {
            Ok(data) => data,
            Err(err) => {
                cur.error = err.to_string();
                let _ = tx.send(cur).await;
                return rx;
            }
        };

        let lease = match opts.effective_ttl() {
            Some(ttl) => match self.store.grant_lease(ttl).await {
                Ok(id) => Some(id),
                Err(err) => {
                    cur.error = err.to_string();
                    let _ = tx.send(cur).await;
                    return rx;
                }
            },
            None => None,
        };

        if let Err(err) = self.store.put(&cur.key, data, lease).await {
            cur.error = err.to_string();
            let _ = tx.send(cur).await;
            return rx;
        }
        debug!(key = %cur.key, "enqueue: wrote item");

        if cur.progress >= MAX_PROGRESS {
            if let Err(err) = self.finalize(&mut cur).await {
                cur.error = err.to_string();
            } else {
                info!(key = %cur.key, "enqueue: item finished");
            }
            let _ = tx.send(cur).await;
            return rx;
        }

        let watch_rx = match self.store.watch(WatchTarget::Key(cur.key.clone())).await {
            Ok(rx) => rx,
            Err(err) => {
                cur.error = err.to_string();
                let _ = tx.send(cur).await;
                return rx;
            }
        };
        drop(guard);

        tokio::spawn(forward_enqueue_watch(cur, watch_rx, tx, cancel, self.root.child()));
        rx
    }

    /// Deletes the scheduled key and writes the completed-prefix archive.
    /// Only reached when an item is already at `MAX_PROGRESS` on enqueue.
    async fn finalize(&self, cur: &mut Item) -> Result<(), queue_store::StoreError> {
        self.store.delete(&cur.key).await?;
        let completed_key = keys::completed_key_for(&cur.key);
        let data = serde_json::to_vec(cur).unwrap_or_default();
        self.store.put(&completed_key, data, None).await?;
        Ok(())
    }

    /// Returns a one-item watcher for the highest-priority item in
    /// `bucket`, waiting for one to appear if the bucket is currently
    /// empty. See `SPEC_FULL.md` §4.B operation 2.
    pub async fn front(&self, bucket: &str, mut cancel: CancelToken) -> ItemWatcher {
        let (tx, rx) = mpsc::channel(1);
        let prefix = keys::scheduled_prefix(bucket);

        match self.store.scan_prefix(&prefix).await {
            Ok(rows) if !rows.is_empty() => {
                let (_, value) = &rows[0];
                let _ = tx.send(parse_item_or_error(value)).await;
                return rx;
            }
            Ok(_) => {}
            Err(err) => {
                let _ = tx.send(Item::error_only(err.to_string())).await;
                return rx;
            }
        }

        let mut watch_rx = match self.store.watch(WatchTarget::Prefix(prefix.clone())).await {
            Ok(rx) => rx,
            Err(err) => {
                let _ = tx.send(Item::error_only(err.to_string())).await;
                return rx;
            }
        };

        let mut root_cancel = self.root.child();
        tokio::spawn(async move {
            tokio::select! {
                event = watch_rx.recv() => {
                    let item = match event {
                        Some(WatchEvent::Put { value, .. }) => parse_item_or_error(&value),
                        Some(WatchEvent::Delete { .. }) => {
                            Item::error_only(format!("{prefix:?} watch canceled/deleted"))
                        }
                        None => Item::error_only(format!("{prefix:?} watch channel closed")),
                    };
                    let _ = tx.send(item).await;
                }
                _ = cancel.canceled() => {
                    let _ = tx.send(Item::error_only("context canceled")).await;
                }
                _ = root_cancel.canceled() => {
                    let _ = tx.send(Item::error_only("engine stopped")).await;
                }
            }
        });
        rx
    }

    /// Deletes the scheduled key unconditionally. Idempotent: deleting an
    /// already-absent key succeeds as a no-op.
    ///
    /// Holds `write_lock`, matching `qu.mu.Lock()` in the original's
    /// `Dequeue` — without it, a concurrent `enqueue` can register its
    /// watch on this key after the delete has already happened, in the
    /// window between its `store.put` and `store.watch` calls, and never
    /// observe the deletion.
    pub async fn dequeue(&self, item: &Item) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&item.key).await?;
        Ok(())
    }

    /// Watches an already-enqueued key, assuming `Enqueue` already created
    /// it. See `SPEC_FULL.md` §4.B operation 4.
    pub async fn watch(&self, key: &str, mut cancel: CancelToken) -> ItemWatcher {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let watch_rx = match self.store.watch(WatchTarget::Key(key.to_string())).await {
            Ok(rx) => rx,
            Err(err) => {
                let _ = tx.send(Item::error_only(err.to_string())).await;
                return rx;
            }
        };
        let key = key.to_string();
        let mut root_cancel = self.root.child();
        tokio::spawn(async move {
            let mut watch_rx = watch_rx;
            loop {
                tokio::select! {
                    event = watch_rx.recv() => {
                        match event {
                            Some(WatchEvent::Put { value, .. }) => {
                                if tx.send(parse_item_or_error(&value)).await.is_err() {
                                    return;
                                }
                            }
                            Some(WatchEvent::Delete { .. }) => {
                                let _ = tx
                                    .send(Item::error_only(format!("watch: {key:?} canceled or deleted")))
                                    .await;
                                return;
                            }
                            None => return,
                        }
                    }
                    _ = cancel.canceled() => {
                        // ctx done: close the channel without a further snapshot.
                        return;
                    }
                    _ = root_cancel.canceled() => {
                        // engine stopped: close the channel without a further snapshot.
                        return;
                    }
                }
            }
        });
        rx
    }

    /// Returns the underlying store, for introspection (e.g. the CLI's
    /// health output) — never for bypassing the engine's key layout.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The data directory backing this engine's store, for introspection
    /// use (e.g. the CLI's health output).
    pub fn data_dir(&self) -> &std::path::Path {
        self.store.data_dir()
    }
}

fn parse_item_or_error(value: &[u8]) -> Item {
    match serde_json::from_slice::<Item>(value) {
        Ok(item) => item,
        Err(err) => Item::error_only(format!("malformed stored value: {err}")),
    }
}

async fn forward_enqueue_watch(
    mut cur: Item,
    mut watch_rx: queue_store::WatchReceiver,
    tx: mpsc::Sender<Item>,
    mut cancel: CancelToken,
    mut root_cancel: CancelToken,
) {
    loop {
        tokio::select! {
            event = watch_rx.recv() => {
                match event {
                    Some(WatchEvent::Put { value, .. }) => {
                        match serde_json::from_slice::<Item>(&value) {
                            Ok(item) => cur = item,
                            Err(err) => {
                                cur.error = format!("enqueue-watcher: cannot parse {value:?}: {err}");
                                let _ = tx.send(cur).await;
                                return;
                            }
                        }
                        let terminal = !cur.error.is_empty() || cur.progress >= MAX_PROGRESS;
                        if tx.send(cur.clone()).await.is_err() {
                            return;
                        }
                        if terminal {
                            if !cur.error.is_empty() {
                                warn!(key = %cur.key, error = %cur.error, "enqueue-watcher: item reported an error");
                            } else {
                                info!(key = %cur.key, "enqueue-watcher: item finished");
                            }
                            return;
                        }
                        debug!(key = %cur.key, "enqueue-watcher: item updated");
                    }
                    Some(WatchEvent::Delete { prev_value, .. }) => {
                        let mut prev = match prev_value {
                            Some(value) => match serde_json::from_slice::<Item>(&value) {
                                Ok(item) => item,
                                Err(err) => {
                                    cur.error = format!("enqueue-watcher: cannot parse deleted value: {err}");
                                    let _ = tx.send(cur).await;
                                    return;
                                }
                            },
                            None => cur.clone(),
                        };
                        if prev.progress < MAX_PROGRESS {
                            prev.canceled = true;
                            info!(key = %prev.key, progress = prev.progress, "enqueue-watcher: item canceled");
                        }
                        let _ = tx.send(prev).await;
                        return;
                    }
                    None => {
                        cur.error = "enqueue-watcher: watch channel closed".to_string();
                        let _ = tx.send(cur).await;
                        return;
                    }
                }
            }
            _ = cancel.canceled() => {
                cur.error = "context canceled".to_string();
                let _ = tx.send(cur).await;
                return;
            }
            _ = root_cancel.canceled() => {
                cur.error = "engine stopped".to_string();
                let _ = tx.send(cur).await;
                return;
            }
        }
    }
}
