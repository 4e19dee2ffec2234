//! The job-queue engine: key layout, priority encoding, leased enqueue,
//! and the watch-driven state machine described in `SPEC_FULL.md` §4.B.

mod cancel;
mod engine;
mod error;
mod item;
mod keys;
mod options;

pub use cancel::{never, with_timeout, CancelHandle, CancelToken};
pub use engine::{Engine, ItemWatcher};
pub use error::EngineError;
pub use item::{Item, MAX_PROGRESS, MAX_WEIGHT};
pub use keys::{completed_key_for, scheduled_key, scheduled_prefix};
pub use options::{EnqueueOptions, MIN_TTL};

pub use queue_store::{Store, StoreError};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel;
    use std::time::Duration;

    async fn open_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).await.expect("open store");
        (dir, Engine::new(store))
    }

    // S1 — Priority ordering.
    #[tokio::test]
    async fn s1_priority_ordering() {
        let (_dir, engine) = open_engine().await;
        let bucket = "test-bucket";

        let item1 = Item::create(bucket, 1000, "test-data-1");
        let item2 = Item::create(bucket, 9000, "test-data-2");

        let mut watcher1 = engine
            .enqueue(item1.clone(), EnqueueOptions::new(), cancel::never())
            .await;
        let mut watcher2 = engine
            .enqueue(item2.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        let front = engine.front(bucket, cancel::never()).await.recv().await.unwrap();
        assert_eq!(front.key, item2.key);

        let mut completed = item2.clone();
        completed.progress = MAX_PROGRESS;
        completed.value = "new-data".to_string();
        let mut finisher = engine
            .enqueue(completed, EnqueueOptions::new(), cancel::never())
            .await;
        let terminal = finisher.recv().await.unwrap();
        assert_eq!(terminal.progress, MAX_PROGRESS);
        assert!(finisher.recv().await.is_none());

        // The original watcher for item2 also observes the terminal event.
        let seen = watcher2.recv().await.unwrap();
        assert_eq!(seen.progress, MAX_PROGRESS);

        let front_after = engine.front(bucket, cancel::never()).await.recv().await.unwrap();
        assert_eq!(front_after.key, item1.key);

        drop(watcher1);
    }

    // S2 — Completion fan-out: two independent watchers, one archived read.
    #[tokio::test]
    async fn s2_completion_fan_out() {
        let (_dir, engine) = open_engine().await;
        let bucket = "test-bucket";
        let item = Item::create(bucket, 9000, "test-data-2");

        let mut watcher_a = engine
            .enqueue(item.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        let mut completed = item.clone();
        completed.progress = MAX_PROGRESS;
        completed.value = "new-data".to_string();
        let mut watcher_b = engine
            .enqueue(completed.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        let seen_a = watcher_a.recv().await.unwrap();
        let seen_b = watcher_b.recv().await.unwrap();
        assert_eq!(seen_a.progress, MAX_PROGRESS);
        assert_eq!(seen_b.progress, MAX_PROGRESS);
        assert!(watcher_a.recv().await.is_none());
        assert!(watcher_b.recv().await.is_none());

        let archived = engine
            .store()
            .get(&completed_key_for(&item.key))
            .await
            .unwrap()
            .expect("archive key must exist");
        let archived: Item = serde_json::from_slice(&archived).unwrap();
        assert_eq!(archived.value, "new-data");

        assert!(engine.store().get(&item.key).await.unwrap().is_none());
    }

    // S3 — Cancel in flight.
    #[tokio::test]
    async fn s3_cancel_in_flight() {
        let (_dir, engine) = open_engine().await;
        let item = Item::create("test-bucket", 1000, "test-data");

        let mut watcher = engine
            .enqueue(item.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        engine.dequeue(&item).await.unwrap();

        let seen = watcher.recv().await.unwrap();
        assert!(seen.canceled);
        assert_eq!(seen.error, "");
        assert!(watcher.recv().await.is_none());
    }

    // S4 — Watch after enqueue.
    #[tokio::test]
    async fn s4_watch_after_enqueue() {
        let (_dir, engine) = open_engine().await;
        let item = Item::create("test-bucket", 5000, "test-data");

        let _enqueue_watcher = engine
            .enqueue(item.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        let (handle, token) = CancelHandle::new();
        let mut watch = engine.watch(&item.key, token).await;

        let mut updated = item.clone();
        updated.progress = 50;
        updated.value = "new-data".to_string();
        let _ = engine
            .enqueue(updated.clone(), EnqueueOptions::new(), cancel::never())
            .await;

        let seen = watch.recv().await.unwrap();
        assert_eq!(seen.progress, 50);
        assert_eq!(seen.value, "new-data");

        handle.cancel();
        assert!(watch.recv().await.is_none());
    }

    // S5 — TTL expiry.
    #[tokio::test]
    async fn s5_ttl_expiry() {
        let (_dir, engine) = open_engine().await;
        let bucket = "test-bucket";
        let item = Item::create(bucket, 1000, "test-data");

        let mut watcher = engine
            .enqueue(
                item.clone(),
                EnqueueOptions::new().with_ttl(Duration::from_millis(300)),
                cancel::never(),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(700)).await;

        let front_token = cancel::with_timeout(Duration::from_millis(200));
        let mut front = engine.front(bucket, front_token).await;
        let front_result = tokio::time::timeout(Duration::from_secs(2), front.recv())
            .await
            .expect("front should resolve within timeout");
        if let Some(item) = front_result {
            assert!(!item.error.is_empty(), "bucket should be empty after TTL expiry");
        }

        let terminal = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("watcher should close within timeout")
            .unwrap();
        assert!(terminal.canceled);
    }

    // S6 — Cache idempotence is exercised at the gateway layer
    // (crates/queue-gateway); the engine-level guarantee it depends on —
    // that re-enqueuing the same key overwrites rather than duplicates —
    // is covered by s1_priority_ordering and s4_watch_after_enqueue above.

    // Stop tears down in-flight watchers and closes the underlying store.
    #[tokio::test]
    async fn stop_closes_in_flight_watchers_and_store() {
        let (_dir, engine) = open_engine().await;
        let item = Item::create("test-bucket", 1000, "test-data");

        let (_handle, token) = CancelHandle::new();
        let mut watcher = engine
            .enqueue(item.clone(), EnqueueOptions::new(), token)
            .await;

        engine.stop().await;

        let terminal = watcher.recv().await.unwrap();
        assert_eq!(terminal.error, "engine stopped");

        let err = engine.store().get(&item.key).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }
}
