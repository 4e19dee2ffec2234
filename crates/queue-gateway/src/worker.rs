use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use queue_engine::Item;

use crate::app::App;
use crate::error::GatewayError;
use crate::handlers::bucket_from_segment;

/// `GET /<bucket>-request/queue`: blocks until the bucket's front item
/// exists, per `SPEC_FULL.md` §4.E.
pub(crate) async fn front(
    State(app): State<Arc<App>>,
    Path(segment): Path<String>,
) -> Result<Json<Item>, GatewayError> {
    let bucket = bucket_from_segment(&segment)?;
    let mut watcher = app.queue.front(bucket, queue_engine::never()).await;
    let item = watcher
        .recv()
        .await
        .unwrap_or_else(|| Item::error_only("front: watch channel closed"));
    Ok(Json(item))
}

/// `POST /<bucket>-request/queue`: a worker reports progress on an item it
/// is processing, per `SPEC_FULL.md` §4.E. This resolves the open question
/// of how worker progress reaches finalization as Variant A (see
/// `DESIGN.md`): the posted item is re-enqueued with the gateway's
/// configured TTL, and the engine's own `progress == MaxProgress`
/// detection in `enqueue` drives finalization — there is no separate
/// direct-cache-update path.
pub(crate) async fn progress(
    State(app): State<Arc<App>>,
    Path(segment): Path<String>,
    Json(body): Json<Item>,
) -> Result<Json<Item>, GatewayError> {
    bucket_from_segment(&segment)?;

    if body.bucket.is_empty() || body.key.is_empty() || body.value.is_empty() || body.request_id.is_empty() {
        return Ok(Json(Item::error_only(
            "progress update missing one of bucket, key, value, request_id",
        )));
    }

    if !app.cache.contains(&body.request_id) {
        return Ok(Json(Item::error_only(format!(
            "unknown request id {:?}",
            body.request_id
        ))));
    }

    let mut watcher = app
        .queue
        .enqueue(body.clone(), app.config.enqueue_options(), queue_engine::never())
        .await;

    // The worker's own write drives finalization; it does not need to wait
    // on the full watcher lifecycle, only confirm the write was accepted.
    // A prior `create`-spawned watcher (if still running) observes the
    // same terminal event independently and updates the cache itself.
    let accepted = watcher
        .recv()
        .await
        .unwrap_or_else(|| Item::error_only("progress: watch channel closed before first event"));

    if accepted.error.is_empty() {
        app.cache.store(&body.request_id, accepted.clone());
    }

    Ok(Json(accepted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::GatewayConfig;
    use queue_engine::{Engine, MAX_PROGRESS};
    use queue_store::Store;

    async fn test_app() -> (tempfile::TempDir, Arc<App>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).await.expect("open store");
        let app = App::new(Engine::new(store), GatewayConfig::default());
        (dir, app)
    }

    #[tokio::test]
    async fn progress_rejects_unknown_request_id() {
        let (_dir, app) = test_app().await;
        let mut item = Item::create("bucket", 10, "value");
        item.request_id = "not-cached".to_string();

        let result = progress(
            State(app),
            Path("bucket-request".to_string()),
            Json(item),
        )
        .await
        .unwrap();
        assert!(!result.0.error.is_empty());
    }

    #[tokio::test]
    async fn progress_rejects_missing_fields() {
        let (_dir, app) = test_app().await;
        let item = Item {
            bucket: String::new(),
            ..Item::create("bucket", 10, "value")
        };

        let result = progress(
            State(app),
            Path("bucket-request".to_string()),
            Json(item),
        )
        .await
        .unwrap();
        assert!(result.0.error.contains("missing"));
    }

    #[tokio::test]
    async fn progress_finalizes_known_request() {
        let (_dir, app) = test_app().await;
        let mut item = Item::create("bucket", 10, "value");
        item.request_id = "req-1".to_string();
        app.cache.store(&item.request_id, item.clone());

        let mut done = item.clone();
        done.progress = MAX_PROGRESS;
        done.value = "result".to_string();

        let result = progress(
            State(app.clone()),
            Path("bucket-request".to_string()),
            Json(done),
        )
        .await
        .unwrap();
        assert_eq!(result.0.progress, MAX_PROGRESS);
        assert_eq!(app.cache.load("req-1").unwrap().progress, MAX_PROGRESS);
    }
}
