use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use queue_engine::{CancelHandle, Item, MAX_PROGRESS};

use crate::app::App;
use crate::error::GatewayError;
use crate::fingerprint;

/// Header a polling `GET` uses to name which outstanding request it wants
/// the status of, per `SPEC_FULL.md` §6.
const REQUEST_ID_HEADER: &str = "request-id";

/// Caller-supplied identity used in the RequestID fingerprint. User-ID
/// derivation is an out-of-scope external collaborator per `spec.md` §1;
/// this core accepts its output as a plain header rather than deriving it
/// itself.
const USER_ID_HEADER: &str = "x-request-user";

/// Weight assigned to every gateway-created item, matching the literal
/// `100` passed to `etcdqueue.CreateItem` at every call site in
/// `original_source/backend/web/handler.go`.
const DEFAULT_WEIGHT: u32 = 100;

/// `create_request` from `spec.md` §6's documented body shape is accepted
/// but ignored: `create` always creates and enqueues unconditionally,
/// matching every variant of `original_source/backend/web/handler.go`,
/// none of which gate creation on a field like this. `serde_json` ignores
/// unrecognized fields by default, so callers that still send it see no
/// change in behavior.
#[derive(Debug, serde::Deserialize)]
pub struct CreateRequest {
    pub data_from_frontend: String,
}

/// Builds the gateway's HTTP surface, per `SPEC_FULL.md` §6. `:bucket_request`
/// is the literal `<bucket>-request` path segment; [`bucket_from_segment`]
/// strips the suffix back off. The spec's §4.D names three logical verbs
/// per job route (create / status / cancel) but its §6 interface table
/// only tabulates `POST`/`GET`; `cancel` is exposed here as `DELETE` on the
/// same route, the natural third HTTP verb for "remove this request".
/// Axum's router already answers unmatched methods on a matched path with
/// `405 Method Not Allowed`, satisfying the "all other verbs return 405"
/// requirement without a custom fallback.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/:bucket_request",
            post(create).get(status).delete(cancel),
        )
        .route(
            "/:bucket_request/queue",
            get(crate::worker::front).post(crate::worker::progress),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Recovers the bucket name from a `<bucket>-request` path segment.
pub(crate) fn bucket_from_segment(segment: &str) -> Result<&str, GatewayError> {
    segment
        .strip_suffix("-request")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| GatewayError::BadBucketSegment(segment.to_string()))
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

/// `POST /<bucket>-request`: see `SPEC_FULL.md` §4.D.
async fn create(
    State(app): State<Arc<App>>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateRequest>,
) -> Result<Json<Item>, GatewayError> {
    let bucket = bucket_from_segment(&segment)?;
    let req_path = format!("/{segment}");
    let user = user_id(&headers);
    let request_id = fingerprint::request_id(&req_path, &user, &body.data_from_frontend);

    if let Some(cached) = app.cache.load(&request_id) {
        return Ok(Json(cached));
    }

    let mut item = Item::create(bucket, DEFAULT_WEIGHT, body.data_from_frontend.clone());
    item.request_id = request_id.clone();

    let watcher = app
        .queue
        .enqueue(item.clone(), app.config.enqueue_options(), queue_engine::never())
        .await;

    let mut ack = item.clone();
    ack.value = format!("queued: {}", body.data_from_frontend);
    app.cache.store(&request_id, ack.clone());

    tokio::spawn(run_create_watcher(app, request_id, watcher));

    Ok(Json(ack))
}

/// The watcher task spawned by `create`: forwards snapshots from the
/// item-watcher into the cache until the stream closes or the cache entry
/// is removed out from under it (e.g. by a concurrent cancel), per
/// `SPEC_FULL.md` §4.D's watcher-goroutine-loop description.
async fn run_create_watcher(
    app: Arc<App>,
    request_id: String,
    mut watcher: queue_engine::ItemWatcher,
) {
    while let Some(item) = watcher.recv().await {
        if !app.cache.contains(&request_id) {
            tracing::debug!(request_id, "queue-gateway: cache entry removed, watcher exiting");
            return;
        }
        if item.canceled {
            tracing::info!(request_id, "queue-gateway: request canceled");
            app.cache.store(&request_id, item);
            return;
        }
        app.cache.store(&request_id, item);
    }
}

/// `GET /<bucket>-request` with a `Request-Id` header: see
/// `SPEC_FULL.md` §4.D.
async fn status(
    State(app): State<Arc<App>>,
    Path(segment): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Item>, GatewayError> {
    bucket_from_segment(&segment)?;

    let request_id = match headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) => id.to_string(),
        None => {
            return Ok(Json(Item::error_only("cannot find request id")));
        }
    };

    let Some(cached) = app.cache.load(&request_id) else {
        return Ok(Json(Item::error_only("cannot find request id")));
    };

    if cached.progress >= MAX_PROGRESS || cached.canceled || !cached.error.is_empty() {
        return Ok(Json(cached));
    }

    // Not yet terminal: open a per-request watch on the item's key and
    // block until progress reaches MaxProgress or the connection drops.
    let (_handle, cancel) = CancelHandle::new();
    let mut watch = app.queue.watch(&cached.key, cancel).await;
    let mut last = cached;
    while let Some(item) = watch.recv().await {
        last = item;
        app.cache.store(&request_id, last.clone());
        if last.is_terminal() {
            break;
        }
    }
    Ok(Json(last))
}

/// `DELETE /<bucket>-request`: cancel, per `SPEC_FULL.md` §4.D.
async fn cancel(
    State(app): State<Arc<App>>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateRequest>,
) -> Result<Json<Item>, GatewayError> {
    let bucket = bucket_from_segment(&segment)?;
    let req_path = format!("/{segment}");
    let user = user_id(&headers);
    let request_id = fingerprint::request_id(&req_path, &user, &body.data_from_frontend);

    let Some(cached) = app.cache.delete(&request_id) else {
        // Idempotent: no cached request means cancel is a no-op success.
        let mut ack = Item::create(bucket, DEFAULT_WEIGHT, "");
        ack.request_id = request_id;
        ack.canceled = true;
        return Ok(Json(ack));
    };

    if let Err(err) = app.queue.dequeue(&cached).await {
        let mut failed = cached;
        failed.error = err.to_string();
        return Ok(Json(failed));
    }

    let mut canceled = cached;
    canceled.canceled = true;
    Ok(Json(canceled))
}
