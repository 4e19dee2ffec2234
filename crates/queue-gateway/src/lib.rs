//! The gateway request cache and HTTP stream handler: per-request
//! lifecycle, the watch fan-out that projects KV events back to HTTP
//! long-polling clients, and the periodic reaper. See `SPEC_FULL.md` §4.C,
//! §4.D, §4.E.

mod app;
mod cache;
mod error;
mod fingerprint;
mod handlers;
mod worker;

pub use app::{App, GatewayConfig};
pub use cache::{run_reaper, RequestCache};
pub use error::GatewayError;
pub use handlers::router;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use queue_engine::{Engine, Item};
    use queue_store::Store;
    use tower::ServiceExt;

    async fn test_router() -> (tempfile::TempDir, axum::Router) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).await.expect("open store");
        let app = App::new(Engine::new(store), GatewayConfig::default());
        (dir, router(app))
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (_dir, router) = test_router().await;
        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_without_cached_request_reports_not_found() {
        let (_dir, router) = test_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/widgets-request")
                    .header("request-id", "does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let item: Item = serde_json::from_slice(&body).unwrap();
        assert_eq!(item.error, "cannot find request id");
    }

    #[tokio::test]
    async fn other_verbs_on_job_route_return_405() {
        let (_dir, router) = test_router().await;
        let response = router
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/widgets-request")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    // S6 — Cache idempotence: identical POST create bodies from the same
    // caller return the same RequestID/Key and only enqueue once.
    #[tokio::test]
    async fn s6_cache_idempotence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path()).await.expect("open store");
        let app = App::new(Engine::new(store), GatewayConfig::default());
        let router = router(app.clone());

        let make_request = || {
            Request::builder()
                .method("POST")
                .uri("/widgets-request")
                .header("content-type", "application/json")
                .header("x-request-user", "user-1")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "data_from_frontend": "same-payload",
                        "create_request": true,
                    }))
                    .unwrap(),
                ))
                .unwrap()
        };

        let first = router.clone().oneshot(make_request()).await.unwrap();
        let first_body = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();
        let first_item: Item = serde_json::from_slice(&first_body).unwrap();

        let second = router.clone().oneshot(make_request()).await.unwrap();
        let second_body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let second_item: Item = serde_json::from_slice(&second_body).unwrap();

        assert_eq!(first_item.request_id, second_item.request_id);
        assert_eq!(first_item.key, second_item.key);

        // Only one scheduled key exists in the store for this bucket.
        let rows = app
            .queue
            .store()
            .scan_prefix("scheduled/widgets/")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // A cancel is idempotent: delete twice succeeds both times.
        let cancel_once = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/widgets-request")
                    .header("content-type", "application/json")
                    .header("x-request-user", "user-1")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "data_from_frontend": "same-payload",
                            "create_request": true,
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cancel_once.status(), StatusCode::OK);
    }
}
