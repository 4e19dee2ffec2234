/// Failure modes surfaced by the gateway's HTTP-facing layer.
///
/// Per `SPEC_FULL.md` §7, almost none of these ever become a non-200 HTTP
/// response: callers see them inside an [`queue_engine::Item`]'s `error`
/// field. This type exists for the handful of cases that really are
/// routing/transport failures (a malformed bucket segment, a body that
/// doesn't parse as JSON at all) where a non-200 status is appropriate.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("path segment {0:?} does not end in \"-request\"")]
    BadBucketSegment(String),
    #[error(transparent)]
    Engine(#[from] queue_engine::EngineError),
    #[error(transparent)]
    Store(#[from] queue_store::StoreError),
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(error = %self, "queue-gateway: request rejected");
        (axum::http::StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
