#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] queue_store::StoreError),
    #[error("failed to serialize item: {0}")]
    Serialize(#[from] serde_json::Error),
}
