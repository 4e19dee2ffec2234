/// Failure modes surfaced by the embedded store.
///
/// Mirrors the layering in `derive::registers::Error`: one variant per
/// external failure domain, wrapped with `#[from]` so call sites can use
/// `?` without manual mapping.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("store is closed")]
    Closed,
}
