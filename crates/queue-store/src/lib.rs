//! A single-node, embedded, consistent key-value store: the storage
//! collaborator the job-queue engine is built on.
//!
//! See `SPEC_FULL.md` §4.A for the design rationale.

mod error;
mod lease;
mod store;

pub use error::StoreError;
pub use lease::LeaseId;
pub use store::{Revision, Store, WatchEvent, WatchReceiver, WatchTarget};
