use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::keys;

/// Ceiling on [`Item::weight`]; higher weight always sorts before lower.
pub const MAX_WEIGHT: u32 = 99_999;

/// Sentinel progress value meaning "done".
pub const MAX_PROGRESS: u32 = 100;

/// A single transported job record. See `SPEC_FULL.md` §3 for field
/// invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub bucket: String,
    pub weight: u32,
    pub created_at: DateTime<Utc>,
    pub key: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub error: String,
}

impl Item {
    /// Mirrors `etcdqueue.CreateItem`: builds a fresh item with its
    /// scheduled key already computed from the clamped weight and the
    /// current time.
    pub fn create(bucket: impl Into<String>, weight: u32, value: impl Into<String>) -> Item {
        let bucket = bucket.into();
        let weight = weight.min(MAX_WEIGHT);
        let created_at = Utc::now();
        let key = keys::scheduled_key(&bucket, weight, created_at);
        Item {
            bucket,
            weight,
            created_at,
            key,
            request_id: String::new(),
            value: value.into(),
            progress: 0,
            canceled: false,
            error: String::new(),
        }
    }

    /// An item carrying only an error, used by watchers that must report a
    /// failure without a well-formed snapshot to attach it to (e.g. a
    /// watch-setup failure before any KV data exists).
    pub fn error_only(error: impl Into<String>) -> Item {
        Item {
            bucket: String::new(),
            weight: 0,
            created_at: Utc::now(),
            key: String::new(),
            request_id: String::new(),
            value: String::new(),
            progress: 0,
            canceled: false,
            error: error.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.progress >= MAX_PROGRESS || self.canceled || !self.error.is_empty()
    }

    /// The equality helper from `SPEC_FULL.md` §8: compares `created_at` at
    /// second precision, then every other field.
    pub fn equal_at_second_precision(&self, other: &Item) -> bool {
        self.created_at.trunc_subsecs(0) == other.created_at.trunc_subsecs(0)
            && self.bucket == other.bucket
            && self.key == other.key
            && self.value == other.value
            && self.progress == other.progress
            && self.canceled == other.canceled
            && self.error == other.error
            && self.request_id == other.request_id
    }
}
