use std::time::Duration;

/// The TTL floor below which a requested lease is ignored entirely, per
/// `SPEC_FULL.md` §4.B.
pub const MIN_TTL: Duration = Duration::from_secs(5);

/// Functional-options-style configuration for [`crate::Engine::enqueue`],
/// expressed as a plain Rust builder.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    ttl: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The lease duration to grant, or `None` if unset or below
    /// [`MIN_TTL`].
    pub(crate) fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| *ttl >= MIN_TTL)
    }
}
