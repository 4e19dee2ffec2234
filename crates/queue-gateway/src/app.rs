use std::sync::Arc;
use std::time::Duration;

use queue_engine::{Engine, EnqueueOptions};

use crate::cache::RequestCache;

/// The gateway's tunable knobs, per `SPEC_FULL.md` §6. Populated from
/// `cmd/queue-gatewayd`'s `clap::Parser` `Args`, never read directly from
/// the environment by library code.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default lease duration attached to newly scheduled keys.
    pub enqueue_ttl: Duration,
    /// Interval at which the request cache sweeps stale entries.
    pub reaper_period: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            enqueue_ttl: Duration::from_secs(30 * 60),
            reaper_period: Duration::from_secs(5 * 60),
        }
    }
}

impl GatewayConfig {
    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions::new().with_ttl(self.enqueue_ttl)
    }
}

/// The request-context carrier passed into every handler, per
/// `SPEC_FULL.md` §9: exactly the `{queue, cache, config}` slots (the
/// image-cache and user-ID slots named in `spec.md` §9 belong to
/// out-of-scope external collaborators per §1 and have no home here).
///
/// Grounded on `crates/agent/src/api/mod.rs`'s `struct App` +
/// `Arc<App>` state pattern, not a module-level singleton.
pub struct App {
    pub queue: Engine,
    pub cache: Arc<RequestCache>,
    pub config: GatewayConfig,
}

impl App {
    /// Builds the carrier and spawns its periodic reaper task (per
    /// `SPEC_FULL.md` §4.C), ticking every `config.reaper_period`.
    pub fn new(queue: Engine, config: GatewayConfig) -> Arc<App> {
        let cache = Arc::new(RequestCache::new());
        tokio::spawn(crate::cache::run_reaper(cache.clone(), config.reaper_period));
        Arc::new(App {
            queue,
            cache,
            config,
        })
    }
}
