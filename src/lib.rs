//! `shard-map`: a consistent, self-repairing view of a partitioned append-only stream's current
//! shard topology, answering "which shard owns this hash key, right now?" on the hot path.
//!
//! The topology is mutable at runtime — shards split and merge, and the metadata source may
//! transiently report both a parent and its children as open during a reshard — while lookups
//! must stay lock-light and non-blocking. [`ShardMap`] is the component that reconciles that
//! churn into a disjoint cover of the hash-key space (see [`reconciler`]) and serves point
//! queries against it (see [`index`]) while a background refresh loop (see [`refresh`]) keeps the
//! view current.
//!
//! ```text
//!              parent P1 [0,5]         parent P2 [6,10]
//!                 /    \                   /    \
//!          child C1[0,2] C2[3,5]   child C3[6,8] C4[9,10]
//! ```
//!
//! If the metadata source ever reports a re-merged "grandchild" shard spanning `[3,8]` — crossing
//! the original P1/P2 boundary — the reconciler still emits only `C1, C2, C3, C4`: the grandchild
//! is trimmed away, never allowed to re-aggregate records that belong to two different original
//! parents. See [`reconciler::build_cover`] for the algorithm.

pub mod backoff;
pub mod cache;
pub mod executor;
pub mod hash_key;
pub mod index;
pub mod janitor;
pub mod metrics;
pub mod reconciler;
pub mod refresh;
pub mod shard;
pub mod shard_id;
pub mod topology;

pub use executor::{Executor, ScheduledTask, TokioExecutor};
pub use hash_key::{HashKey, HashKeyRange};
pub use metrics::{MetricsSink, NullMetricsSink};
#[cfg(feature = "metrics-prometheus")]
pub use metrics::PrometheusMetricsSink;
pub use shard::{SequenceNumberRange, Shard};
pub use shard_id::{ShardId, ShardIdParseError};
pub use topology::{Page, PageRequest, TopologyClient, TopologyError};

use crate::janitor::{JanitorHandle, JanitorView};
use crate::refresh::RefreshEngine;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration accepted by [`ShardMap::new`]. Constructed directly by the caller — this crate
/// does not parse environment variables or configuration files itself, mirroring how the rest of
/// the source library's own config loader feeds typed sub-configs to each subsystem via `serde`
/// rather than reading files at this layer. `ShardMapConfig` still derives `Serialize`/
/// `Deserialize` so an embedding application's own `config`/`toml`/`serde_json`-based loader can
/// populate it directly.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShardMapConfig {
    /// Name of the stream to track. Required.
    pub stream_name: String,
    /// ARN of the stream, if the metadata source distinguishes streams by ARN rather than name
    /// alone. Optional.
    pub stream_arn: Option<String>,
    /// Shards requested per topology page. Clamped to `[1, 1000]`; see [`Self::effective_page_size`].
    pub page_size: u32,
    /// Initial and post-success retry delay.
    pub min_backoff: Duration,
    /// Ceiling on the retry delay after repeated failures.
    pub max_backoff: Duration,
    /// Grace period a closed shard's descriptor remains in the cache after it drops out of the
    /// open set, so in-flight retry decisions can still classify it.
    pub closed_shard_ttl: Duration,
}

impl ShardMapConfig {
    /// `page_size` clamped to the `[1, 1000]` range the topology source accepts per page.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, 1000)
    }
}

impl Default for ShardMapConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            stream_arn: None,
            page_size: 1000,
            min_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            closed_shard_ttl: Duration::from_millis(60_000),
        }
    }
}

/// Errors raised by [`ShardMap::new`]. Nothing on the hot-path lookup/invalidate surface returns
/// a `Result` — see the crate's error-handling design in its module docs for why.
#[derive(Debug, thiserror::Error)]
pub enum ShardMapError {
    #[error("min_backoff ({min:?}) must not exceed max_backoff ({max:?})")]
    InvertedBackoffRange { min: Duration, max: Duration },
}

impl<T, X, M> JanitorView for RefreshEngine<T, X, M>
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    fn cache(&self) -> &cache::ShardCache {
        RefreshEngine::cache(self)
    }

    fn updated_at(&self) -> Option<Instant> {
        RefreshEngine::updated_at(self)
    }

    fn open_set(&self) -> HashSet<ShardId> {
        RefreshEngine::open_set(self)
    }
}

/// The routing core described at the crate level: a consistent, self-repairing, lock-light view
/// of a stream's shard topology.
///
/// `T` is the [`TopologyClient`] collaborator used to discover shards, `X` the [`Executor`] used
/// to schedule retries, and `M` the [`MetricsSink`] observing refresh activity. Construction
/// immediately triggers the first refresh and spawns the janitor task; both run for the lifetime
/// of the returned `ShardMap` and are torn down on drop.
pub struct ShardMap<T, X, M> {
    engine: RefreshEngine<T, X, M>,
    _janitor: JanitorHandle,
}

impl<T, X, M> ShardMap<T, X, M>
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    pub fn new(
        config: ShardMapConfig,
        topology: T,
        executor: X,
        metrics: M,
    ) -> Result<Self, ShardMapError> {
        if config.min_backoff > config.max_backoff {
            return Err(ShardMapError::InvertedBackoffRange {
                min: config.min_backoff,
                max: config.max_backoff,
            });
        }
        let closed_shard_ttl = config.closed_shard_ttl;

        let engine = RefreshEngine::new(config, topology, executor, metrics);
        engine.trigger();

        let janitor_view: Arc<dyn JanitorView> = Arc::new(engine.clone());
        let janitor = janitor::spawn(janitor_view, closed_shard_ttl);

        Ok(Self {
            engine,
            _janitor: janitor,
        })
    }

    /// Look up the shard owning `hash_key`. Returns `None` if the map has not completed its first
    /// refresh, if the lookup index is momentarily being swapped, or if `hash_key` falls outside
    /// every known range.
    pub fn shard_id(&self, hash_key: HashKey) -> Option<ShardId> {
        self.engine.shard_id(hash_key)
    }

    /// Return the full descriptor for `shard_id`, if still present in the cache. May take a short
    /// read lock; intended for the retry path, not the hot lookup path.
    pub fn get_shard(&self, shard_id: ShardId) -> Option<Shard> {
        self.engine.get_shard(shard_id)
    }

    /// Signal that a record predicted (at `seen_at`) to land on `predicted_shard` did not. A
    /// refresh is scheduled only if the observation postdates the current view, the map is
    /// `Ready`, and `predicted_shard` (if any) is still in the current open set.
    pub fn invalidate(&self, seen_at: Instant, predicted_shard: Option<ShardId>) {
        self.engine.invalidate(seen_at, predicted_shard)
    }
}
