//! The metrics collaborator: a small trait recording refresh activity, with a no-op default and
//! an optional `prometheus`-backed implementation.
//!
//! The trait seam mirrors `gazette::journal::list::Fold`/`Subscriber` (a small trait with a
//! crate-provided default implementation); the `prometheus` usage itself follows `dekaf`'s
//! metrics endpoint, registering against a private `Registry` rather than the process-global
//! default so multiple `ShardMap`s in one process don't collide.

/// Records observability events from the refresh engine. All methods take `&self` — sinks are
/// expected to use interior mutability (atomics, or a lock-free counter type) since they're
/// invoked from both the refresh-driving task and, for `shard_count`, after every successful
/// reconciliation.
pub trait MetricsSink: Send + Sync + 'static {
    fn refresh_attempted(&self) {}
    fn refresh_succeeded(&self) {}
    fn refresh_failed(&self) {}
    fn shard_count(&self, _count: usize) {}
}

/// The default `MetricsSink`: observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {}

#[cfg(feature = "metrics-prometheus")]
pub mod prometheus_sink {
    use super::MetricsSink;
    use prometheus::{IntCounter, IntGauge, Registry};

    /// A `MetricsSink` backed by `prometheus` counters/gauge, registered against a private
    /// `Registry` owned by this sink rather than the crate-global default registry.
    pub struct PrometheusMetricsSink {
        registry: Registry,
        refresh_attempted: IntCounter,
        refresh_succeeded: IntCounter,
        refresh_failed: IntCounter,
        shard_count: IntGauge,
    }

    impl PrometheusMetricsSink {
        pub fn new() -> Result<Self, prometheus::Error> {
            let registry = Registry::new();

            let refresh_attempted =
                IntCounter::new("shard_map_refresh_attempted_total", "Refreshes attempted")?;
            let refresh_succeeded =
                IntCounter::new("shard_map_refresh_succeeded_total", "Refreshes succeeded")?;
            let refresh_failed =
                IntCounter::new("shard_map_refresh_failed_total", "Refreshes failed")?;
            let shard_count = IntGauge::new("shard_map_shard_count", "Shards in the open set")?;

            registry.register(Box::new(refresh_attempted.clone()))?;
            registry.register(Box::new(refresh_succeeded.clone()))?;
            registry.register(Box::new(refresh_failed.clone()))?;
            registry.register(Box::new(shard_count.clone()))?;

            Ok(Self {
                registry,
                refresh_attempted,
                refresh_succeeded,
                refresh_failed,
                shard_count,
            })
        }

        /// The private registry backing this sink, for an embedder to merge into its own exposed
        /// metrics endpoint.
        pub fn registry(&self) -> &Registry {
            &self.registry
        }
    }

    impl MetricsSink for PrometheusMetricsSink {
        fn refresh_attempted(&self) {
            self.refresh_attempted.inc();
        }

        fn refresh_succeeded(&self) {
            self.refresh_succeeded.inc();
        }

        fn refresh_failed(&self) {
            self.refresh_failed.inc();
        }

        fn shard_count(&self, count: usize) {
            self.shard_count.set(count as i64);
        }
    }
}

#[cfg(feature = "metrics-prometheus")]
pub use prometheus_sink::PrometheusMetricsSink;
