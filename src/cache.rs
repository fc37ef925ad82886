//! Secondary shard-id -> full descriptor cache, with TTL'd eviction for shards that have
//! dropped out of the open set.
//!
//! Guarded by its own `RwLock`, separate from the lookup index (`crate::index`), so that
//! `get_shard` reads and janitor sweeps never contend with the hot-path `shard_id` lookup. The
//! eviction loop itself mirrors `gazette::router::Router::sweep`'s `retain`-based pass over a
//! `Mutex<HashMap<_, _>>`, adapted from idle-connection sweeping to TTL'd descriptor sweeping.

use crate::shard::Shard;
use crate::shard_id::ShardId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
pub struct ShardCache {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    shards: HashMap<ShardId, Shard>,
    needs_cleanup: bool,
}

impl ShardCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached descriptor for `shard_id`, if present.
    pub fn get(&self, shard_id: ShardId) -> Option<Shard> {
        let guard = self
            .inner
            .read()
            .expect("shard cache lock poisoned by a panicking writer");
        guard.shards.get(&shard_id).cloned()
    }

    /// Insert every shard from a successful refresh (including those the reconciler omitted from
    /// the lookup index's cover) and flag the cache as due for a cleanup pass.
    pub fn populate(&self, shards: impl IntoIterator<Item = Shard>) {
        let mut guard = self
            .inner
            .write()
            .expect("shard cache lock poisoned by a panicking writer");
        for shard in shards {
            guard.shards.insert(shard.shard_id, shard);
        }
        guard.needs_cleanup = true;
    }

    /// True if a refresh has completed since the last cleanup pass.
    pub fn needs_cleanup(&self) -> bool {
        self.inner
            .read()
            .expect("shard cache lock poisoned by a panicking writer")
            .needs_cleanup
    }

    /// Remove every cached shard whose id is absent from `open_set` and clear the cleanup flag.
    /// Called by the janitor (`crate::janitor`) once `closed_shard_ttl` has elapsed since the
    /// refresh that last set the flag.
    pub fn evict_closed(&self, open_set: &HashSet<ShardId>) {
        let mut guard = self
            .inner
            .write()
            .expect("shard cache lock poisoned by a panicking writer");
        guard.shards.retain(|id, _| open_set.contains(id));
        guard.needs_cleanup = false;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("shard cache lock poisoned by a panicking writer")
            .shards
            .len()
    }
}
