//! Background task that periodically sweeps the shard cache of entries for shards which have
//! fallen out of the open set.
//!
//! Shaped after `dekaf::task_manager::TaskManager`'s periodic-refresh task: a `tokio::spawn`'d
//! loop woken by `tokio::time::interval`, wrapped in a handle whose `Drop` aborts it, so a
//! `ShardMap` leaves no background work running once dropped.

use crate::cache::ShardCache;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared state the janitor consults each wake: the cache to sweep, and enough of the refresh
/// engine's bookkeeping (last successful update time, current open set) to decide whether a sweep
/// is due.
pub trait JanitorView: Send + Sync + 'static {
    fn cache(&self) -> &ShardCache;
    fn updated_at(&self) -> Option<Instant>;
    fn open_set(&self) -> HashSet<crate::shard_id::ShardId>;
}

/// Owns the spawned sweep task; aborts it on drop.
pub struct JanitorHandle {
    handle: JoinHandle<()>,
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn the janitor loop. Wakes every `closed_shard_ttl / 2`; on each wake, sweeps the cache if
/// the view has been `Ready` for at least `closed_shard_ttl` since the last refresh and the cache
/// is flagged as needing cleanup.
pub fn spawn(view: Arc<dyn JanitorView>, closed_shard_ttl: Duration) -> JanitorHandle {
    let period = closed_shard_ttl / 2;
    let handle = tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&*view, closed_shard_ttl);
        }
    });
    JanitorHandle { handle }
}

fn sweep_once(view: &dyn JanitorView, closed_shard_ttl: Duration) {
    let Some(updated_at) = view.updated_at() else {
        return;
    };
    if updated_at.elapsed() < closed_shard_ttl {
        return;
    }
    if !view.cache().needs_cleanup() {
        return;
    }
    let open_set = view.open_set();
    tracing::debug!(open_shards = open_set.len(), "janitor sweeping shard cache");
    view.cache().evict_closed(&open_set);
}

/// Test-only view backed by plain fields behind a mutex, so sweep timing can be driven
/// deterministically with `tokio::time::pause()`/`advance()` rather than wall-clock sleeps.
#[cfg(test)]
pub struct TestView {
    pub cache: ShardCache,
    state: Mutex<(Option<Instant>, HashSet<crate::shard_id::ShardId>)>,
}

#[cfg(test)]
impl TestView {
    pub fn new() -> Self {
        Self {
            cache: ShardCache::new(),
            state: Mutex::new((None, HashSet::new())),
        }
    }

    pub fn set_ready(&self, updated_at: Instant, open_set: HashSet<crate::shard_id::ShardId>) {
        *self.state.lock().unwrap() = (Some(updated_at), open_set);
    }
}

#[cfg(test)]
impl JanitorView for TestView {
    fn cache(&self) -> &ShardCache {
        &self.cache
    }

    fn updated_at(&self) -> Option<Instant> {
        self.state.lock().unwrap().0
    }

    fn open_set(&self) -> HashSet<crate::shard_id::ShardId> {
        self.state.lock().unwrap().1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_key::HashKeyRange;
    use crate::shard::{SequenceNumberRange, Shard};
    use crate::shard_id::ShardId;

    fn shard(id: u64) -> Shard {
        Shard {
            shard_id: ShardId(id),
            hash_key_range: HashKeyRange::new(0, 1),
            sequence_number_range: SequenceNumberRange {
                starting: 0,
                ending: None,
            },
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_once_ttl_has_elapsed_since_the_last_refresh() {
        let view = Arc::new(TestView::new());
        view.cache.populate([shard(1), shard(2)]);
        view.set_ready(Instant::now(), HashSet::from([ShardId(2)]));

        let ttl = Duration::from_secs(60);
        let _handle = spawn(view.clone(), ttl);

        tokio::time::advance(ttl + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(view.cache.get(ShardId(1)), None);
        assert!(view.cache.get(ShardId(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_sweep_before_the_ttl_has_elapsed() {
        let view = Arc::new(TestView::new());
        view.cache.populate([shard(1)]);
        view.set_ready(Instant::now(), HashSet::new());

        let ttl = Duration::from_secs(60);
        let _handle = spawn(view.clone(), ttl);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        assert!(view.cache.get(ShardId(1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn does_nothing_while_never_ready() {
        let view = Arc::new(TestView::new());
        view.cache.populate([shard(1)]);

        let ttl = Duration::from_secs(60);
        let _handle = spawn(view.clone(), ttl);

        tokio::time::advance(Duration::from_secs(1000)).await;
        tokio::task::yield_now().await;

        assert!(view.cache.get(ShardId(1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_loop() {
        let view = Arc::new(TestView::new());
        view.cache.populate([shard(1)]);
        view.set_ready(Instant::now(), HashSet::new());

        let ttl = Duration::from_secs(60);
        let handle = spawn(view.clone(), ttl);
        drop(handle);

        tokio::time::advance(ttl * 10).await;
        tokio::task::yield_now().await;

        // No panics, no further sweeps attributable to the aborted task: the cache state is
        // whatever it was, since nothing should have run after abort. We can't observe "the loop
        // is dead" directly, only that no errors surface.
        let _ = view.cache.get(ShardId(1));
    }
}
