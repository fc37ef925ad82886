//! The refresh engine: drives paginated topology discovery, owns the `Invalid`/`Updating`/`Ready`
//! state machine, and republishes the lookup index and shard cache on every successful
//! reconciliation.
//!
//! Grounded on `gazette::journal::list::{recv_snapshot, list_watch}`'s small explicit state
//! machine over arriving chunks, combined with `dekaf::task_manager::TaskManager`'s
//! periodic-refresh/retry shape; backoff scheduling delegates to `crate::backoff::Backoff`.

use crate::backoff::{Backoff, BackoffConfig};
use crate::cache::ShardCache;
use crate::executor::{Executor, ScheduledTask};
use crate::index::{LookupIndex, Snapshot};
use crate::metrics::MetricsSink;
use crate::reconciler::build_cover;
use crate::shard::Shard;
use crate::shard_id::ShardId;
use crate::topology::{Page, PageRequest, TopologyClient};
use crate::ShardMapConfig;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Invalid,
    Updating,
    Ready,
}

struct State {
    phase: Phase,
    updated_at: Option<Instant>,
    open_set: HashSet<ShardId>,
    staging: Vec<Shard>,
    backoff: Backoff,
    pending_retry: Option<Box<dyn ScheduledTask>>,
    /// Bumped on every `trigger`. A page response or scheduled retry that observes a stale
    /// generation has been superseded by a newer refresh and must not mutate state — this is the
    /// "no re-entrant refresh" invariant's actual enforcement, since `ScheduledTask::cancel` is
    /// best-effort against a callback already in flight.
    generation: u64,
}

struct Shared<T, X, M> {
    topology: T,
    executor: X,
    metrics: M,
    index: LookupIndex,
    cache: ShardCache,
    config: ShardMapConfig,
    state: Mutex<State>,
}

/// The scheduled-retry closure only ever holds a `Weak` reference back to `Shared` (see
/// `fail_and_schedule_retry`), so this runs once the last strong owner (the `ShardMap`/
/// `RefreshEngine`/janitor) is dropped — not only when a lingering retry closure happens to let
/// go. Cancelling here stops the executor's sleeping timer immediately rather than leaving it to
/// wake up and no-op once its `Weak::upgrade` fails.
impl<T, X, M> Drop for Shared<T, X, M> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(mut pending) = state.pending_retry.take() {
                pending.cancel();
            }
        }
    }
}

/// Owns the state machine described in the crate's top-level docs: construction leaves it
/// `Invalid`; `trigger()` (called once at construction, and again by `invalidate`) drives it
/// through `Updating` to `Ready`.
pub struct RefreshEngine<T, X, M> {
    shared: Arc<Shared<T, X, M>>,
}

impl<T, X, M> Clone for RefreshEngine<T, X, M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, X, M> RefreshEngine<T, X, M>
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    pub fn new(config: ShardMapConfig, topology: T, executor: X, metrics: M) -> Self {
        let backoff = Backoff::new(BackoffConfig {
            min_backoff: config.min_backoff,
            max_backoff: config.max_backoff,
        });
        let shared = Arc::new(Shared {
            topology,
            executor,
            metrics,
            index: LookupIndex::new(),
            cache: ShardCache::new(),
            config,
            state: Mutex::new(State {
                phase: Phase::Invalid,
                updated_at: None,
                open_set: HashSet::new(),
                staging: Vec::new(),
                backoff,
                pending_retry: None,
                generation: 0,
            }),
        });
        Self { shared }
    }

    pub fn index(&self) -> &LookupIndex {
        &self.shared.index
    }

    pub fn cache(&self) -> &ShardCache {
        &self.shared.cache
    }

    pub fn shard_id(&self, hash_key: u128) -> Option<ShardId> {
        self.shared.index.shard_id(hash_key)
    }

    pub fn get_shard(&self, shard_id: ShardId) -> Option<Shard> {
        self.shared.cache.get(shard_id)
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.shared.state.lock().unwrap().updated_at
    }

    pub fn open_set(&self) -> HashSet<ShardId> {
        self.shared.state.lock().unwrap().open_set.clone()
    }

    /// `update()` from §4.3: from `Invalid` or `Ready`, cancel any pending retry, clear staging,
    /// and issue the first page of a fresh listing. From `Updating`, a no-op.
    #[tracing::instrument(skip(self), fields(stream = %self.shared.config.stream_name))]
    pub fn trigger(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.phase == Phase::Updating {
            tracing::debug!("trigger ignored, a refresh is already in flight");
            return;
        }
        tracing::info!(from = ?state.phase, "starting shard topology refresh");
        state.phase = Phase::Updating;
        state.staging.clear();
        if let Some(mut pending) = state.pending_retry.take() {
            pending.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        drop(state);
        self.spawn_first_page(generation);
    }

    /// Schedules a refresh only if the mis-route was observed after the current view was built,
    /// the map is currently `Ready`, and the predicted shard (if any) is still in the open set.
    #[tracing::instrument(skip(self), fields(stream = %self.shared.config.stream_name, predicted_shard = ?predicted_shard))]
    pub fn invalidate(&self, seen_at: Instant, predicted_shard: Option<ShardId>) {
        let should_trigger = {
            let state = self.shared.state.lock().unwrap();
            match (state.phase, state.updated_at) {
                (Phase::Ready, Some(updated_at)) => {
                    seen_at > updated_at
                        && predicted_shard
                            .map(|id| state.open_set.contains(&id))
                            .unwrap_or(true)
                }
                _ => false,
            }
        };
        if should_trigger {
            self.trigger();
        }
    }

    fn spawn_first_page(&self, generation: u64) {
        let shared = self.shared.clone();
        tokio::task::spawn(async move {
            shared.metrics.refresh_attempted();
            let request = PageRequest::First {
                stream_name: shared.config.stream_name.clone(),
                stream_arn: shared.config.stream_arn.clone(),
                max_results: shared.config.effective_page_size(),
            };
            run_refresh(shared, generation, request).await;
        });
    }
}

#[tracing::instrument(skip(shared, request), fields(stream = %shared.config.stream_name, generation))]
async fn run_refresh<T, X, M>(shared: Arc<Shared<T, X, M>>, generation: u64, mut request: PageRequest)
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    loop {
        match shared.topology.list_shards(request).await {
            Ok(page) => {
                tracing::debug!(
                    page_shards = page.shards.len(),
                    is_last = page.is_last(),
                    "received a topology page"
                );
                match advance_with_page(&shared, generation, page) {
                    Some(next) => request = next,
                    None => return,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "topology request failed, scheduling a retry");
                fail_and_schedule_retry(&shared, generation);
                return;
            }
        }
    }
}

/// Applies one successful page to the staging buffer. Returns the next request to issue, or
/// `None` if the refresh is complete (or was superseded by a newer `trigger`).
fn advance_with_page<T, X, M>(
    shared: &Arc<Shared<T, X, M>>,
    generation: u64,
    page: Page,
) -> Option<PageRequest>
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    let is_last = page.is_last();
    let next_token = page.continuation_token.clone();

    let mut state = shared.state.lock().unwrap();
    if state.generation != generation {
        return None;
    }
    state.staging.extend(page.shards);

    if !is_last {
        let max_results = shared.config.effective_page_size();
        drop(state);
        return Some(PageRequest::Next {
            continuation_token: next_token.expect("non-last page always carries a continuation token"),
            max_results,
        });
    }

    let shards = std::mem::take(&mut state.staging);
    let open_set: HashSet<ShardId> = shards.iter().map(|s| s.shard_id).collect();
    state.open_set = open_set.clone();
    state.phase = Phase::Ready;
    state.updated_at = Some(Instant::now());
    state.backoff.reset();
    drop(state);

    let cover = build_cover(&shards);
    tracing::info!(
        open_shards = open_set.len(),
        cover_entries = cover.len(),
        "shard topology refresh complete, publishing new lookup index"
    );
    shared.index.publish(Snapshot::new(cover));
    shared.cache.populate(shards);
    shared.metrics.refresh_succeeded();
    shared.metrics.shard_count(open_set.len());
    None
}

fn fail_and_schedule_retry<T, X, M>(shared: &Arc<Shared<T, X, M>>, generation: u64)
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    let mut state = shared.state.lock().unwrap();
    if state.generation != generation {
        return;
    }
    state.phase = Phase::Invalid;
    let delay = state.backoff.next_delay();
    tracing::info!(delay_ms = delay.as_millis(), "refresh failed, scheduling backed-off retry");

    // Only a `Weak` reference is captured here: a strong `Arc` would keep `topology`/`executor`/
    // `metrics` alive (and eventually fire a real topology RPC) even after every other owner of
    // this `ShardMap` has been dropped, since the scheduled task itself would become the last
    // strong owner. `Weak::upgrade` fails once that happens, and the fired callback becomes a
    // no-op; `Shared`'s `Drop` impl also actively cancels the still-pending timer so it doesn't
    // even wait out the remaining delay.
    let retry_weak = Arc::downgrade(shared);
    let task = shared.executor.schedule(
        delay,
        Arc::new(move || {
            if let Some(shared) = retry_weak.upgrade() {
                retry(&shared, generation);
            }
        }),
    );
    state.pending_retry = Some(task);
    drop(state);
    shared.metrics.refresh_failed();
}

fn retry<T, X, M>(shared: &Arc<Shared<T, X, M>>, generation: u64)
where
    T: TopologyClient,
    X: Executor,
    M: MetricsSink,
{
    let mut state = shared.state.lock().unwrap();
    if state.generation != generation {
        return;
    }
    state.phase = Phase::Updating;
    state.pending_retry = None;
    // Mirrors `trigger()`'s own clear: a retry reissues the first page of a brand new listing,
    // so any shards staged by the aborted attempt (if it failed after page 1) must not survive
    // into the next refresh's cover/cache.
    state.staging.clear();
    drop(state);

    let shared = shared.clone();
    tokio::task::spawn(async move {
        shared.metrics.refresh_attempted();
        let request = PageRequest::First {
            stream_name: shared.config.stream_name.clone(),
            stream_arn: shared.config.stream_arn.clone(),
            max_results: shared.config.effective_page_size(),
        };
        run_refresh(shared, generation, request).await;
    });
}
