//! End-to-end scenarios driving `ShardMap` through a fake topology source, the way a production
//! reshard or an outage would actually unfold. Each test stands in for one of the named scenarios
//! in the crate's design docs: steady state, mid-reshard parent preference, invalidation
//! suppressed by staleness, invalidation triggering a refresh, backoff escalation across repeated
//! failures, and cache-TTL eviction of closed shards.
//!
//! The mock collaborators here are hand-written and scripted, not macro-generated, matching the
//! style of the source library's own `tests/`.

use shard_map::{
    Executor, HashKeyRange, MetricsSink, Page, PageRequest, ScheduledTask, SequenceNumberRange,
    Shard, ShardId, ShardMap, ShardMapConfig, TopologyClient, TopologyError,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn shard(id: u64, start: u128, end: u128) -> Shard {
    Shard {
        shard_id: ShardId(id),
        hash_key_range: HashKeyRange::new(start, end),
        sequence_number_range: SequenceNumberRange {
            starting: 0,
            ending: None,
        },
        parent_shard_id: None,
        adjacent_parent_shard_id: None,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("scripted topology failure")]
struct ScriptedFailure;

enum Response {
    Page(Page),
    Fail,
}

/// A scripted `TopologyClient`: each call pops the next entry off a fixed response queue.
struct ScriptedTopology {
    script: Mutex<VecDeque<Response>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedTopology {
    fn new(script: Vec<Response>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl TopologyClient for ScriptedTopology {
    async fn list_shards(&self, request: PageRequest) -> Result<Page, TopologyError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Response::Page(page)) => Ok(page),
            Some(Response::Fail) | None => Err(TopologyError::new(ScriptedFailure)),
        }
    }
}

/// A no-op `MetricsSink` that also records every call, so tests can assert on refresh activity
/// without a real metrics backend.
#[derive(Default)]
struct RecordingMetrics {
    attempted: Mutex<usize>,
    succeeded: Mutex<usize>,
    failed: Mutex<usize>,
}

impl MetricsSink for RecordingMetrics {
    fn refresh_attempted(&self) {
        *self.attempted.lock().unwrap() += 1;
    }
    fn refresh_succeeded(&self) {
        *self.succeeded.lock().unwrap() += 1;
    }
    fn refresh_failed(&self) {
        *self.failed.lock().unwrap() += 1;
    }
}

struct NoopScheduledTask;
impl ScheduledTask for NoopScheduledTask {
    fn cancel(&mut self) {}
    fn reschedule(&mut self, _new_delay: Duration) {}
}

/// A call-recording `Executor` used by the backoff escalation test: it fires the scheduled
/// callback immediately (on a freshly spawned task) rather than after the real delay, since the
/// test only cares about the sequence of *requested* delays, not about wall-clock timing.
#[derive(Default)]
struct RecordingExecutor {
    delays: Mutex<Vec<Duration>>,
}

impl Executor for RecordingExecutor {
    fn schedule(&self, delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Box<dyn ScheduledTask> {
        self.delays.lock().unwrap().push(delay);
        tokio::task::spawn(async move { task() });
        Box::new(NoopScheduledTask)
    }
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn config(stream_name: &str) -> ShardMapConfig {
    ShardMapConfig {
        stream_name: stream_name.into(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn steady_state_routes_to_the_two_open_shards() {
    let topology = ScriptedTopology::new(vec![Response::Page(Page {
        shards: vec![shard(1, 0, 49), shard(2, 50, 99)],
        continuation_token: None,
    })]);
    let map = ShardMap::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();

    settle().await;

    assert_eq!(map.shard_id(0), Some(ShardId(1)));
    assert_eq!(map.shard_id(49), Some(ShardId(1)));
    assert_eq!(map.shard_id(50), Some(ShardId(2)));
    assert_eq!(map.shard_id(99), Some(ShardId(2)));
}

#[tokio::test(start_paused = true)]
async fn mid_reshard_routes_by_the_open_children_not_the_still_open_parent() {
    // The topology service reports both a parent spanning the whole space and its two already-
    // created children, all still open, exactly as it may during a live reshard.
    let topology = ScriptedTopology::new(vec![Response::Page(Page {
        shards: vec![shard(1, 0, 99), shard(2, 0, 49), shard(3, 50, 99)],
        continuation_token: None,
    })]);
    let map = ShardMap::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();

    settle().await;

    assert_eq!(map.shard_id(10), Some(ShardId(2)));
    assert_eq!(map.shard_id(90), Some(ShardId(3)));
    // The parent is still resolvable by id (for retry classification) even though it lost the
    // hot-path routing contest to its children.
    assert!(map.get_shard(ShardId(1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn invalidation_before_the_current_view_was_built_is_suppressed() {
    let topology = ScriptedTopology::new(vec![Response::Page(Page {
        shards: vec![shard(1, 0, 99)],
        continuation_token: None,
    })]);
    let map = ShardMap::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();
    settle().await;

    // `seen_at` predates the refresh that built the current view, so this must not trigger a
    // second refresh.
    let stale_observation = tokio::time::Instant::now() - Duration::from_secs(30);
    map.invalidate(stale_observation, Some(ShardId(1)));
    settle().await;

    assert_eq!(map.shard_id(50), Some(ShardId(1)));
}

#[tokio::test(start_paused = true)]
async fn invalidation_after_a_genuine_mis_route_triggers_a_refresh() {
    let topology = ScriptedTopology::new(vec![
        Response::Page(Page {
            shards: vec![shard(1, 0, 99)],
            continuation_token: None,
        }),
        Response::Page(Page {
            shards: vec![shard(1, 0, 49), shard(2, 50, 99)],
            continuation_token: None,
        }),
    ]);
    let map = ShardMap::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();
    settle().await;
    assert_eq!(map.shard_id(75), Some(ShardId(1)));

    tokio::time::advance(Duration::from_millis(1)).await;
    map.invalidate(tokio::time::Instant::now(), Some(ShardId(1)));
    settle().await;

    assert_eq!(map.shard_id(75), Some(ShardId(2)));
}

#[tokio::test]
async fn backoff_escalates_1_5x_across_successive_failed_refreshes() {
    let topology = ScriptedTopology::new(vec![
        Response::Fail,
        Response::Fail,
        Response::Fail,
        Response::Page(Page {
            shards: vec![shard(1, 0, 99)],
            continuation_token: None,
        }),
    ]);
    let executor = Arc::new(RecordingExecutor::default());

    // `ShardMap` owns its executor by value, so we drive the refresh engine directly rather than
    // through `ShardMap::new` (which would take ownership and make `executor.delays` unreachable
    // after construction).
    let engine = shard_map::refresh::RefreshEngine::new(
        config("orders"),
        topology,
        RecordingExecutorHandle(executor.clone()),
        RecordingMetrics::default(),
    );
    engine.trigger();
    // Each failed attempt spawns its retry on a fresh task, so draining the full three-failure
    // chain needs more yield rounds than a single successful refresh does.
    for _ in 0..8 {
        settle().await;
    }

    assert_eq!(
        executor.delays.lock().unwrap().as_slice(),
        [
            Duration::from_millis(1000),
            Duration::from_millis(1500),
            Duration::from_millis(2250),
        ]
    );
}

/// `RecordingExecutor` isn't `Clone`, and `Executor` requires owning the value passed to
/// `RefreshEngine::new`; this thin wrapper lets the test keep its own `Arc` for assertions while
/// handing the engine something it can own.
struct RecordingExecutorHandle(Arc<RecordingExecutor>);
impl Executor for RecordingExecutorHandle {
    fn schedule(&self, delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Box<dyn ScheduledTask> {
        self.0.schedule(delay, task)
    }
}

#[tokio::test(start_paused = true)]
async fn closed_shards_are_evicted_from_the_cache_only_after_the_ttl() {
    let topology = ScriptedTopology::new(vec![
        Response::Page(Page {
            shards: vec![shard(1, 0, 49), shard(2, 50, 99)],
            continuation_token: None,
        }),
        // A reshard closes shard 1 and replaces its range with shard 3.
        Response::Page(Page {
            shards: vec![shard(3, 0, 49), shard(2, 50, 99)],
            continuation_token: None,
        }),
    ]);
    let mut cfg = config("orders");
    cfg.closed_shard_ttl = Duration::from_secs(60);
    let map = ShardMap::new(
        cfg,
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();
    settle().await;
    assert!(map.get_shard(ShardId(1)).is_some());

    tokio::time::advance(Duration::from_millis(1)).await;
    map.invalidate(tokio::time::Instant::now(), Some(ShardId(1)));
    settle().await;
    assert_eq!(map.shard_id(10), Some(ShardId(3)));

    // Immediately after the second refresh, shard 1's stale descriptor is still retrievable: the
    // janitor hasn't had a full TTL window since that refresh yet.
    assert!(map.get_shard(ShardId(1)).is_some());

    tokio::time::advance(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(map.get_shard(ShardId(1)), None);
    assert!(map.get_shard(ShardId(3)).is_some());
}

#[tokio::test(start_paused = true)]
async fn metrics_sink_observes_attempts_successes_and_failures() {
    let topology = ScriptedTopology::new(vec![Response::Page(Page {
        shards: vec![shard(1, 0, 99)],
        continuation_token: None,
    })]);
    let metrics = Arc::new(RecordingMetrics::default());

    let engine = shard_map::refresh::RefreshEngine::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        MetricsHandle(metrics.clone()),
    );
    engine.trigger();
    settle().await;

    assert_eq!(*metrics.attempted.lock().unwrap(), 1);
    assert_eq!(*metrics.succeeded.lock().unwrap(), 1);
    assert_eq!(*metrics.failed.lock().unwrap(), 0);
}

struct MetricsHandle(Arc<RecordingMetrics>);
impl MetricsSink for MetricsHandle {
    fn refresh_attempted(&self) {
        self.0.refresh_attempted();
    }
    fn refresh_succeeded(&self) {
        self.0.refresh_succeeded();
    }
    fn refresh_failed(&self) {
        self.0.refresh_failed();
    }
}

#[tokio::test(start_paused = true)]
async fn reshard_with_a_grandchild_spanning_the_parent_boundary_still_routes_to_the_leaves() {
    // The worked example from the crate's own design docs: two parents each split into two
    // children, plus a later re-merge that spans the original parent boundary. The lookup index
    // must never contain that grandchild.
    let topology = ScriptedTopology::new(vec![Response::Page(Page {
        shards: vec![
            shard(1, 0, 5),  // P1
            shard(2, 6, 10), // P2
            shard(3, 0, 2),  // C1
            shard(4, 3, 5),  // C2
            shard(5, 6, 8),  // C3
            shard(6, 9, 10), // C4
            shard(7, 3, 8),  // grandchild spanning the P1/P2 boundary
        ],
        continuation_token: None,
    })]);
    let map = ShardMap::new(
        config("orders"),
        topology,
        shard_map::TokioExecutor,
        RecordingMetrics::default(),
    )
    .unwrap();
    settle().await;

    assert_eq!(map.shard_id(0), Some(ShardId(3)));
    assert_eq!(map.shard_id(2), Some(ShardId(3)));
    assert_eq!(map.shard_id(3), Some(ShardId(4)));
    assert_eq!(map.shard_id(5), Some(ShardId(4)));
    assert_eq!(map.shard_id(6), Some(ShardId(5)));
    assert_eq!(map.shard_id(8), Some(ShardId(5)));
    assert_eq!(map.shard_id(9), Some(ShardId(6)));
    assert_eq!(map.shard_id(10), Some(ShardId(6)));
}

#[test]
fn scripted_topology_request_count_tracks_pagination() {
    let topology = ScriptedTopology::new(vec![]);
    assert_eq!(topology.request_count(), 0);
}
