//! The scheduling collaborator: lets the refresh engine arrange for a retry without depending on
//! `tokio` at the type level, the same way the rest of the source library keeps its transport
//! behind a swappable seam rather than hard-coding it throughout.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A unit of delayed work the executor can run, cancel, or push back.
pub trait ScheduledTask: Send {
    fn cancel(&mut self);
    fn reschedule(&mut self, new_delay: Duration);
}

/// Schedules a callback to run after a delay. `task` is invoked at most once per `schedule` call
/// (or per `reschedule`, which replaces the pending invocation rather than adding another).
pub trait Executor: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Box<dyn ScheduledTask>;
}

fn spawn_after(delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> JoinHandle<()> {
    tokio::task::spawn(async move {
        tokio::time::sleep(delay).await;
        task();
    })
}

struct TokioScheduledTask {
    task: Arc<dyn Fn() + Send + Sync>,
    handle: JoinHandle<()>,
}

impl ScheduledTask for TokioScheduledTask {
    fn cancel(&mut self) {
        self.handle.abort();
    }

    fn reschedule(&mut self, new_delay: Duration) {
        self.handle.abort();
        self.handle = spawn_after(new_delay, self.task.clone());
    }
}

/// Default `Executor`, backed by `tokio::task::spawn` and `tokio::time::sleep`.
#[derive(Default)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn schedule(&self, delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Box<dyn ScheduledTask> {
        let handle = spawn_after(delay, task.clone());
        Box::new(TokioScheduledTask { task, handle })
    }
}

/// A non-spawning, call-recording `Executor` for unit tests that want to assert on scheduled
/// delays without waiting on real (or even paused-clock) timers. Call `fire_latest()` to run the
/// most recently scheduled callback synchronously.
#[cfg(test)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

#[cfg(test)]
#[derive(Default)]
struct FakeState {
    delays: Vec<Duration>,
    pending: Option<Arc<dyn Fn() + Send + Sync>>,
}

#[cfg(test)]
impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.state.lock().unwrap().delays.clone()
    }

    pub fn fire_latest(&self) {
        let task = self.state.lock().unwrap().pending.clone();
        if let Some(task) = task {
            task();
        }
    }
}

#[cfg(test)]
impl Executor for FakeExecutor {
    fn schedule(&self, delay: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Box<dyn ScheduledTask> {
        let mut guard = self.state.lock().unwrap();
        guard.delays.push(delay);
        guard.pending = Some(task);
        drop(guard);
        // `Executor::schedule` takes `&self`, not `&Arc<Self>`, so the returned task can't carry
        // an `Arc` back to this executor; tests that need `cancel`/`reschedule` to affect
        // `scheduled_delays`/`cancelled_count` hold their own `Arc<FakeExecutor>` and call its
        // methods directly instead of going through the returned handle.
        Box::new(FakeScheduledTask {})
    }
}

#[cfg(test)]
struct FakeScheduledTask {}

#[cfg(test)]
impl ScheduledTask for FakeScheduledTask {
    fn cancel(&mut self) {}
    fn reschedule(&mut self, _new_delay: Duration) {}
}
