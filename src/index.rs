//! The hot-path lookup index: `(end_hash_key, shard_id)` pairs sorted ascending by
//! `end_hash_key`, forming a disjoint cover of the hash-key space.
//!
//! Readers must never block. Rather than `gazette::router::Router`'s two-lock,
//! try-lock-and-fall-through-on-contention scheme (see `DESIGN.md`), this publishes each rebuilt
//! index as a new immutable `Arc` behind a single `RwLock`, acquired with `try_read`: a writer
//! only ever holds the lock long enough to swap a pointer, so contention is vanishingly rare and
//! readers that do hit it simply report "not ready" to the caller, exactly as the spec requires.

use crate::hash_key::HashKey;
use crate::reconciler::CoverEntry;
use crate::shard_id::ShardId;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct Snapshot {
    entries: Vec<CoverEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<CoverEntry>) -> Self {
        debug_assert!(
            entries.windows(2).all(|w| w[0].end_hash_key < w[1].end_hash_key),
            "cover entries must be strictly increasing in end_hash_key"
        );
        Self { entries }
    }

    /// Binary search for the first entry whose `end_hash_key >= hash_key`.
    fn lookup(&self, hash_key: HashKey) -> Option<ShardId> {
        let idx = self
            .entries
            .partition_point(|entry| entry.end_hash_key < hash_key);

        match self.entries.get(idx) {
            Some(entry) => Some(entry.shard_id),
            None => {
                tracing::error!(
                    hash_key,
                    max_end_hash_key = self.entries.last().map(|e| e.end_hash_key),
                    "shard map inconsistency: hash key exceeds all known ranges"
                );
                None
            }
        }
    }
}

/// Lock-light holder of the current `Snapshot`. Cloning a `LookupIndex` is cheap and shares the
/// same underlying slot; all clones observe the same published snapshot.
#[derive(Clone, Default)]
pub struct LookupIndex {
    inner: Arc<RwLock<Option<Arc<Snapshot>>>>,
}

impl LookupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a freshly-built snapshot, replacing whatever was there before. Takes the lock for
    /// only as long as it takes to swap an `Arc` pointer.
    pub fn publish(&self, snapshot: Snapshot) {
        let mut guard = self
            .inner
            .write()
            .expect("lookup index lock poisoned by a panicking writer");
        *guard = Some(Arc::new(snapshot));
    }

    /// Look up the shard owning `hash_key`. Returns `None` if no snapshot has been published yet,
    /// if the snapshot is momentarily being swapped (contention), or if `hash_key` falls outside
    /// every known range (an inconsistency, logged separately).
    pub fn shard_id(&self, hash_key: HashKey) -> Option<ShardId> {
        let guard = self.inner.try_read().ok()?;
        guard.as_ref()?.lookup(hash_key)
    }
}
