//! Converts a raw, possibly-overlapping shard list into the minimal disjoint cover of the
//! hash-key space that the lookup index (`crate::index`) requires.
//!
//! During a reshard the topology service may report both a parent and its children as open
//! simultaneously. We prefer the parent's range wherever it overlaps a child's: the service may
//! still accept records on the parent, and if we routed by the (narrower) child range, an
//! aggregated payload delivered to the still-open parent could span multiple children, forcing
//! per-record retries once the service finishes the split. See the module-level docs on
//! `crate::ShardMap` for the worked example.

use crate::hash_key::HashKey;
use crate::shard::Shard;
use crate::shard_id::ShardId;
use std::collections::BinaryHeap;

/// One entry of the lookup index: the shard owning the half-open-from-below range ending at
/// `end_hash_key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoverEntry {
    pub end_hash_key: HashKey,
    pub shard_id: ShardId,
}

/// A (possibly trimmed) candidate range still being processed by the sweep.
///
/// `original` distinguishes a shard's as-reported range from a range that was trimmed after
/// losing part of its span to an already-committed, wider sibling. When trimming produces a
/// range that exactly coincides with another candidate's range (this happens whenever a
/// re-merged "grandchild" shard spans two first-generation children, or a parent trimmed down to
/// a single child's remainder), the untrimmed candidate wins: it is the legitimate, as-reported
/// shard, while the trimmed one is only a leftover shadow of a wider shard we already rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    start: HashKey,
    end: HashKey,
    shard_id: ShardId,
    original: bool,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; popping in this order yields shards by decreasing `end`,
        // breaking ties by decreasing `start`, then preferring an untrimmed range over a trimmed
        // one, then (for the fully-equal-original-ranges case the source material leaves
        // undefined) by decreasing `shard_id` as an arbitrary but deterministic catch-all.
        (self.end, self.start, self.original, self.shard_id).cmp(&(
            other.end,
            other.start,
            other.original,
            other.shard_id,
        ))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Build the minimal disjoint cover of the hash-key space from `shards`, in ascending
/// `end_hash_key` order as required by the lookup index.
pub fn build_cover(shards: &[Shard]) -> Vec<CoverEntry> {
    let mut heap: BinaryHeap<Candidate> = shards
        .iter()
        .map(|s| Candidate {
            start: s.hash_key_range.start,
            end: s.hash_key_range.end,
            shard_id: s.shard_id,
            original: true,
        })
        .collect();

    let mut emitted = Vec::with_capacity(shards.len());
    let mut last_start: Option<HashKey> = None; // None means "+inf": nothing committed yet.

    while let Some(candidate) = heap.pop() {
        let below_committed = match last_start {
            None => true,
            Some(watermark) => candidate.end < watermark,
        };

        if below_committed {
            emitted.push(CoverEntry {
                end_hash_key: candidate.end,
                shard_id: candidate.shard_id,
            });
            last_start = Some(candidate.start);
            continue;
        }

        let watermark = last_start.expect("below_committed is false only once a watermark exists");
        if candidate.start < watermark {
            // Partial overlap: trim the top off this shard's range and re-contest it.
            let Some(trimmed_end) = watermark.checked_sub(1) else {
                // watermark is 0; nothing can lie below it, so the remainder is empty.
                continue;
            };
            heap.push(Candidate {
                start: candidate.start,
                end: trimmed_end,
                shard_id: candidate.shard_id,
                original: false,
            });
        }
        // else: candidate.start >= watermark, so candidate is fully shadowed by committed range.
    }

    emitted.reverse();
    emitted
}
