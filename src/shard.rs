use crate::hash_key::HashKeyRange;
use crate::shard_id::ShardId;

/// Inclusive range of sequence numbers a shard has accepted. `ending` is `None` while the shard
/// is open; its presence is the service's signal that the shard has closed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SequenceNumberRange {
    pub starting: u128,
    pub ending: Option<u128>,
}

impl SequenceNumberRange {
    pub fn is_closed(&self) -> bool {
        self.ending.is_some()
    }
}

/// A shard descriptor as returned by the topology service. Everything beyond `shard_id` and
/// `hash_key_range` is opaque to the router proper; `parent_shard_id` /
/// `adjacent_parent_shard_id` are carried through for observability only — the reconciler
/// (`crate::reconciler`) derives parent/child relationships from range containment, not from
/// these fields, since the service does not guarantee they're populated identically across all
/// topology backends.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Shard {
    pub shard_id: ShardId,
    pub hash_key_range: HashKeyRange,
    pub sequence_number_range: SequenceNumberRange,
    pub parent_shard_id: Option<ShardId>,
    pub adjacent_parent_shard_id: Option<ShardId>,
}

impl Shard {
    pub fn is_closed(&self) -> bool {
        self.sequence_number_range.is_closed()
    }
}
