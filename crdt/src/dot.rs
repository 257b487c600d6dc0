use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};

/// An (actor, sequence-number) pair: one unit of causal history
/// attributable to a single actor, the building block the hash-DAG
/// change history and the field CRDTs are both expressed in terms of.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Dot {
    pub actor: PeerId,
    pub counter: u64,
}

impl Dot {
    pub fn new(actor: PeerId, counter: u64) -> Self {
        Self { actor, counter }
    }
}

/// A timestamp used to total-order concurrent LWW writes: wall-clock
/// millis first, then the originating dot as a deterministic
/// tie-breaker so `merge(A,B) == merge(B,A)` even when two actors
/// write at the identical millisecond (§4.1 "Determinism of merge").
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct HybridTimestamp {
    pub millis: u64,
    pub dot: Dot,
}

impl HybridTimestamp {
    pub fn new(millis: u64, dot: Dot) -> Self {
        Self { millis, dot }
    }
}
