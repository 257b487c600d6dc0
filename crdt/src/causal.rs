//! Causal summaries (§3 "causal history...sufficient to compute
//! minimal deltas", §4.1 "Minimal delta").
//!
//! Because every actor's own changes are strictly sequenced
//! (`seq = 1, 2, 3, ...`), a summary only needs the highest sequence
//! number seen per actor — one `(actor, max_seq)` pair each, logarithmic
//! in history size regardless of how many changes that actor made.

use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CausalSummary(BTreeMap<PeerId, u64>);

impl CausalSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_seq(&self, actor: &PeerId) -> u64 {
        self.0.get(actor).copied().unwrap_or(0)
    }

    pub fn observe(&mut self, actor: PeerId, seq: u64) {
        let entry = self.0.entry(actor).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
    }

    pub fn actors(&self) -> impl Iterator<Item = &PeerId> {
        self.0.keys()
    }
}
