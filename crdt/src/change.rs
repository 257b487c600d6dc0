//! The unit of the document's hash-DAG causal history (§3
//! "supplemented"): each [`Change`] records its content hash, the
//! hashes of its causal parents, and a per-actor sequence number.

use crate::field::FieldPatch;
use crate::id::{ChangeHash, RecordId};
use crate::record::{RecordKey, RecordKind};
use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};

/// One field-level (or record-level) mutation inside a [`Change`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op {
    /// Introduces a new record. Idempotent: replaying it twice for the
    /// same key is a no-op after the first application.
    CreateRecord {
        key: RecordKey,
        creator: PeerId,
        created_at_millis: u64,
    },
    /// Merges a field delta into the named field, creating it if this
    /// is the field's first write.
    SetField {
        key: RecordKey,
        field: String,
        patch: FieldPatch,
    },
    /// Soft-deletes a record (§3 "Lifecycles": never hard-deleted).
    Tombstone { key: RecordKey },
}

impl Op {
    pub fn key(&self) -> RecordKey {
        match self {
            Op::CreateRecord { key, .. } => *key,
            Op::SetField { key, .. } => *key,
            Op::Tombstone { key } => *key,
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        self.key().0
    }

    pub fn record_id(&self) -> RecordId {
        self.key().1
    }
}

/// One atomically-applied batch of operations, content-addressed and
/// attributed to a single actor and sequence number (§4.1 "Atomic
/// batch").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change {
    pub hash: ChangeHash,
    pub parents: Vec<ChangeHash>,
    pub actor: PeerId,
    pub seq: u64,
    pub timestamp_millis: u64,
    pub ops: Vec<Op>,
}

/// The content that gets hashed to produce a [`Change::hash`] — the
/// change minus its own hash field, so the hash is a pure function of
/// everything else in it.
#[derive(Serialize)]
struct ChangeBody<'a> {
    parents: &'a [ChangeHash],
    actor: PeerId,
    seq: u64,
    timestamp_millis: u64,
    ops: &'a [Op],
}

impl Change {
    pub fn new(
        parents: Vec<ChangeHash>,
        actor: PeerId,
        seq: u64,
        timestamp_millis: u64,
        ops: Vec<Op>,
    ) -> Self {
        let body = ChangeBody {
            parents: &parents,
            actor,
            seq,
            timestamp_millis,
            ops: &ops,
        };
        let encoded = bincode::serialize(&body).expect("change body always serializes");
        let hash = ChangeHash::of(&encoded);
        Self {
            hash,
            parents,
            actor,
            seq,
            timestamp_millis,
            ops,
        }
    }
}
