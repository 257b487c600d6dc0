//! Payload shapes carried inside [`crate::message::MeshMessage`] for
//! the sync protocol's own message types (§4.5 "Sync protocol").
//! `Data`/`Bundle` payloads are opaque from this crate's perspective —
//! the caller (sync scheduler, DTN layer) owns their shape.

use aidmesh_crdt::{CausalSummary, Change};
use aidmesh_identity::{PeerId, PublicKeys};
use serde::{Deserialize, Serialize};

/// Carried by an `announce` message: the local identifier, declared
/// capabilities, and public keys (§4.5 step 1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub peer_id: PeerId,
    pub capabilities: Vec<String>,
    pub public_keys: PublicKeys,
}

impl AnnouncePayload {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("announce payload always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// Carried by a `sync-request`: the sender's causal summary (§4.5 step 3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRequestPayload {
    pub summary: CausalSummary,
}

impl SyncRequestPayload {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("sync-request payload always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

/// Carried by a `sync-response`: the minimal delta the requester lacked
/// (§4.5 step 4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponsePayload {
    pub changes: Vec<Change>,
}

impl SyncResponsePayload {
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("sync-response payload always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}
