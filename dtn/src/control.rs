//! The contact-exchange sub-protocol (§4.6 "Exchange protocol on
//! contact"): a small internal message set carried as the payload of
//! `bundle`-typed mesh messages. Unlike the bundle wire format itself,
//! this sub-protocol is not specified bit-exact on the wire (§6
//! specifies the bundle format, not this internal handshake), so it is
//! encoded with the same `bincode` convention the rest of the
//! workspace uses for internal payloads.

use crate::bundle::{Bundle, Priority};
use crate::error::DtnError;
use crate::id::BundleId;
use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};

/// Lightweight metadata about a held bundle, enough for a peer to
/// decide whether it wants the full bundle without transferring its
/// payload speculatively.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleDigest {
    pub id: BundleId,
    pub destination: Option<PeerId>,
    pub priority: Priority,
    pub expiry_millis: u64,
}

impl From<&Bundle> for BundleDigest {
    fn from(bundle: &Bundle) -> Self {
        Self {
            id: bundle.id,
            destination: bundle.destination,
            priority: bundle.priority,
            expiry_millis: bundle.expiry_millis,
        }
    }
}

/// §4.6 "Exchange protocol on contact": peers trade a summary of held
/// bundles, request what they lack and want, transfer in
/// priority-then-expiry order, and propagate delivery acknowledgments
/// so upstream holders can drop their copy (§4.6 "Delivery
/// confirmation").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BundleControl {
    Digest(Vec<BundleDigest>),
    Request(Vec<BundleId>),
    Transfer(Bundle),
    Acks(Vec<BundleId>),
}

impl BundleControl {
    pub fn encode(&self) -> Result<Vec<u8>, DtnError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DtnError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_identity::PeerId;

    #[test]
    fn digest_round_trips() {
        let control = BundleControl::Digest(vec![BundleDigest {
            id: BundleId::generate(),
            destination: Some(PeerId::from_public_key_bytes([3; 32])),
            priority: Priority::High,
            expiry_millis: 1_000,
        }]);
        let bytes = control.encode().unwrap();
        let decoded = BundleControl::decode(&bytes).unwrap();
        assert!(matches!(decoded, BundleControl::Digest(entries) if entries.len() == 1));
    }
}
