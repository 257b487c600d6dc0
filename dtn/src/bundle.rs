//! The DTN bundle: its fields (§3 "Bundle (DTN)") and its bit-exact
//! wire format (§6 "Bundle wire format"), used both as the payload of
//! a mesh `bundle`-typed message and as the on-disk encoding in
//! `bundles.db`.

use crate::error::DtnError;
use crate::id::BundleId;
use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// §3 "priority ∈ {critical, high, normal, low}". Declaration order is
/// significant: the derived [`Ord`] makes `Critical` the smallest value,
/// so sorting a dequeue ascending by priority yields strict
/// critical-first order (§4.6 "Scheduling"), and sorting descending
/// (i.e. reversing this order) yields the lowest-priority-first
/// eviction order (§4.6 "Eviction under pressure").
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    fn from_tag(tag: u8) -> Result<Self, DtnError> {
        Ok(match tag {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            3 => Priority::Low,
            _ => return Err(DtnError::MalformedFrame),
        })
    }
}

/// A DTN bundle (§3). Immutable once queued (§3 invariant): every
/// mutation (hop-set extension, forwarding) produces a new value
/// rather than mutating in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub source: PeerId,
    /// Absent destination means epidemic routing (§3).
    pub destination: Option<PeerId>,
    pub created_at_millis: u64,
    pub expiry_millis: u64,
    pub priority: Priority,
    /// Peers that have already handled this bundle (§3 "Hop set"),
    /// used to cap epidemic flooding.
    pub hop_set: BTreeSet<PeerId>,
    pub payload: Vec<u8>,
}

impl Bundle {
    pub fn new(
        source: PeerId,
        destination: Option<PeerId>,
        now_millis: u64,
        ttl_millis: u64,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Self {
        let mut hop_set = BTreeSet::new();
        hop_set.insert(source);
        Self {
            id: BundleId::generate(),
            source,
            destination,
            created_at_millis: now_millis,
            expiry_millis: now_millis.saturating_add(ttl_millis),
            priority,
            hop_set,
            payload,
        }
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        now_millis >= self.expiry_millis
    }

    pub fn remaining_ttl_millis(&self, now_millis: u64) -> u64 {
        self.expiry_millis.saturating_sub(now_millis)
    }

    pub fn is_epidemic(&self) -> bool {
        self.destination.is_none()
    }

    /// A copy with `peer` added to the hop set (§4.6 "On receipt, the
    /// bundle's hop set is extended with the receiving peer's id
    /// before further forwarding").
    pub fn with_hop(&self, peer: PeerId) -> Self {
        let mut copy = self.clone();
        copy.hop_set.insert(peer);
        copy
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(80 + self.payload.len());
        out.extend_from_slice(self.id.as_bytes());
        write_peer(&mut out, &self.source);
        match &self.destination {
            Some(dest) => write_peer(&mut out, dest),
            None => out.push(0),
        }
        out.extend_from_slice(&self.created_at_millis.to_be_bytes());
        out.extend_from_slice(&self.expiry_millis.to_be_bytes());
        out.push(self.priority as u8);
        out.extend_from_slice(&(self.hop_set.len() as u16).to_be_bytes());
        for hop in &self.hop_set {
            write_peer(&mut out, hop);
        }
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DtnError> {
        let mut cursor = 0usize;
        let id_bytes: [u8; 16] = bytes
            .get(cursor..cursor + 16)
            .ok_or(DtnError::MalformedFrame)?
            .try_into()
            .map_err(|_| DtnError::MalformedFrame)?;
        let id = BundleId::from_bytes(id_bytes);
        cursor += 16;

        let source = read_peer(bytes, &mut cursor)?;
        let destination = read_optional_peer(bytes, &mut cursor)?;

        let created_at_millis = read_u64(bytes, &mut cursor)?;
        let expiry_millis = read_u64(bytes, &mut cursor)?;

        let priority = Priority::from_tag(*bytes.get(cursor).ok_or(DtnError::MalformedFrame)?)?;
        cursor += 1;

        let hop_count = u16::from_be_bytes(
            bytes
                .get(cursor..cursor + 2)
                .ok_or(DtnError::MalformedFrame)?
                .try_into()
                .unwrap(),
        );
        cursor += 2;
        let mut hop_set = BTreeSet::new();
        for _ in 0..hop_count {
            hop_set.insert(read_peer(bytes, &mut cursor)?);
        }

        let len = u32::from_be_bytes(
            bytes
                .get(cursor..cursor + 4)
                .ok_or(DtnError::MalformedFrame)?
                .try_into()
                .unwrap(),
        ) as usize;
        cursor += 4;
        let payload = bytes
            .get(cursor..cursor + len)
            .ok_or(DtnError::MalformedFrame)?
            .to_vec();

        Ok(Self {
            id,
            source,
            destination,
            created_at_millis,
            expiry_millis,
            priority,
            hop_set,
            payload,
        })
    }
}

fn write_peer(out: &mut Vec<u8>, peer: &PeerId) {
    let bytes = peer.public_key_bytes();
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
}

fn read_peer(bytes: &[u8], cursor: &mut usize) -> Result<PeerId, DtnError> {
    let len = *bytes.get(*cursor).ok_or(DtnError::MalformedFrame)? as usize;
    *cursor += 1;
    let raw = bytes
        .get(*cursor..*cursor + len)
        .ok_or(DtnError::MalformedFrame)?;
    *cursor += len;
    let key: [u8; 32] = raw.try_into().map_err(|_| DtnError::MalformedFrame)?;
    Ok(PeerId::from_public_key_bytes(key))
}

fn read_optional_peer(bytes: &[u8], cursor: &mut usize) -> Result<Option<PeerId>, DtnError> {
    let len = *bytes.get(*cursor).ok_or(DtnError::MalformedFrame)? as usize;
    if len == 0 {
        *cursor += 1;
        return Ok(None);
    }
    read_peer(bytes, cursor).map(Some)
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, DtnError> {
    let value = u64::from_be_bytes(
        bytes
            .get(*cursor..*cursor + 8)
            .ok_or(DtnError::MalformedFrame)?
            .try_into()
            .unwrap(),
    );
    *cursor += 8;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    #[test]
    fn bundle_round_trips_through_wire_format() {
        let bundle = Bundle::new(
            peer(1),
            Some(peer(2)),
            1_000,
            60_000,
            Priority::High,
            b"resource: drill".to_vec(),
        );
        let bytes = bundle.encode();
        let decoded = Bundle::decode(&bytes).unwrap();
        assert_eq!(decoded.id, bundle.id);
        assert_eq!(decoded.destination, Some(peer(2)));
        assert_eq!(decoded.expiry_millis, 61_000);
        assert_eq!(decoded.payload, b"resource: drill");
    }

    #[test]
    fn epidemic_bundle_has_no_destination() {
        let bundle = Bundle::new(peer(1), None, 0, 1_000, Priority::Low, vec![]);
        assert!(bundle.is_epidemic());
        let bytes = bundle.encode();
        assert!(Bundle::decode(&bytes).unwrap().is_epidemic());
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut priorities = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn hop_set_extension_does_not_mutate_original() {
        let bundle = Bundle::new(peer(1), None, 0, 1_000, Priority::Normal, vec![]);
        let extended = bundle.with_hop(peer(9));
        assert!(!bundle.hop_set.contains(&peer(9)));
        assert!(extended.hop_set.contains(&peer(9)));
    }
}
