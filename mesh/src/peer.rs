//! The peer table (§3 "Peer", §4.5 "Owns the peer table").

use crate::adapter::AdapterKind;
use aidmesh_identity::{PeerId, PublicKeys};
use fnv::FnvHashMap;
use std::collections::BTreeSet;

/// One known peer and what the mesh manager currently knows about it
/// (§3 "Peer"). Single-writer (the mesh manager); readers see
/// consistent snapshots (§5).
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: PeerId,
    pub transports: BTreeSet<AdapterKind>,
    pub last_seen_millis: u64,
    pub display_name: Option<String>,
    pub signal_strength: Option<i8>,
    /// Keys advertised in this peer's last announce, mirrored here so
    /// the mesh manager can pick a recipient key without reaching into
    /// the session layer's trust table (§4.5, §4.7).
    pub public_keys: Option<PublicKeys>,
    /// True iff a verified public key is on file for this peer (§3).
    pub trusted: bool,
}

impl Peer {
    fn new(id: PeerId, transport: AdapterKind, now_millis: u64) -> Self {
        let mut transports = BTreeSet::new();
        transports.insert(transport);
        Self {
            id,
            transports,
            last_seen_millis: now_millis,
            display_name: None,
            signal_strength: None,
            public_keys: None,
            trusted: false,
        }
    }
}

/// id -> [`Peer`]. Single-writer: the mesh manager is the only holder
/// of `&mut PeerTable` (§5).
#[derive(Default)]
pub struct PeerTable {
    peers: FnvHashMap<PeerId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records contact with `peer` over `transport`, creating the
    /// entry if this is the first time it has been seen (§3
    /// "Lifecycles: Peers are created on discovery, touched on each
    /// contact").
    pub fn touch(&mut self, peer: PeerId, transport: AdapterKind, now_millis: u64) -> &mut Peer {
        let entry = self
            .peers
            .entry(peer)
            .or_insert_with(|| Peer::new(peer, transport, now_millis));
        entry.transports.insert(transport);
        entry.last_seen_millis = now_millis;
        entry
    }

    pub fn mark_trusted(&mut self, peer: &PeerId) {
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.trusted = true;
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Peer> {
        self.peers.get(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Evicts peers idle longer than `idle_threshold_millis` (§3
    /// "Lifecycles: ...evicted after a configurable idleness
    /// threshold").
    pub fn evict_idle(&mut self, now_millis: u64, idle_threshold_millis: u64) -> Vec<PeerId> {
        let mut evicted = Vec::new();
        self.peers.retain(|id, peer| {
            let idle = now_millis.saturating_sub(peer.last_seen_millis);
            if idle > idle_threshold_millis {
                evicted.push(*id);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// The best adapter to reach `peer` given the tie-break order of
    /// §4.5: WebRTC-class > BLE-class > LoRa-class (highest bandwidth
    /// first).
    pub fn preferred_transport(&self, peer: &PeerId) -> Option<AdapterKind> {
        let entry = self.peers.get(peer)?;
        [AdapterKind::LocalNet, AdapterKind::Ble, AdapterKind::Lora]
            .into_iter()
            .find(|kind| entry.transports.contains(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_id(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    #[test]
    fn touch_creates_then_updates_entry() {
        let mut table = PeerTable::new();
        let p = peer_id(1);
        table.touch(p, AdapterKind::Ble, 10);
        table.touch(p, AdapterKind::LocalNet, 20);
        let entry = table.get(&p).unwrap();
        assert_eq!(entry.last_seen_millis, 20);
        assert_eq!(entry.transports.len(), 2);
    }

    #[test]
    fn preferred_transport_follows_bandwidth_tie_break() {
        let mut table = PeerTable::new();
        let p = peer_id(1);
        table.touch(p, AdapterKind::Lora, 0);
        table.touch(p, AdapterKind::Ble, 0);
        assert_eq!(table.preferred_transport(&p), Some(AdapterKind::Ble));
        table.touch(p, AdapterKind::LocalNet, 0);
        assert_eq!(table.preferred_transport(&p), Some(AdapterKind::LocalNet));
    }

    #[test]
    fn idle_peers_are_evicted() {
        let mut table = PeerTable::new();
        let p = peer_id(1);
        table.touch(p, AdapterKind::Ble, 0);
        let evicted = table.evict_idle(10_000, 5_000);
        assert_eq!(evicted, vec![p]);
        assert!(!table.contains(&p));
    }
}
