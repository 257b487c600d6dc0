//! The peer trust table (§4.7 "Trust table"): peer id -> public key,
//! with TOFU-by-default key-conflict detection and quarantine.

use aidmesh_identity::{PeerId, PublicKeys};
use std::collections::HashMap;

/// §6 `trust_mode`: whether a new peer's key is accepted automatically
/// on first verified announce, or requires operator approval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrustMode {
    /// Trust on first use (§9 Open Question resolution: the default).
    Tofu,
    /// New peer keys sit pending until an operator approves them.
    Strict,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TrustState {
    Trusted,
    /// Key accepted under `strict` mode but awaiting operator approval.
    Pending,
    /// A key-substitution attempt was observed; traffic from this peer
    /// is ignored until an operator clears the quarantine (§4.7, §8
    /// property 5).
    Quarantined,
}

struct Entry {
    keys: PublicKeys,
    state: TrustState,
}

/// Maps peer id -> public key and tracks each peer's trust state
/// (§3 "Peer...trust flag (true iff public key has been received and
/// verified)", §4.7).
pub struct TrustTable {
    mode: TrustMode,
    entries: HashMap<PeerId, Entry>,
}

/// The outcome of observing an announce's advertised public keys
/// against the trust table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Observation {
    /// First time this peer has been seen; key recorded.
    NewlyTrusted,
    /// First time this peer has been seen, under `strict` mode;
    /// awaiting operator approval.
    PendingApproval,
    /// Matches the key already on file.
    Confirmed,
    /// A different key arrived for a previously-known peer (§8
    /// property 5). The peer has been moved to quarantine as a side
    /// effect of this call.
    KeyConflict,
    /// The peer is already quarantined; the observation is ignored.
    Quarantined,
}

impl TrustTable {
    pub fn new(mode: TrustMode) -> Self {
        Self {
            mode,
            entries: HashMap::new(),
        }
    }

    /// Records an announce's advertised public keys for `peer`,
    /// returning what happened. Implements the TOFU/strict policy and
    /// the "no silent key substitution" property (§8 property 5).
    pub fn observe_announce(&mut self, peer: PeerId, keys: PublicKeys) -> Observation {
        match self.entries.get_mut(&peer) {
            None => {
                let state = match self.mode {
                    TrustMode::Tofu => TrustState::Trusted,
                    TrustMode::Strict => TrustState::Pending,
                };
                self.entries.insert(peer, Entry { keys, state });
                match state {
                    TrustState::Trusted => Observation::NewlyTrusted,
                    _ => Observation::PendingApproval,
                }
            }
            Some(entry) if entry.state == TrustState::Quarantined => Observation::Quarantined,
            Some(entry) if entry.keys == keys => match entry.state {
                TrustState::Pending => Observation::PendingApproval,
                _ => Observation::Confirmed,
            },
            Some(entry) => {
                entry.state = TrustState::Quarantined;
                Observation::KeyConflict
            }
        }
    }

    /// `true` iff `peer`'s key is on file and verified, and the peer is
    /// not quarantined or pending approval (§3 Peer "trust flag").
    pub fn is_trusted(&self, peer: &PeerId) -> bool {
        matches!(
            self.entries.get(peer).map(|e| e.state),
            Some(TrustState::Trusted)
        )
    }

    pub fn is_quarantined(&self, peer: &PeerId) -> bool {
        matches!(
            self.entries.get(peer).map(|e| e.state),
            Some(TrustState::Quarantined)
        )
    }

    pub fn public_keys(&self, peer: &PeerId) -> Option<PublicKeys> {
        self.entries.get(peer).map(|e| e.keys)
    }

    /// Operator action: clears a quarantine, returning the peer to an
    /// unseen state so its next announce is evaluated fresh.
    pub fn clear_quarantine(&mut self, peer: &PeerId) {
        self.entries.remove(peer);
    }

    /// Operator action: approves a `strict`-mode pending peer.
    pub fn approve_pending(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entries.get_mut(peer) {
            if entry.state == TrustState::Pending {
                entry.state = TrustState::Trusted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(byte: u8) -> PublicKeys {
        PublicKeys {
            sign: [byte; 32],
            agreement: [byte; 32],
        }
    }

    fn peer() -> PeerId {
        PeerId::from_public_key_bytes([9; 32])
    }

    #[test]
    fn tofu_trusts_first_announce() {
        let mut table = TrustTable::new(TrustMode::Tofu);
        let p = peer();
        assert_eq!(table.observe_announce(p, keys(1)), Observation::NewlyTrusted);
        assert!(table.is_trusted(&p));
    }

    #[test]
    fn key_conflict_quarantines_peer() {
        let mut table = TrustTable::new(TrustMode::Tofu);
        let p = peer();
        table.observe_announce(p, keys(1));
        assert_eq!(table.observe_announce(p, keys(2)), Observation::KeyConflict);
        assert!(table.is_quarantined(&p));

        // S4: a subsequent legitimate announce with the original key
        // is still rejected until an operator clears the quarantine.
        assert_eq!(table.observe_announce(p, keys(1)), Observation::Quarantined);
    }

    #[test]
    fn strict_mode_requires_approval() {
        let mut table = TrustTable::new(TrustMode::Strict);
        let p = peer();
        table.observe_announce(p, keys(1));
        assert!(!table.is_trusted(&p));
        table.approve_pending(&p);
        assert!(table.is_trusted(&p));
    }

    #[test]
    fn clearing_quarantine_allows_fresh_tofu() {
        let mut table = TrustTable::new(TrustMode::Tofu);
        let p = peer();
        table.observe_announce(p, keys(1));
        table.observe_announce(p, keys(2));
        table.clear_quarantine(&p);
        assert_eq!(table.observe_announce(p, keys(2)), Observation::NewlyTrusted);
    }
}
