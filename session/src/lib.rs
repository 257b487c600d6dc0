//! The secure session layer (C7, §4.7): wraps outbound mesh messages
//! with a signature and, for directed user-private payloads,
//! authenticated encryption; unwraps and verifies inbound ones against
//! a peer trust table.
//!
//! This crate knows nothing about mesh routing or message types beyond
//! "some bytes, maybe addressed to a specific peer" — [`aidmesh_mesh`]
//! is the only caller and owns the [`MeshMessage`](aidmesh_mesh)
//! envelope these wrapped bytes travel inside.

mod envelope;
mod error;
mod trust;

pub use crate::envelope::Envelope;
pub use crate::error::SessionError;
pub use crate::trust::{Observation, TrustMode, TrustTable};

use aidmesh_identity::{Identity, PeerId, PublicKeys};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The secure session layer's handle: a local identity plus the trust
/// table it checks inbound messages against (§4.7).
pub struct SecureSession {
    identity: Arc<Identity>,
    trust: parking_lot::Mutex<TrustTable>,
    /// Maximum allowed clock skew, in milliseconds, before an inbound
    /// envelope is rejected as stale (§4.7, §6 `sync_deadline_ms`-scale
    /// config; the session layer uses its own configured skew window).
    max_skew_millis: u64,
}

impl SecureSession {
    pub fn new(identity: Arc<Identity>, mode: TrustMode, max_skew_millis: u64) -> Self {
        Self {
            identity,
            trust: parking_lot::Mutex::new(TrustTable::new(mode)),
            max_skew_millis,
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.identity.id()
    }

    /// Processes an `announce`'s advertised public keys through the
    /// trust table (§4.7 "added to the table on first verified
    /// announce"). Returns what happened so the mesh manager can
    /// decide whether to mark the peer trusted.
    pub fn observe_announce(&self, peer: PeerId, keys: PublicKeys) -> Observation {
        self.trust.lock().observe_announce(peer, keys)
    }

    pub fn is_trusted(&self, peer: &PeerId) -> bool {
        self.trust.lock().is_trusted(peer)
    }

    pub fn is_quarantined(&self, peer: &PeerId) -> bool {
        self.trust.lock().is_quarantined(peer)
    }

    pub fn clear_quarantine(&self, peer: &PeerId) {
        self.trust.lock().clear_quarantine(peer)
    }

    pub fn approve_pending(&self, peer: &PeerId) {
        self.trust.lock().approve_pending(peer)
    }

    /// Wraps a broadcast/discoverable payload: signed only, payload
    /// stays in the clear so any peer can participate (§4.7).
    #[tracing::instrument(skip(self, payload))]
    pub fn wrap_broadcast(&self, payload: Vec<u8>) -> Envelope {
        let timestamp_millis = now_millis();
        let signature = self.identity.sign(&sign_input(&payload, timestamp_millis));
        Envelope::Signed {
            payload,
            timestamp_millis,
            signature,
        }
    }

    /// Wraps a directed, user-private payload to `recipient`: box then
    /// sign `(box || sender_id || timestamp)` (§4.7 steps 1-3).
    #[tracing::instrument(skip(self, plaintext, recipient))]
    pub fn wrap_directed(
        &self,
        recipient: &PublicKeys,
        plaintext: &[u8],
    ) -> Result<Envelope, SessionError> {
        let boxed = self.identity.seal_box(recipient, plaintext)?;
        let timestamp_millis = now_millis();
        let mut to_sign = Vec::new();
        to_sign.extend_from_slice(&boxed.nonce);
        to_sign.extend_from_slice(&boxed.ciphertext);
        to_sign.extend_from_slice(&sign_input(&[], timestamp_millis));
        let signature = self.identity.sign(&to_sign);
        Ok(Envelope::Encrypted {
            boxed,
            timestamp_millis,
            signature,
        })
    }

    /// Unwraps and verifies a broadcast envelope from `sender`,
    /// returning the plaintext payload (§4.7 "recipient verifies
    /// signature first").
    #[tracing::instrument(skip(self, envelope))]
    pub fn unwrap_broadcast(
        &self,
        sender: PeerId,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SessionError> {
        let Envelope::Signed {
            payload,
            timestamp_millis,
            signature,
        } = envelope
        else {
            return Err(SessionError::MalformedEnvelope);
        };
        self.check_skew(*timestamp_millis)?;
        self.verify(sender, &sign_input(payload, *timestamp_millis), signature)?;
        Ok(payload.clone())
    }

    /// Unwraps and decrypts a directed envelope from `sender` (§4.7
    /// "...then decrypts").
    #[tracing::instrument(skip(self, envelope))]
    pub fn unwrap_directed(
        &self,
        sender: PeerId,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SessionError> {
        let Envelope::Encrypted {
            boxed,
            timestamp_millis,
            signature,
        } = envelope
        else {
            return Err(SessionError::MalformedEnvelope);
        };
        self.check_skew(*timestamp_millis)?;
        let mut signed = Vec::new();
        signed.extend_from_slice(&boxed.nonce);
        signed.extend_from_slice(&boxed.ciphertext);
        signed.extend_from_slice(&sign_input(&[], *timestamp_millis));
        self.verify(sender, &signed, signature)?;

        let sender_keys = self
            .trust
            .lock()
            .public_keys(&sender)
            .ok_or(SessionError::UnknownPeerKey)?;
        Ok(self.identity.open_box(&sender_keys, boxed)?)
    }

    /// Verifies a signed envelope against an explicitly supplied key
    /// rather than the trust table, for the one message that must be
    /// verifiable before its sender is trusted: the announce itself,
    /// whose payload carries the key to check it against (§4.5 step 1,
    /// §4.7). Ordinary traffic always goes through
    /// [`SecureSession::unwrap_broadcast`].
    pub fn verify_with_keys(&self, keys: &PublicKeys, envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
        let Envelope::Signed {
            payload,
            timestamp_millis,
            signature,
        } = envelope
        else {
            return Err(SessionError::MalformedEnvelope);
        };
        self.check_skew(*timestamp_millis)?;
        if !aidmesh_identity::verify(&keys.sign, &sign_input(payload, *timestamp_millis), signature) {
            return Err(SessionError::BadSignature);
        }
        Ok(payload.clone())
    }

    fn check_skew(&self, timestamp_millis: u64) -> Result<(), SessionError> {
        let now = now_millis();
        let delta = now.abs_diff(timestamp_millis);
        if delta > self.max_skew_millis {
            return Err(SessionError::StaleTimestamp);
        }
        Ok(())
    }

    fn verify(
        &self,
        sender: PeerId,
        signed_bytes: &[u8],
        signature: &aidmesh_identity::SignedMessage,
    ) -> Result<(), SessionError> {
        if self.trust.lock().is_quarantined(&sender) {
            return Err(SessionError::Quarantined);
        }
        let keys = self
            .trust
            .lock()
            .public_keys(&sender)
            .ok_or(SessionError::UnknownPeerKey)?;
        if !aidmesh_identity::verify(&keys.sign, signed_bytes, signature) {
            return Err(SessionError::BadSignature);
        }
        Ok(())
    }
}

/// The bytes actually signed for a broadcast/clear payload: payload
/// plus the local sender id plus timestamp, per §4.7 step 2's
/// `(box || sender_id || timestamp)` pattern generalized to the
/// unencrypted case.
fn sign_input(payload: &[u8], timestamp_millis: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(payload);
    out.extend_from_slice(&timestamp_millis.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_identity::Identity;

    fn session(identity: Identity, mode: TrustMode) -> SecureSession {
        SecureSession::new(Arc::new(identity), mode, 60_000)
    }

    #[test]
    fn broadcast_round_trips_after_trust_established() {
        let alice = Identity::ephemeral();
        let bob = Identity::ephemeral();
        let alice_id = alice.id();
        let alice_keys = alice.public_keys();
        let alice_session = session(alice, TrustMode::Tofu);
        let bob_session = session(bob, TrustMode::Tofu);

        bob_session.observe_announce(alice_id, alice_keys);

        let envelope = alice_session.wrap_broadcast(b"hello mesh".to_vec());
        let plaintext = bob_session.unwrap_broadcast(alice_id, &envelope).unwrap();
        assert_eq!(plaintext, b"hello mesh");
    }

    #[test]
    fn directed_round_trips_with_encryption() {
        let alice = Identity::ephemeral();
        let bob = Identity::ephemeral();
        let alice_id = alice.id();
        let alice_keys = alice.public_keys();
        let bob_keys = bob.public_keys();
        let alice_session = session(alice, TrustMode::Tofu);
        let bob_session = session(bob, TrustMode::Tofu);

        bob_session.observe_announce(alice_id, alice_keys);

        let envelope = alice_session
            .wrap_directed(&bob_keys, b"resource: drill")
            .unwrap();
        let plaintext = bob_session.unwrap_directed(alice_id, &envelope).unwrap();
        assert_eq!(plaintext, b"resource: drill");
    }

    #[test]
    fn unknown_sender_key_is_rejected() {
        let alice = Identity::ephemeral();
        let bob = Identity::ephemeral();
        let alice_id = alice.id();
        let alice_session = session(alice, TrustMode::Tofu);
        let bob_session = session(bob, TrustMode::Tofu);

        let envelope = alice_session.wrap_broadcast(b"hi".to_vec());
        let err = bob_session.unwrap_broadcast(alice_id, &envelope).unwrap_err();
        assert!(matches!(err, SessionError::UnknownPeerKey));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let alice = Identity::ephemeral();
        let bob = Identity::ephemeral();
        let alice_id = alice.id();
        let alice_keys = alice.public_keys();
        let alice_session = session(alice, TrustMode::Tofu);
        let bob_session = SecureSession::new(Arc::new(bob), TrustMode::Tofu, 0);
        bob_session.observe_announce(alice_id, alice_keys);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let envelope = alice_session.wrap_broadcast(b"hi".to_vec());
        let err = bob_session.unwrap_broadcast(alice_id, &envelope).unwrap_err();
        assert!(matches!(err, SessionError::StaleTimestamp));
    }

    #[test]
    fn quarantined_sender_is_rejected() {
        let alice = Identity::ephemeral();
        let mallory = Identity::ephemeral();
        let bob = Identity::ephemeral();
        let alice_id = alice.id();
        let alice_keys = alice.public_keys();
        let mallory_keys = mallory.public_keys();
        let alice_session = session(alice, TrustMode::Tofu);
        let bob_session = session(bob, TrustMode::Tofu);

        bob_session.observe_announce(alice_id, alice_keys);
        // spoofed announce with a different key quarantines the peer
        bob_session.observe_announce(alice_id, mallory_keys);
        assert!(bob_session.is_quarantined(&alice_id));

        let envelope = alice_session.wrap_broadcast(b"hi".to_vec());
        let err = bob_session.unwrap_broadcast(alice_id, &envelope).unwrap_err();
        assert!(matches!(err, SessionError::Quarantined));
    }
}
