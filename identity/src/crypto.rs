//! Primitive operations (§4.2): sign/verify, box/unbox, passphrase KDF.
//!
//! This module is deliberately thin: it is the only place in the crate
//! that touches `ed25519-dalek`, `x25519-dalek`, `chacha20poly1305` or
//! `argon2` directly. Everything above it (peer identity, sealed
//! storage, and every other crate in the workspace) only sees opaque
//! key/signature/ciphertext newtypes.

use crate::error::IdentityError;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use chacha20poly1305::{Key as AeadKey, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret as XStaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an authenticated-box nonce (XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;

/// A full keypair: an Ed25519 signing key (identity, §4.2 `sign`/`verify`)
/// and an X25519 agreement key (§4.2 `box`/`unbox`). The two are
/// independent key material generated together at identity creation
/// time; the public halves of both travel together in an `announce`.
#[derive(ZeroizeOnDrop)]
pub struct Keypair {
    signing: SigningKey,
    agreement: XStaticSecret,
}

/// The public halves of a [`Keypair`], safe to hand to any peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub sign: [u8; 32],
    pub agreement: [u8; 32],
}

/// A detached Ed25519 signature.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct SignedMessage(pub [u8; 64]);

/// An authenticated box: nonce plus ciphertext-with-tag.
#[derive(Clone, Serialize, Deserialize)]
pub struct BoxedMessage {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Keypair {
    /// Generates a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let agreement = XStaticSecret::random_from_rng(OsRng);
        Self { signing, agreement }
    }

    /// Reconstructs a keypair from raw bytes (used when unsealing an
    /// identity blob). Both slices must be exactly 32 bytes.
    pub fn from_raw_parts(signing: [u8; 32], agreement: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&signing),
            agreement: XStaticSecret::from(agreement),
        }
    }

    /// Raw bytes suitable for resealing. Zeroized by the caller once used.
    pub fn to_raw_parts(&self) -> ([u8; 32], [u8; 32]) {
        (self.signing.to_bytes(), self.agreement.to_bytes())
    }

    pub fn public(&self) -> PublicKeys {
        PublicKeys {
            sign: self.signing.verifying_key().to_bytes(),
            agreement: XPublicKey::from(&self.agreement).to_bytes(),
        }
    }

    /// `sign(private_key, bytes) -> signature`. Deterministic per
    /// (key, message): Ed25519 signatures carry no randomness.
    pub fn sign(&self, bytes: &[u8]) -> SignedMessage {
        SignedMessage(self.signing.sign(bytes).to_bytes())
    }

    /// `box(recipient_public_key, sender_private_key, plaintext) ->
    /// (nonce, ciphertext)`, authenticated with XChaCha20-Poly1305 over
    /// an X25519 shared secret.
    pub fn seal_box(
        &self,
        recipient: &PublicKeys,
        plaintext: &[u8],
    ) -> Result<BoxedMessage, IdentityError> {
        let shared = self
            .agreement
            .diffie_hellman(&XPublicKey::from(recipient.agreement));
        let cipher = XChaCha20Poly1305::new(AeadKey::from_slice(shared.as_bytes()));
        let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| IdentityError::SealFailure)?;
        Ok(BoxedMessage {
            nonce: nonce.into(),
            ciphertext,
        })
    }
}

/// `verify(public_key, bytes, signature) -> bool`.
pub fn verify(public_key: &[u8; 32], bytes: &[u8], signature: &SignedMessage) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Ed25519Signature::from_bytes(&signature.0);
    key.verify(bytes, &sig).is_ok()
}

impl Keypair {
    /// `unbox(sender_public_key, recipient_private_key, nonce,
    /// ciphertext) -> plaintext or failure`. Any bit flip in ciphertext
    /// or tag fails authentication rather than yielding garbage
    /// plaintext (non-malleability).
    pub fn open_box(
        &self,
        sender: &PublicKeys,
        boxed: &BoxedMessage,
    ) -> Result<Vec<u8>, IdentityError> {
        let shared = self
            .agreement
            .diffie_hellman(&XPublicKey::from(sender.agreement));
        let cipher = XChaCha20Poly1305::new(AeadKey::from_slice(shared.as_bytes()));
        let nonce = XNonce::from_slice(&boxed.nonce);
        cipher
            .decrypt(nonce, boxed.ciphertext.as_slice())
            .map_err(|_| IdentityError::SealFailure)
    }
}

/// Work-factor tunable passphrase KDF (Argon2id), producing a 32-byte
/// symmetric key for the sealed identity blob's AEAD.
pub struct PassphraseKey([u8; 32]);

impl PassphraseKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for PassphraseKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Length in bytes of the random salt stored alongside a sealed blob.
pub const SALT_LEN: usize = 16;

/// Derives a symmetric key from a passphrase and salt. `work_factor`
/// scales Argon2's memory cost linearly (KiB); callers pick a value
/// appropriate to the deployment's weakest hardware (§6
/// `key_derivation_work_factor`).
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN], work_factor: u32) -> PassphraseKey {
    use argon2::{Algorithm, Argon2, Params, Version};
    let mem_cost = work_factor.max(8 * 1024);
    let params = Params::new(mem_cost, 3, 1, Some(32)).expect("valid argon2 params");
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut out)
        .expect("argon2 hashing never fails for fixed-size output");
    PassphraseKey(out)
}

/// Generates a fresh random salt for a new sealed blob.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trips() {
        let kp = Keypair::generate();
        let msg = b"drill available";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public().sign, msg, &sig));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"original");
        assert!(!verify(&kp.public().sign, b"tampered", &sig));
    }

    #[test]
    fn box_round_trips_between_two_keypairs() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let boxed = alice.seal_box(&bob.public(), b"saw needed").unwrap();
        let opened = bob.open_box(&alice.public(), &boxed).unwrap();
        assert_eq!(opened, b"saw needed");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut boxed = alice.seal_box(&bob.public(), b"hello").unwrap();
        boxed.ciphertext[0] ^= 0xff;
        assert!(bob.open_box(&alice.public(), &boxed).is_err());
    }

    #[test]
    fn derive_key_is_deterministic_for_same_salt() {
        let salt = [1u8; SALT_LEN];
        let a = derive_key("correct horse", &salt, 8 * 1024);
        let b = derive_key("correct horse", &salt, 8 * 1024);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
