//! At-rest identity sealing (§3 "Identity bundle", §4.3, §6
//! `identity.sealed`).
//!
//! The blob is never the raw keypair: it is always passphrase-sealed
//! with an AEAD keyed by an Argon2id-derived key, so a copied file is
//! useless without the passphrase. There is no plaintext export path
//! (Open Question resolution, §9 / SPEC_FULL §4.3).

use crate::crypto::{self, Keypair, NONCE_LEN, SALT_LEN};
use crate::error::IdentityError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key as AeadKey, XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

const BLOB_MAGIC: u32 = 0xA1D_1D01;

#[derive(Serialize, Deserialize)]
struct Plaintext {
    signing: [u8; 32],
    agreement: [u8; 32],
    display_name: Option<String>,
}

/// A passphrase-sealed identity blob, as written to `identity.sealed`.
#[derive(Clone, Serialize, Deserialize)]
pub struct SealedIdentity {
    magic: u32,
    salt: [u8; SALT_LEN],
    work_factor: u32,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SealedIdentity {
    pub(crate) fn seal(
        keypair: &Keypair,
        display_name: Option<String>,
        passphrase: &str,
        work_factor: u32,
    ) -> Self {
        let salt = crypto::random_salt();
        let key = crypto::derive_key(passphrase, &salt, work_factor);
        let (signing, agreement) = keypair.to_raw_parts();
        let plaintext = Plaintext {
            signing,
            agreement,
            display_name,
        };
        let plaintext_bytes =
            bincode::serialize(&plaintext).expect("identity plaintext always serializes");
        let cipher = XChaCha20Poly1305::new(AeadKey::from_slice(key.as_bytes()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext_bytes.as_slice())
            .expect("encryption with a fresh nonce never fails");
        Self {
            magic: BLOB_MAGIC,
            salt,
            work_factor,
            nonce: nonce_bytes,
            ciphertext,
        }
    }

    pub(crate) fn unseal(
        &self,
        passphrase: &str,
    ) -> Result<(Keypair, Option<String>), IdentityError> {
        if self.magic != BLOB_MAGIC {
            return Err(IdentityError::CorruptBlob);
        }
        let key = crypto::derive_key(passphrase, &self.salt, self.work_factor);
        let cipher = XChaCha20Poly1305::new(AeadKey::from_slice(key.as_bytes()));
        let nonce = XNonce::from_slice(&self.nonce);
        let plaintext_bytes = cipher
            .decrypt(nonce, self.ciphertext.as_slice())
            .map_err(|_| IdentityError::BadPassphrase)?;
        let plaintext: Plaintext = bincode::deserialize(&plaintext_bytes)
            .map_err(|_| IdentityError::BadPassphrase)?;
        let keypair = Keypair::from_raw_parts(plaintext.signing, plaintext.agreement);
        Ok((keypair, plaintext.display_name))
    }

    /// Serializes the blob for writing to `identity.sealed`.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("sealed identity always serializes")
    }

    /// Parses a blob previously written by [`SealedIdentity::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let sealed: Self = bincode::deserialize(bytes).map_err(|_| IdentityError::CorruptBlob)?;
        if sealed.magic != BLOB_MAGIC {
            return Err(IdentityError::CorruptBlob);
        }
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn blob_bytes_round_trip() {
        let identity = Identity::generate(Some("Bea".into()));
        let sealed = identity.seal("hunter2", 8 * 1024);
        let bytes = sealed.to_bytes();
        let reloaded = SealedIdentity::from_bytes(&bytes).unwrap();
        let reopened = Identity::unseal(&reloaded, "hunter2").unwrap();
        assert_eq!(reopened.id(), identity.id());
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let identity = Identity::generate(None);
        let mut bytes = identity.seal("pw", 8 * 1024).to_bytes();
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            SealedIdentity::from_bytes(&bytes),
            Err(IdentityError::CorruptBlob)
        ));
    }
}
