use crate::crypto::{BoxedMessage, Keypair, PublicKeys, SignedMessage};
use crate::error::IdentityError;
use crate::peer_id::PeerId;
use crate::sealed::SealedIdentity;

/// A node's local identity (§4.3): a keypair plus the self-certifying
/// [`PeerId`] derived from it. The private key material never leaves
/// this type — callers ask it to sign, box, or unbox on their behalf.
pub struct Identity {
    keypair: Keypair,
    id: PeerId,
    display_name: Option<String>,
}

impl Identity {
    /// Generates a brand-new identity.
    pub fn generate(display_name: Option<String>) -> Self {
        let keypair = Keypair::generate();
        let id = PeerId::from_public_key_bytes(keypair.public().sign);
        Self {
            keypair,
            id,
            display_name,
        }
    }

    /// A throwaway identity for tests and fixtures. Never compiled into
    /// a production build: production code always loads an identity
    /// through [`Identity::unseal`] from a passphrase-protected blob.
    #[cfg(any(test, feature = "test-support"))]
    pub fn ephemeral() -> Self {
        Self::generate(None)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn public_keys(&self) -> PublicKeys {
        self.keypair.public()
    }

    pub fn sign(&self, bytes: &[u8]) -> SignedMessage {
        self.keypair.sign(bytes)
    }

    pub fn seal_box(
        &self,
        recipient: &PublicKeys,
        plaintext: &[u8],
    ) -> Result<BoxedMessage, IdentityError> {
        self.keypair.seal_box(recipient, plaintext)
    }

    pub fn open_box(
        &self,
        sender: &PublicKeys,
        boxed: &BoxedMessage,
    ) -> Result<Vec<u8>, IdentityError> {
        self.keypair.open_box(sender, boxed)
    }

    /// Seals this identity under a passphrase, ready to write to
    /// `identity.sealed` (§6). `work_factor` is the Argon2 memory cost
    /// in KiB; see [`crate::sealed`] for the on-disk layout.
    pub fn seal(&self, passphrase: &str, work_factor: u32) -> SealedIdentity {
        SealedIdentity::seal(&self.keypair, self.display_name.clone(), passphrase, work_factor)
    }

    /// Loads an identity from a sealed blob. Fails uniformly with
    /// [`IdentityError::BadPassphrase`] on any decryption failure,
    /// regardless of cause (§4.3).
    pub fn unseal(sealed: &SealedIdentity, passphrase: &str) -> Result<Self, IdentityError> {
        let (keypair, display_name) = sealed.unseal(passphrase)?;
        let id = PeerId::from_public_key_bytes(keypair.public().sign);
        Ok(Self {
            keypair,
            id,
            display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_unseal_round_trips_identity() {
        let identity = Identity::generate(Some("Alice".into()));
        let sealed = identity.seal("correct horse battery staple", 8 * 1024);
        let reloaded = Identity::unseal(&sealed, "correct horse battery staple").unwrap();
        assert_eq!(reloaded.id(), identity.id());
        assert_eq!(reloaded.display_name(), Some("Alice"));
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let identity = Identity::generate(None);
        let sealed = identity.seal("correct passphrase", 8 * 1024);
        let err = Identity::unseal(&sealed, "wrong passphrase").unwrap_err();
        assert!(matches!(err, IdentityError::BadPassphrase));
    }
}
