use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const METHOD_TAG: &str = "ed25519";

/// A self-certifying peer identifier: `<method-tag>:<base58 public key>`.
///
/// Derived purely from the signing public key, so verifying that a
/// message was signed by the matching private key *is* verifying that it
/// came from the peer named by this id — no registry required.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Reconstructs a peer id from a raw signing public key, e.g. one
    /// read off the wire by a transport adapter. Constructing a
    /// `PeerId` this way does not imply the key has been verified to
    /// belong to any particular message — callers still need to run it
    /// through the normal signature-verification path.
    pub fn from_public_key_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw Ed25519 public key bytes this id was derived from.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", METHOD_TAG, bs58::encode(self.0).into_string())
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, encoded) = s
            .split_once(':')
            .ok_or_else(|| IdentityError::MalformedPeerId(s.to_owned()))?;
        if tag != METHOD_TAG {
            return Err(IdentityError::MalformedPeerId(s.to_owned()));
        }
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| IdentityError::MalformedPeerId(s.to_owned()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::MalformedPeerId(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let id = PeerId::from_public_key_bytes([7; 32]);
        let printed = id.to_string();
        assert!(printed.starts_with("ed25519:"));
        assert_eq!(printed.parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn rejects_foreign_tags() {
        assert!("near:abcd".parse::<PeerId>().is_err());
        assert!("garbage".parse::<PeerId>().is_err());
    }
}
