//! Identifier types (§9 REDESIGN FLAGS: "string-typed identifiers
//! everywhere" — the type system, not string comparison, forbids
//! mixing a record id with a change hash with a bundle id).

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A globally unique, non-sequential record identifier (§3).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RecordId([u8; 16]);

impl RecordId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The content hash of a single [`crate::change::Change`]. Two distinct
/// changes never share a hash (§3 invariant); this is enforced by
/// hashing the change's canonical encoding with BLAKE3.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ChangeHash([u8; 32]);

impl ChangeHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_content_hashes_to_distinct_hash() {
        assert_ne!(ChangeHash::of(b"a"), ChangeHash::of(b"b"));
    }

    #[test]
    fn record_ids_are_not_sequential() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
    }
}
