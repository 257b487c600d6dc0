use thiserror::Error;

/// Failure modes of the secure session layer (§4.7, §7).
#[derive(Debug, Error)]
pub enum SessionError {
    /// An encrypted inbound message arrived from a peer whose public
    /// key has never been observed.
    #[error("unknown peer key")]
    UnknownPeerKey,

    /// Signature verification failed.
    #[error("bad signature")]
    BadSignature,

    /// The envelope's timestamp is outside the configured skew window.
    #[error("stale timestamp")]
    StaleTimestamp,

    /// The peer is quarantined after a key-substitution attempt and
    /// its traffic is ignored until an operator clears it (§4.7).
    #[error("peer is quarantined")]
    Quarantined,

    /// A peer's key changed since it was first observed (§4.7, §8
    /// property 5). The peer is moved to quarantine as a side effect.
    #[error("key conflict for previously-known peer")]
    KeyConflict,

    /// The envelope bytes did not parse as a recognized wire format.
    #[error("malformed envelope")]
    MalformedEnvelope,

    #[error(transparent)]
    Identity(#[from] aidmesh_identity::IdentityError),
}
