use thiserror::Error;

/// Failure modes of the bundle layer (§4.6, §7).
#[derive(Debug, Error)]
pub enum DtnError {
    /// The bundle store's persistent backing rejected a write (§7
    /// "Storage").
    #[error(transparent)]
    Storage(#[from] sled::Error),

    #[error(transparent)]
    Encoding(#[from] bincode::Error),

    /// A received bundle frame did not parse (§6 "Bundle wire format").
    #[error("malformed bundle frame")]
    MalformedFrame,

    /// `submit` was called with an expiry already in the past.
    #[error("bundle already expired at submission")]
    AlreadyExpired,

    /// The bundle store is over its configured byte budget and the
    /// submission's priority is not high enough to be admitted under
    /// degraded conditions (§5 "Memory budget").
    #[error("bundle store over budget, priority {0:?} rejected")]
    BudgetExceeded(crate::bundle::Priority),

    #[error(transparent)]
    Mesh(#[from] aidmesh_mesh::MeshError),
}
