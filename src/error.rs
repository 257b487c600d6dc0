use thiserror::Error;

/// Top-level error type for the Bridge API (§4.9, §7): wraps every
/// component crate's error via `#[from]` so a caller of [`crate::Node`]
/// never has to name a component crate directly.
#[derive(Debug, Error)]
pub enum AidmeshError {
    #[error(transparent)]
    Document(#[from] aidmesh_crdt::DocError),

    #[error(transparent)]
    Identity(#[from] aidmesh_identity::IdentityError),

    #[error(transparent)]
    Session(#[from] aidmesh_session::SessionError),

    #[error(transparent)]
    Mesh(#[from] aidmesh_mesh::MeshError),

    #[error(transparent)]
    Dtn(#[from] aidmesh_dtn::DtnError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
