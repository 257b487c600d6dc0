use thiserror::Error;

/// Failure modes of the mesh manager and its adapters (§4.4, §4.5, §7).
#[derive(Debug, Error)]
pub enum MeshError {
    /// A received frame did not parse as a [`crate::message::MeshMessage`].
    #[error("malformed mesh frame")]
    MalformedFrame,

    /// A received frame's type tag is not one this version understands.
    #[error("unknown message type tag: {0}")]
    UnknownMessageType(u8),

    /// An adapter `send` did not complete before its deadline (§5).
    #[error("adapter send timed out")]
    SendTimeout,

    /// An adapter reported a transient failure for a single send
    /// attempt (§4.4 "do not retry"; §7 "Transient transport").
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// No adapter can currently reach the requested peer.
    #[error("no route to peer")]
    NoRoute,

    #[error(transparent)]
    Session(#[from] aidmesh_session::SessionError),
}
