use thiserror::Error;

/// Failure modes of the document store (§4.1, §7).
#[derive(Debug, Error)]
pub enum DocError {
    /// `import_snapshot` detected a mismatched integrity check.
    #[error("corrupt snapshot")]
    CorruptSnapshot,

    /// The persistent backing store could not accept a commit.
    #[error("storage exhausted")]
    StorageExhausted,

    /// A field update in the batch violated a registered per-type
    /// invariant; the whole batch is aborted (atomicity, §4.1).
    #[error("conflict in invariant: {0}")]
    ConflictInInvariant(String),

    /// The requested record does not exist.
    #[error("no such record: {0:?}/{1}")]
    NoSuchRecord(crate::record::RecordKind, crate::id::RecordId),

    #[error("storage io error: {0}")]
    Io(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Encoding(#[from] bincode::Error),
}
