use thiserror::Error;

/// Failure modes for identity and crypto operations (§4.2, §4.3, §7).
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The sealed blob failed to decrypt. Deliberately uninformative: a
    /// wrong passphrase, truncated ciphertext and a bit-flipped tag all
    /// surface identically so timing and error shape never leak which
    /// one happened.
    #[error("bad passphrase")]
    BadPassphrase,

    /// Signature verification failed.
    #[error("bad signature")]
    BadSignature,

    /// Authenticated encryption/decryption failed (wrong key, or the
    /// ciphertext/tag was tampered with).
    #[error("box authentication failed")]
    SealFailure,

    /// A peer identifier did not parse as `<method-tag>:<base58 pubkey>`.
    #[error("malformed peer id: {0}")]
    MalformedPeerId(String),

    /// The sealed blob's on-disk framing was not recognized.
    #[error("corrupt identity blob")]
    CorruptBlob,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
