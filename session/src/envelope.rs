//! The signed/encrypted envelope wire formats (§6): what actually
//! travels as a mesh message's payload once the secure session layer
//! has wrapped it.
//!
//! Signed envelope: `length-prefixed payload || 8-byte timestamp ||
//! 64-byte signature`. Encrypted envelope additionally carries a
//! 24-byte nonce ahead of the (already tag-authenticated) ciphertext.

use crate::error::SessionError;
use aidmesh_identity::{BoxedMessage, SignedMessage};

const TIMESTAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 64;
const NONCE_LEN: usize = 24;

/// A signed, optionally encrypted, envelope ready to be handed to the
/// mesh manager as a message payload (§4.7).
pub enum Envelope {
    /// Broadcast/discoverable messages: signed, payload in the clear
    /// so any peer can participate (§4.7).
    Signed {
        payload: Vec<u8>,
        timestamp_millis: u64,
        signature: SignedMessage,
    },
    /// Directed, user-private messages: authenticated-encrypted to the
    /// recipient, then the box itself is signed (§4.7 steps 1-3).
    Encrypted {
        boxed: BoxedMessage,
        timestamp_millis: u64,
        signature: SignedMessage,
    },
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn take_len_prefixed<'a>(bytes: &'a [u8], cursor: &mut usize) -> Result<&'a [u8], SessionError> {
    let len_bytes = bytes
        .get(*cursor..*cursor + 4)
        .ok_or(SessionError::MalformedEnvelope)?;
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    *cursor += 4;
    let slice = bytes
        .get(*cursor..*cursor + len)
        .ok_or(SessionError::MalformedEnvelope)?;
    *cursor += len;
    Ok(slice)
}

impl Envelope {
    pub fn timestamp_millis(&self) -> u64 {
        match self {
            Envelope::Signed { timestamp_millis, .. } => *timestamp_millis,
            Envelope::Encrypted { timestamp_millis, .. } => *timestamp_millis,
        }
    }

    /// The bytes that were signed: for a signed envelope that is the
    /// plaintext payload; for an encrypted one it is the box's nonce
    /// and ciphertext concatenated, per §4.7 step 2
    /// `(box || sender_id || timestamp)` minus the caller-supplied
    /// sender id and timestamp, which [`crate::session`] appends.
    pub fn signed_bytes(&self) -> Vec<u8> {
        match self {
            Envelope::Signed { payload, .. } => payload.clone(),
            Envelope::Encrypted { boxed, .. } => {
                let mut out = Vec::with_capacity(NONCE_LEN + boxed.ciphertext.len());
                out.extend_from_slice(&boxed.nonce);
                out.extend_from_slice(&boxed.ciphertext);
                out
            }
        }
    }

    /// Encodes this envelope to the wire format of §6.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Envelope::Signed {
                payload,
                timestamp_millis,
                signature,
            } => {
                let mut out = Vec::with_capacity(4 + payload.len() + TIMESTAMP_LEN + SIGNATURE_LEN + 1);
                out.push(0); // tag: signed
                push_len_prefixed(&mut out, payload);
                out.extend_from_slice(&timestamp_millis.to_be_bytes());
                out.extend_from_slice(&signature.0);
                out
            }
            Envelope::Encrypted {
                boxed,
                timestamp_millis,
                signature,
            } => {
                let mut out = Vec::with_capacity(
                    1 + NONCE_LEN + 4 + boxed.ciphertext.len() + TIMESTAMP_LEN + SIGNATURE_LEN,
                );
                out.push(1); // tag: encrypted
                out.extend_from_slice(&boxed.nonce);
                push_len_prefixed(&mut out, &boxed.ciphertext);
                out.extend_from_slice(&timestamp_millis.to_be_bytes());
                out.extend_from_slice(&signature.0);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        let (tag, rest) = bytes.split_first().ok_or(SessionError::MalformedEnvelope)?;
        match tag {
            0 => {
                let mut cursor = 0usize;
                let payload = take_len_prefixed(rest, &mut cursor)?.to_vec();
                let timestamp_bytes = rest
                    .get(cursor..cursor + TIMESTAMP_LEN)
                    .ok_or(SessionError::MalformedEnvelope)?;
                let timestamp_millis = u64::from_be_bytes(timestamp_bytes.try_into().unwrap());
                cursor += TIMESTAMP_LEN;
                let sig_bytes = rest
                    .get(cursor..cursor + SIGNATURE_LEN)
                    .ok_or(SessionError::MalformedEnvelope)?;
                let mut sig = [0u8; SIGNATURE_LEN];
                sig.copy_from_slice(sig_bytes);
                Ok(Envelope::Signed {
                    payload,
                    timestamp_millis,
                    signature: SignedMessage(sig),
                })
            }
            1 => {
                let nonce_bytes = rest.get(0..NONCE_LEN).ok_or(SessionError::MalformedEnvelope)?;
                let mut nonce = [0u8; NONCE_LEN];
                nonce.copy_from_slice(nonce_bytes);
                let mut cursor = NONCE_LEN;
                let ciphertext = take_len_prefixed(rest, &mut cursor)?.to_vec();
                let timestamp_bytes = rest
                    .get(cursor..cursor + TIMESTAMP_LEN)
                    .ok_or(SessionError::MalformedEnvelope)?;
                let timestamp_millis = u64::from_be_bytes(timestamp_bytes.try_into().unwrap());
                cursor += TIMESTAMP_LEN;
                let sig_bytes = rest
                    .get(cursor..cursor + SIGNATURE_LEN)
                    .ok_or(SessionError::MalformedEnvelope)?;
                let mut sig = [0u8; SIGNATURE_LEN];
                sig.copy_from_slice(sig_bytes);
                Ok(Envelope::Encrypted {
                    boxed: BoxedMessage { nonce, ciphertext },
                    timestamp_millis,
                    signature: SignedMessage(sig),
                })
            }
            _ => Err(SessionError::MalformedEnvelope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_envelope_round_trips() {
        let envelope = Envelope::Signed {
            payload: b"announce".to_vec(),
            timestamp_millis: 1234,
            signature: SignedMessage([7u8; 64]),
        };
        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.timestamp_millis(), 1234);
        assert_eq!(decoded.signed_bytes(), b"announce".to_vec());
    }

    #[test]
    fn encrypted_envelope_round_trips() {
        let envelope = Envelope::Encrypted {
            boxed: BoxedMessage {
                nonce: [3u8; NONCE_LEN],
                ciphertext: vec![1, 2, 3, 4],
            },
            timestamp_millis: 99,
            signature: SignedMessage([5u8; 64]),
        };
        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded.timestamp_millis(), 99);
    }

    #[test]
    fn truncated_bytes_are_malformed() {
        let bytes = vec![0u8, 1, 2];
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(SessionError::MalformedEnvelope)
        ));
    }
}
