//! The mesh message: its fields (§3 "Mesh message") and its bit-exact
//! wire format (§6 "Mesh message wire format").

use crate::error::MeshError;
use crate::id::MessageId;
use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};

/// §3 "Mesh message...type (one of: announce, sync-request,
/// sync-response, data, bundle, ping, pong)".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Announce = 0,
    SyncRequest = 1,
    SyncResponse = 2,
    Data = 3,
    Bundle = 4,
    Ping = 5,
    Pong = 6,
}

impl MessageType {
    fn from_tag(tag: u8) -> Result<Self, MeshError> {
        Ok(match tag {
            0 => MessageType::Announce,
            1 => MessageType::SyncRequest,
            2 => MessageType::SyncResponse,
            3 => MessageType::Data,
            4 => MessageType::Bundle,
            5 => MessageType::Ping,
            6 => MessageType::Pong,
            other => return Err(MeshError::UnknownMessageType(other)),
        })
    }
}

/// A mesh message (§3, §6). `destination` absent means broadcast.
#[derive(Clone, Debug)]
pub struct MeshMessage {
    pub id: MessageId,
    pub message_type: MessageType,
    pub source: PeerId,
    pub destination: Option<PeerId>,
    pub timestamp_millis: u64,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

impl MeshMessage {
    pub fn new(
        message_type: MessageType,
        source: PeerId,
        destination: Option<PeerId>,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            message_type,
            source,
            destination,
            timestamp_millis: crate::now_millis(),
            ttl,
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }

    /// A copy of this message with `ttl` decremented by one, for
    /// relaying (§4.5 "Routing").
    pub fn relayed(&self) -> Self {
        let mut copy = self.clone();
        copy.ttl = copy.ttl.saturating_sub(1);
        copy
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.payload.len());
        out.push(self.message_type as u8);
        out.extend_from_slice(self.id.as_bytes());
        let source_bytes = self.source.public_key_bytes();
        out.push(source_bytes.len() as u8);
        out.extend_from_slice(&source_bytes);
        match &self.destination {
            Some(dest) => {
                let dest_bytes = dest.public_key_bytes();
                out.push(dest_bytes.len() as u8);
                out.extend_from_slice(&dest_bytes);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&self.timestamp_millis.to_be_bytes());
        out.push(self.ttl);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        let mut cursor = 0usize;
        let tag = *bytes.first().ok_or(MeshError::MalformedFrame)?;
        let message_type = MessageType::from_tag(tag)?;
        cursor += 1;

        let id_bytes: [u8; 16] = bytes
            .get(cursor..cursor + 16)
            .ok_or(MeshError::MalformedFrame)?
            .try_into()
            .map_err(|_| MeshError::MalformedFrame)?;
        let id = MessageId::from_bytes(id_bytes);
        cursor += 16;

        let source = read_peer_id(bytes, &mut cursor)?;
        let destination = read_optional_peer_id(bytes, &mut cursor)?;

        let ts_bytes = bytes
            .get(cursor..cursor + 8)
            .ok_or(MeshError::MalformedFrame)?;
        let timestamp_millis = u64::from_be_bytes(ts_bytes.try_into().unwrap());
        cursor += 8;

        let ttl = *bytes.get(cursor).ok_or(MeshError::MalformedFrame)?;
        cursor += 1;

        let len_bytes = bytes
            .get(cursor..cursor + 4)
            .ok_or(MeshError::MalformedFrame)?;
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        cursor += 4;

        let payload = bytes
            .get(cursor..cursor + len)
            .ok_or(MeshError::MalformedFrame)?
            .to_vec();

        Ok(Self {
            id,
            message_type,
            source,
            destination,
            timestamp_millis,
            ttl,
            payload,
        })
    }
}

fn read_peer_id(bytes: &[u8], cursor: &mut usize) -> Result<PeerId, MeshError> {
    let len = *bytes.get(*cursor).ok_or(MeshError::MalformedFrame)? as usize;
    *cursor += 1;
    let raw = bytes
        .get(*cursor..*cursor + len)
        .ok_or(MeshError::MalformedFrame)?;
    *cursor += len;
    let key: [u8; 32] = raw.try_into().map_err(|_| MeshError::MalformedFrame)?;
    Ok(PeerId::from_public_key_bytes(key))
}

fn read_optional_peer_id(bytes: &[u8], cursor: &mut usize) -> Result<Option<PeerId>, MeshError> {
    let len = *bytes.get(*cursor).ok_or(MeshError::MalformedFrame)? as usize;
    if len == 0 {
        *cursor += 1;
        return Ok(None);
    }
    read_peer_id(bytes, cursor).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_identity::PeerId;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    #[test]
    fn broadcast_message_round_trips() {
        let msg = MeshMessage::new(MessageType::Announce, peer(1), None, 8, b"hi".to_vec());
        let bytes = msg.encode();
        let decoded = MeshMessage::decode(&bytes).unwrap();
        assert!(decoded.is_broadcast());
        assert_eq!(decoded.payload, b"hi");
        assert_eq!(decoded.ttl, 8);
    }

    #[test]
    fn directed_message_round_trips() {
        let msg = MeshMessage::new(
            MessageType::Data,
            peer(1),
            Some(peer(2)),
            4,
            vec![1, 2, 3],
        );
        let bytes = msg.encode();
        let decoded = MeshMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.destination, Some(peer(2)));
    }

    #[test]
    fn relay_decrements_ttl() {
        let msg = MeshMessage::new(MessageType::Data, peer(1), None, 4, vec![]);
        let relayed = msg.relayed();
        assert_eq!(relayed.ttl, 3);
        assert_eq!(relayed.id, msg.id);
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        assert!(matches!(
            MeshMessage::decode(&[0u8; 3]),
            Err(MeshError::MalformedFrame)
        ));
    }
}
