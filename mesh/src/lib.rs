//! Multi-transport mesh network (C5, §4.4-§4.5): adapters abstract
//! BLE-class, WebRTC-class/local-network, and LoRa-class transports
//! behind one interface; the manager owns the peer table, runs the
//! announce/sync protocol, and routes messages with TTL and loop
//! suppression.

mod adapter;
pub mod adapters;
mod error;
mod id;
mod manager;
mod message;
mod payload;
mod peer;
mod seen_cache;

pub use crate::adapter::{AdapterEvent, AdapterHandle, AdapterKind, AdapterStatus, Link, LinkEvent, TransportAdapter};
pub use crate::error::MeshError;
pub use crate::id::MessageId;
pub use crate::manager::{MeshConfig, MeshManager};
pub use crate::message::{MeshMessage, MessageType};
pub use crate::payload::{AnnouncePayload, SyncRequestPayload, SyncResponsePayload};
pub use crate::peer::{Peer, PeerTable};
pub use crate::seen_cache::SeenCache;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn decode_envelope(bytes: &[u8]) -> Result<aidmesh_session::Envelope, MeshError> {
    Ok(aidmesh_session::Envelope::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{memory_link::MemoryNetwork, LocalNetAdapter};
    use aidmesh_crdt::Document;
    use aidmesh_identity::Identity;
    use aidmesh_session::{SecureSession, TrustMode};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn node(network: &Arc<MemoryNetwork>) -> MeshManager {
        let identity = Arc::new(Identity::ephemeral());
        let document = Document::in_memory(identity.id());
        let session = Arc::new(SecureSession::new(identity.clone(), TrustMode::Tofu, 60_000));
        let manager = MeshManager::new(identity.clone(), document, session, MeshConfig::default());
        let link = Arc::new(network.join(identity.id()));
        let (adapter, events) = LocalNetAdapter::new(link);
        manager
            .register_adapter(AdapterHandle {
                adapter: Arc::new(adapter),
                events,
            })
            .await
            .unwrap();
        manager
    }

    #[tokio::test]
    async fn announce_establishes_trust_between_two_nodes() {
        let network = MemoryNetwork::new();
        let alice = node(&network).await;
        let bob = node(&network).await;

        alice.broadcast_announce(vec!["resource-offer".into()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(bob
            .peer_table_snapshot()
            .iter()
            .any(|p| p.id == alice.local_peer_id() && p.trusted));
    }

    #[tokio::test]
    async fn directed_data_is_delivered_to_the_right_peer() {
        let network = MemoryNetwork::new();
        let alice = node(&network).await;
        let bob = node(&network).await;

        alice.broadcast_announce(vec![]).await.unwrap();
        bob.broadcast_announce(vec![]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        bob.on_data(move |_peer, bytes| received_clone.lock().unwrap().push(bytes));

        alice
            .send_directed(bob.local_peer_id(), b"need: water".to_vec(), true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[b"need: water".to_vec()]);
    }

    #[tokio::test]
    async fn undeliverable_send_invokes_callback() {
        let network = MemoryNetwork::new();
        let alice = node(&network).await;
        let stranger = aidmesh_identity::Identity::ephemeral().id();

        let handed_off = Arc::new(Mutex::new(false));
        let handed_off_clone = handed_off.clone();
        alice.on_undeliverable(move |_peer, _payload| *handed_off_clone.lock().unwrap() = true);

        let result = alice.send_directed(stranger, b"hi".to_vec(), true).await;
        assert!(result.is_err());
        assert!(*handed_off.lock().unwrap());
    }
}
