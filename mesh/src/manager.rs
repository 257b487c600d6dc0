//! The mesh manager (C5, §4.5): owns the adapters and the peer table,
//! runs the sync protocol, and routes messages with TTL and loop
//! suppression.

use crate::adapter::{AdapterEvent, AdapterHandle, AdapterKind, TransportAdapter};
use crate::error::MeshError;
use crate::message::{MeshMessage, MessageType};
use crate::payload::{AnnouncePayload, SyncRequestPayload, SyncResponsePayload};
use crate::peer::PeerTable;
use crate::seen_cache::SeenCache;
use aidmesh_crdt::Document;
use aidmesh_identity::{Identity, PeerId};
use aidmesh_session::{Observation, SecureSession};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// §6 configuration recognized by the mesh manager.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// Default hop count for directed mesh messages (§6 `message_ttl`).
    pub message_ttl: u8,
    /// Idleness threshold before a peer is evicted (§6
    /// `peer_idle_eviction_ms`).
    pub peer_idle_eviction_ms: u64,
    /// Deadline for a single adapter send / sync exchange (§6
    /// `sync_deadline_ms`, generalized to all adapter ops per §5).
    pub deadline_ms: u64,
    /// Seen-id cache capacity (§4.5 "bounded LRU").
    pub seen_cache_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            message_ttl: 8,
            peer_idle_eviction_ms: 10 * 60 * 1000,
            deadline_ms: 10_000,
            seen_cache_capacity: 4096,
        }
    }
}

type DataCallback = Box<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;
type UndeliverableCallback = Box<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;
type PeerContactCallback = Box<dyn Fn(PeerId) + Send + Sync>;

struct State {
    adapters: HashMap<AdapterKind, Arc<dyn TransportAdapter>>,
    peers: PeerTable,
    seen: SeenCache,
    on_data: Vec<DataCallback>,
    on_bundle: Vec<DataCallback>,
    on_undeliverable: Vec<UndeliverableCallback>,
    on_peer_contact: Vec<PeerContactCallback>,
}

/// The mesh manager handle (§4.5). Cheaply cloneable; clones share the
/// same adapter set, peer table, and document.
#[derive(Clone)]
pub struct MeshManager {
    identity: Arc<Identity>,
    document: Document,
    session: Arc<SecureSession>,
    config: MeshConfig,
    state: Arc<SyncMutex<State>>,
}

impl MeshManager {
    pub fn new(
        identity: Arc<Identity>,
        document: Document,
        session: Arc<SecureSession>,
        config: MeshConfig,
    ) -> Self {
        let seen = SeenCache::new(config.seen_cache_capacity);
        Self {
            identity,
            document,
            session,
            config,
            state: Arc::new(SyncMutex::new(State {
                adapters: HashMap::new(),
                peers: PeerTable::new(),
                seen,
                on_data: Vec::new(),
                on_bundle: Vec::new(),
                on_undeliverable: Vec::new(),
                on_peer_contact: Vec::new(),
            })),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.identity.id()
    }

    /// Registers an adapter and its event channel (§4.5 "Registers
    /// itself as observer on every adapter") and spawns the forwarding
    /// loop that drains it for the manager's lifetime.
    pub async fn register_adapter(&self, handle: AdapterHandle) -> Result<(), MeshError> {
        let AdapterHandle { adapter, mut events } = handle;
        let kind = adapter.kind();
        adapter.start().await?;
        self.state.lock().adapters.insert(kind, adapter);

        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.handle_adapter_event(kind, event).await;
            }
        });
        Ok(())
    }

    pub fn peer_table_snapshot(&self) -> Vec<crate::peer::Peer> {
        self.state.lock().peers.iter().cloned().collect()
    }

    pub fn on_data(&self, callback: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) {
        self.state.lock().on_data.push(Box::new(callback));
    }

    /// Registered by the DTN layer (§4.6 "the bundle layer then offers
    /// to exchange bundles"): receives the plaintext payload of every
    /// `bundle`-typed mesh message addressed to this node or its direct
    /// peer, point to point. Unlike `data`, bundle messages are never
    /// TTL-relayed by the mesh manager — propagation beyond one hop is
    /// the bundle layer's own store-carry-forward concern.
    pub fn on_bundle(&self, callback: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) {
        self.state.lock().on_bundle.push(Box::new(callback));
    }

    /// Registered by the layer above (outside this crate, to avoid a
    /// dependency cycle with the DTN crate) to convert an undeliverable
    /// directed payload into a bundle (§4.5 "Failure semantics", §5
    /// "the payload is converted into a bundle").
    pub fn on_undeliverable(&self, callback: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) {
        self.state.lock().on_undeliverable.push(Box::new(callback));
    }

    /// Registered by the DTN layer (§4.6 "`on_peer_contact(peer)` is
    /// called by C5 for every newly connected peer"): fired once a
    /// peer's announce has newly passed (or re-confirmed) trust, i.e.
    /// the point at which the manager considers the peer live enough to
    /// exchange a bundle summary with.
    pub fn on_peer_contact(&self, callback: impl Fn(PeerId) + Send + Sync + 'static) {
        self.state.lock().on_peer_contact.push(Box::new(callback));
    }

    /// Evicts idle peers (§3 "Lifecycles"). Intended to be driven by a
    /// periodic timer in the node's coordination loop (§5).
    pub fn evict_idle_peers(&self, now_millis: u64) -> Vec<PeerId> {
        let mut state = self.state.lock();
        state.peers.evict_idle(now_millis, self.config.peer_idle_eviction_ms)
    }

    /// Announces this node's presence and capabilities (§4.5 step 1).
    /// Call after a peer is newly discovered, or periodically.
    pub async fn broadcast_announce(&self, capabilities: Vec<String>) -> Result<(), MeshError> {
        let payload = AnnouncePayload {
            peer_id: self.identity.id(),
            capabilities,
            public_keys: self.identity.public_keys(),
        };
        self.broadcast(MessageType::Announce, payload.encode()).await
    }

    /// Broadcasts arbitrary application data to every reachable peer
    /// (§4.5 "Broadcast messages... delivered locally and forwarded").
    pub async fn broadcast(&self, message_type: MessageType, payload: Vec<u8>) -> Result<(), MeshError> {
        let envelope = self.session.wrap_broadcast(payload);
        let message = MeshMessage::new(
            message_type,
            self.identity.id(),
            None,
            self.config.message_ttl,
            envelope.encode(),
        );
        self.send_on_all_adapters(&message, None).await
    }

    /// Sends `payload` directly to `destination`, preferring the
    /// highest-bandwidth reachable adapter (§4.5 "Tie-breaks"). On
    /// adapter failure the payload is handed to any registered
    /// [`MeshManager::on_undeliverable`] callback rather than retried
    /// (§4.4, §4.5 "Failure semantics").
    pub async fn send_directed(
        &self,
        destination: PeerId,
        payload: Vec<u8>,
        encrypt: bool,
    ) -> Result<(), MeshError> {
        self.send_directed_typed(MessageType::Data, destination, payload, encrypt).await
    }

    /// As [`MeshManager::send_directed`], but lets the caller pick the
    /// mesh message type — used by the bundle layer to speak its
    /// contact-exchange sub-protocol over `bundle`-typed messages
    /// rather than `data` (§4.6).
    pub async fn send_directed_typed(
        &self,
        message_type: MessageType,
        destination: PeerId,
        payload: Vec<u8>,
        encrypt: bool,
    ) -> Result<(), MeshError> {
        let envelope = if encrypt {
            if !self.session.is_trusted(&destination) {
                self.hand_to_undeliverable(destination, payload);
                return Err(MeshError::NoRoute);
            }
            let keys = self.state.lock().peers.get(&destination).and_then(|p| p.public_keys);
            let Some(keys) = keys else {
                self.hand_to_undeliverable(destination, payload);
                return Err(MeshError::NoRoute);
            };
            self.session.wrap_directed(&keys, &payload)?
        } else {
            self.session.wrap_broadcast(payload.clone())
        };
        let message = MeshMessage::new(
            message_type,
            self.identity.id(),
            Some(destination),
            self.config.message_ttl,
            envelope.encode(),
        );

        let adapter = {
            let state = self.state.lock();
            state
                .peers
                .preferred_transport(&destination)
                .and_then(|kind| state.adapters.get(&kind).cloned())
        };
        let Some(adapter) = adapter else {
            self.hand_to_undeliverable(destination, payload);
            return Err(MeshError::NoRoute);
        };

        let result = timeout(
            Duration::from_millis(self.config.deadline_ms),
            adapter.send(&message, Some(destination)),
        )
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                tracing::warn!(peer = %destination, error = %err, "directed send failed, handing off to DTN");
                self.hand_to_undeliverable(destination, payload);
                Err(err)
            }
            Err(_) => {
                tracing::warn!(peer = %destination, "directed send timed out, handing off to DTN");
                self.hand_to_undeliverable(destination, payload);
                Err(MeshError::SendTimeout)
            }
        }
    }

    fn hand_to_undeliverable(&self, destination: PeerId, payload: Vec<u8>) {
        for callback in &self.state.lock().on_undeliverable {
            callback(destination, payload.clone());
        }
    }

    async fn send_on_all_adapters(
        &self,
        message: &MeshMessage,
        target: Option<PeerId>,
    ) -> Result<(), MeshError> {
        let adapters: Vec<_> = self.state.lock().adapters.values().cloned().collect();
        let mut last_err: Result<(), MeshError> = Ok(());
        for adapter in adapters {
            let result = timeout(
                Duration::from_millis(self.config.deadline_ms),
                adapter.send(message, target),
            )
            .await;
            if let Ok(Err(err)) = result {
                tracing::warn!(error = %err, "broadcast send failed on one adapter");
                last_err = Err(err);
            }
        }
        last_err
    }

    async fn handle_adapter_event(&self, kind: AdapterKind, event: AdapterEvent) {
        let now = crate::now_millis();
        match event {
            AdapterEvent::PeerFound { peer, signal_strength } => {
                let mut state = self.state.lock();
                let entry = state.peers.touch(peer, kind, now);
                entry.signal_strength = signal_strength;
                drop(state);
                let _ = self.broadcast_announce(Vec::new()).await;
            }
            AdapterEvent::PeerLost(peer) => {
                tracing::debug!(peer = %peer, "peer lost");
            }
            AdapterEvent::MessageReceived(message) => {
                self.handle_message(kind, message).await;
            }
        }
    }

    async fn handle_message(&self, kind: AdapterKind, message: MeshMessage) {
        let now = crate::now_millis();
        {
            let mut state = self.state.lock();
            if !state.seen.observe(message.id) {
                return; // §8 property 4: loop freedom.
            }
            state.peers.touch(message.source, kind, now);
        }

        match message.message_type {
            MessageType::Announce => self.handle_announce(kind, &message).await,
            MessageType::SyncRequest => self.handle_sync_request(&message).await,
            MessageType::SyncResponse => self.handle_sync_response(&message).await,
            MessageType::Data => self.handle_data(&message).await,
            MessageType::Bundle => self.deliver_or_relay(&message).await,
            MessageType::Ping | MessageType::Pong => {}
        }
    }

    async fn handle_announce(&self, kind: AdapterKind, message: &MeshMessage) {
        let envelope = match crate::decode_envelope(&message.payload) {
            Ok(e) => e,
            Err(_) => return,
        };
        // The announce payload is wrapped inside the already-verified
        // signed envelope only once we know which key to check it
        // against; peek at the plaintext to find it, then verify.
        let unverified_payload = match &envelope {
            aidmesh_session::Envelope::Signed { payload, .. } => payload.clone(),
            _ => return,
        };
        let Some(announce) = AnnouncePayload::decode(&unverified_payload) else {
            return;
        };
        if PeerId::from_public_key_bytes(announce.public_keys.sign) != announce.peer_id
            || announce.peer_id != message.source
        {
            return;
        }
        let Ok(verified_payload) = self.session.verify_with_keys(&announce.public_keys, &envelope) else {
            return;
        };
        if verified_payload != unverified_payload {
            return;
        }

        let observation = self.session.observe_announce(message.source, announce.public_keys);
        let mut state = self.state.lock();
        let now = crate::now_millis();
        let entry = state.peers.touch(message.source, kind, now);
        entry.public_keys = Some(announce.public_keys);
        let newly_contacted = matches!(observation, Observation::NewlyTrusted | Observation::Confirmed);
        match observation {
            Observation::NewlyTrusted | Observation::Confirmed => {
                state.peers.mark_trusted(&message.source);
            }
            Observation::KeyConflict => {
                tracing::warn!(peer = %message.source, "key conflict: peer quarantined");
            }
            Observation::Quarantined | Observation::PendingApproval => {}
        }
        if newly_contacted {
            for callback in &state.on_peer_contact {
                callback(message.source);
            }
        }
        drop(state);

        // Step 3: kick off a sync-request now that we trust this peer.
        if self.session.is_trusted(&message.source) {
            let summary = self.document.causal_summary();
            let request = SyncRequestPayload { summary };
            let envelope = self.session.wrap_broadcast(request.encode());
            let wire = MeshMessage::new(
                MessageType::SyncRequest,
                self.identity.id(),
                Some(message.source),
                self.config.message_ttl,
                envelope.encode(),
            );
            let adapter = { self.state.lock().adapters.get(&kind).cloned() };
            if let Some(adapter) = adapter {
                let _ = adapter.send(&wire, Some(message.source)).await;
            }
        }
    }

    async fn handle_sync_request(&self, message: &MeshMessage) {
        let Some(payload) = self.decode_trusted::<SyncRequestPayload>(message) else {
            return;
        };
        let changes = self.document.changes_since(&payload.summary);
        let response = SyncResponsePayload { changes };
        let envelope = self.session.wrap_broadcast(response.encode());
        let wire = MeshMessage::new(
            MessageType::SyncResponse,
            self.identity.id(),
            Some(message.source),
            self.config.message_ttl,
            envelope.encode(),
        );
        let adapter = {
            let state = self.state.lock();
            state
                .peers
                .preferred_transport(&message.source)
                .and_then(|kind| state.adapters.get(&kind).cloned())
        };
        if let Some(adapter) = adapter {
            let _ = adapter.send(&wire, Some(message.source)).await;
        }
    }

    async fn handle_sync_response(&self, message: &MeshMessage) {
        let Some(payload) = self.decode_trusted::<SyncResponsePayload>(message) else {
            return;
        };
        if let Err(err) = self.document.apply_remote_changes(payload.changes) {
            tracing::warn!(error = %err, "failed to apply sync response");
        }
    }

    async fn handle_data(&self, message: &MeshMessage) {
        if message.destination == Some(self.identity.id()) || message.is_broadcast() {
            if let Some(plaintext) = self.decode_trusted_bytes(message) {
                for callback in &self.state.lock().on_data {
                    callback(message.source, plaintext.clone());
                }
            }
        }
        if message.destination != Some(self.identity.id()) {
            self.deliver_or_relay(message).await;
        }
    }

    /// Routing (§4.5): directed messages with TTL > 1 and an unknown
    /// local destination are relayed with TTL decremented; broadcasts
    /// are forwarded the same way.
    async fn deliver_or_relay(&self, message: &MeshMessage) {
        if message.destination == Some(self.identity.id()) {
            return;
        }
        if message.ttl <= 1 {
            return;
        }
        let relayed = message.relayed();
        let _ = self.send_on_all_adapters(&relayed, relayed.destination).await;
    }

    fn decode_trusted<T: for<'de> serde::Deserialize<'de>>(&self, message: &MeshMessage) -> Option<T> {
        let bytes = self.decode_trusted_bytes(message)?;
        bincode::deserialize(&bytes).ok()
    }

    fn decode_trusted_bytes(&self, message: &MeshMessage) -> Option<Vec<u8>> {
        let envelope = crate::decode_envelope(&message.payload).ok()?;
        match &envelope {
            aidmesh_session::Envelope::Signed { .. } => {
                self.session.unwrap_broadcast(message.source, &envelope).ok()
            }
            aidmesh_session::Envelope::Encrypted { .. } => {
                self.session.unwrap_directed(message.source, &envelope).ok()
            }
        }
    }
}
