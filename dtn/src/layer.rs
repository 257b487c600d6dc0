//! The bundle layer / DTN (C6, §4.6): store-carry-forward delivery
//! wired onto a [`MeshManager`]'s `bundle`-typed messages. Registers
//! itself as the manager's undeliverable-payload sink (§4.5 "Failure
//! semantics", §5 "the payload is converted into a bundle"), as the
//! observer of every `bundle`-typed message the manager hands up, and
//! as the manager's peer-contact sink so a contact exchange actually
//! runs on every newly trusted peer (§4.6 "Contract").

use crate::bundle::{Bundle, Priority};
use crate::control::{BundleControl, BundleDigest};
use crate::error::DtnError;
use crate::id::BundleId;
use crate::store::BundleStore;
use aidmesh_identity::PeerId;
use aidmesh_mesh::{MeshManager, MessageType};
use lru::LruCache;
use parking_lot::Mutex as SyncMutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// §6 configuration recognized by the bundle layer.
#[derive(Clone, Debug)]
pub struct DtnConfig {
    /// Bundle-store ceiling (§6 `dtn_budget_bytes`). Above 80% of this
    /// budget, only `critical`-priority submissions are admitted (§5
    /// "Memory budget": "graceful degradation...beyond 80% of the
    /// budget").
    pub budget_bytes: u64,
    /// Default bundle lifetime (§6 `dtn_default_ttl_ms`).
    pub default_ttl_ms: u64,
}

impl Default for DtnConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 64 * 1024 * 1024,
            default_ttl_ms: 24 * 60 * 60 * 1000,
        }
    }
}

type PayloadCallback = Box<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;
type DeliveredCallback = Box<dyn Fn(BundleId) + Send + Sync>;

struct State {
    /// Bundle ids known to have been delivered to their destination
    /// (§4.6 "Delivery confirmation"), gossiped on every contact so an
    /// upstream holder drops its copy next time it meets anyone
    /// carrying the ack. Bounded like the mesh manager's seen-id cache
    /// (§4.5) since acks are a forwarding aid, not a permanent ledger.
    known_acks: LruCache<BundleId, ()>,
    on_payload: Vec<PayloadCallback>,
    on_delivered: Vec<DeliveredCallback>,
}

/// The bundle layer's handle (§4.6). Cheaply cloneable; clones share
/// the same store and mesh wiring.
#[derive(Clone)]
pub struct BundleLayer {
    local: PeerId,
    mesh: MeshManager,
    store: Arc<BundleStore>,
    config: DtnConfig,
    state: Arc<SyncMutex<State>>,
}

impl BundleLayer {
    /// Builds the layer and wires it onto `mesh`'s `bundle` and
    /// undeliverable-payload hooks (§4.5 "hands the message to C6 as a
    /// bundle", §4.6 "the bundle layer then offers to exchange
    /// bundles").
    pub fn new(local: PeerId, mesh: MeshManager, store: BundleStore, config: DtnConfig) -> Self {
        let layer = Self {
            local,
            mesh: mesh.clone(),
            store: Arc::new(store),
            config,
            state: Arc::new(SyncMutex::new(State {
                known_acks: LruCache::new(NonZeroUsize::new(4096).unwrap()),
                on_payload: Vec::new(),
                on_delivered: Vec::new(),
            })),
        };

        let incoming = layer.clone();
        mesh.on_bundle(move |peer, bytes| {
            let incoming = incoming.clone();
            tokio::spawn(async move { incoming.handle_incoming(peer, bytes).await });
        });

        let undeliverable = layer.clone();
        mesh.on_undeliverable(move |destination, payload| {
            let bundle = Bundle::new(
                undeliverable.local,
                Some(destination),
                now_millis(),
                undeliverable.config.default_ttl_ms,
                Priority::Normal,
                payload,
            );
            if let Err(err) = undeliverable.admit(bundle) {
                tracing::warn!(error = %err, peer = %destination, "could not convert undeliverable payload into a bundle");
            }
        });

        let contacted = layer.clone();
        mesh.on_peer_contact(move |peer| {
            let contacted = contacted.clone();
            tokio::spawn(async move {
                if let Err(err) = contacted.on_peer_contact(peer).await {
                    tracing::warn!(error = %err, peer = %peer, "bundle summary exchange on contact failed");
                }
            });
        });

        layer
    }

    /// Registers a callback invoked with the payload of every bundle
    /// this node is a valid recipient of: the named destination of a
    /// directed bundle, or any receiver of an epidemic one (§3 "Bundle
    /// (DTN)").
    pub fn on_payload(&self, callback: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static) {
        self.state.lock().on_payload.push(Box::new(callback));
    }

    /// Registered for operator/test visibility into confirmed
    /// directed deliveries (§4.6 "Delivery confirmation").
    pub fn on_delivered(&self, callback: impl Fn(BundleId) + Send + Sync + 'static) {
        self.state.lock().on_delivered.push(Box::new(callback));
    }

    /// `submit(bundle)` (§4.6 "Contract") for an arbitrary application
    /// payload, per the Bridge API's "submit a DTN bundle for an
    /// arbitrary payload with a chosen priority" (§4.9).
    pub fn submit(
        &self,
        destination: Option<PeerId>,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Result<BundleId, DtnError> {
        let bundle = Bundle::new(
            self.local,
            destination,
            now_millis(),
            self.config.default_ttl_ms,
            priority,
            payload,
        );
        self.admit(bundle)
    }

    fn admit(&self, bundle: Bundle) -> Result<BundleId, DtnError> {
        let now = now_millis();
        if bundle.is_expired(now) {
            return Err(DtnError::AlreadyExpired);
        }
        let used = self.store.total_bytes()?;
        let degraded_threshold = (self.config.budget_bytes as f64 * 0.8) as u64;
        if used >= degraded_threshold && bundle.priority != Priority::Critical {
            return Err(DtnError::BudgetExceeded(bundle.priority));
        }
        let id = bundle.id;
        self.store.insert(bundle)?;
        if self.store.total_bytes()? > self.config.budget_bytes {
            let evicted = self.store.evict_to_budget(self.config.budget_bytes, now)?;
            if !evicted.is_empty() {
                tracing::info!(count = evicted.len(), "evicted bundles under storage pressure");
            }
        }
        Ok(id)
    }

    /// Periodic expiry sweep (§4.6 "Expiry"), driven by the node's
    /// coordination loop timer (§5 "DTN timer ticks").
    pub fn sweep_expired(&self) -> Result<Vec<BundleId>, DtnError> {
        self.store.purge_expired(now_millis())
    }

    pub fn held_bundles(&self) -> Vec<Bundle> {
        self.store.dequeue_order().unwrap_or_default()
    }

    /// `on_peer_contact(peer)` (§4.6 "Contract"): offers a summary of
    /// held bundles and any known delivery acks.
    pub async fn on_peer_contact(&self, peer: PeerId) -> Result<(), DtnError> {
        self.store.purge_expired(now_millis())?;
        let digest: Vec<BundleDigest> = self.store.dequeue_order()?.iter().map(BundleDigest::from).collect();
        if !digest.is_empty() {
            self.send_control(peer, BundleControl::Digest(digest)).await?;
        }
        let acks: Vec<BundleId> = {
            let state = self.state.lock();
            state.known_acks.iter().map(|(id, _)| *id).collect()
        };
        if !acks.is_empty() {
            self.send_control(peer, BundleControl::Acks(acks)).await?;
        }
        Ok(())
    }

    async fn send_control(&self, peer: PeerId, control: BundleControl) -> Result<(), DtnError> {
        let bytes = control.encode()?;
        self.mesh.send_directed_typed(MessageType::Bundle, peer, bytes, false).await?;
        Ok(())
    }

    async fn handle_incoming(&self, peer: PeerId, bytes: Vec<u8>) {
        let control = match BundleControl::decode(&bytes) {
            Ok(control) => control,
            Err(_) => return,
        };
        match control {
            BundleControl::Digest(entries) => self.handle_digest(peer, entries).await,
            BundleControl::Request(ids) => self.handle_request(peer, ids).await,
            BundleControl::Transfer(bundle) => self.handle_transfer(peer, bundle).await,
            BundleControl::Acks(ids) => self.handle_acks(ids),
        }
    }

    /// §4.6 "requests bundles the other holds that are (a) not
    /// expired, (b) not already in its own hop set, (c) destined for
    /// itself, or for any destination if the policy is epidemic".
    async fn handle_digest(&self, peer: PeerId, entries: Vec<BundleDigest>) {
        let now = now_millis();
        let mut wanted = Vec::new();
        for entry in entries {
            if entry.expiry_millis <= now {
                continue;
            }
            if self.store.contains(&entry.id).unwrap_or(true) {
                continue;
            }
            if self.state.lock().known_acks.contains(&entry.id) {
                continue;
            }
            let wants = entry.destination == Some(self.local) || entry.destination.is_none();
            if wants {
                wanted.push(entry.id);
            }
        }
        if !wanted.is_empty() {
            let _ = self.send_control(peer, BundleControl::Request(wanted)).await;
        }
    }

    /// §4.6 "Requested bundles are transferred in priority-then-expiry
    /// order".
    async fn handle_request(&self, peer: PeerId, ids: Vec<BundleId>) {
        for bundle in self.store.dequeue_order().unwrap_or_default() {
            if !ids.contains(&bundle.id) || bundle.hop_set.contains(&peer) {
                continue;
            }
            let _ = self
                .send_control(peer, BundleControl::Transfer(bundle.with_hop(peer)))
                .await;
        }
    }

    async fn handle_transfer(&self, peer: PeerId, bundle: Bundle) {
        let now = now_millis();
        if bundle.is_expired(now) {
            return;
        }
        let bundle = bundle.with_hop(self.local);
        let delivered_here = bundle.destination == Some(self.local);
        let epidemic = bundle.destination.is_none();
        let id = bundle.id;
        let source = bundle.source;
        let payload = bundle.payload.clone();

        if let Err(err) = self.store.insert(bundle) {
            tracing::warn!(error = %err, "failed to store transferred bundle");
            return;
        }
        if self.store.total_bytes().unwrap_or(0) > self.config.budget_bytes {
            let _ = self.store.evict_to_budget(self.config.budget_bytes, now);
        }

        if delivered_here || epidemic {
            for callback in &self.state.lock().on_payload {
                callback(source, payload.clone());
            }
        }
        // Epidemic bundles are never acknowledged (§4.6 "Delivery
        // confirmation"); only a directed delivery to this node is.
        if delivered_here {
            self.mark_delivered(id);
            let _ = self.send_control(peer, BundleControl::Acks(vec![id])).await;
        }
    }

    fn handle_acks(&self, ids: Vec<BundleId>) {
        for id in ids {
            self.mark_delivered(id);
        }
    }

    /// §4.6 "A bundle addressed to a single destination is removed
    /// from the local store upon an acknowledgment...or upon observing
    /// the destination accept it during direct exchange".
    fn mark_delivered(&self, id: BundleId) {
        let is_new = {
            let mut state = self.state.lock();
            let is_new = !state.known_acks.contains(&id);
            state.known_acks.put(id, ());
            is_new
        };
        let _ = self.store.remove(&id);
        if is_new {
            for callback in &self.state.lock().on_delivered {
                callback(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_crdt::Document;
    use aidmesh_identity::Identity;
    use aidmesh_mesh::adapters::{memory_link::MemoryNetwork, LocalNetAdapter};
    use aidmesh_mesh::MeshConfig;
    use aidmesh_session::{SecureSession, TrustMode};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn node(network: &Arc<MemoryNetwork>) -> (MeshManager, BundleLayer, PeerId) {
        let identity = Arc::new(Identity::ephemeral());
        let id = identity.id();
        let document = Document::in_memory(id);
        let session = Arc::new(SecureSession::new(identity.clone(), TrustMode::Tofu, 60_000));
        let manager = MeshManager::new(identity.clone(), document, session, MeshConfig::default());
        let link = Arc::new(network.join(id));
        let (adapter, events) = LocalNetAdapter::new(link);
        manager
            .register_adapter(aidmesh_mesh::AdapterHandle {
                adapter: Arc::new(adapter),
                events,
            })
            .await
            .unwrap();
        let dtn = BundleLayer::new(id, manager.clone(), BundleStore::in_memory(), DtnConfig::default());
        (manager, dtn, id)
    }

    async fn connect(alice: &MeshManager, bob: &MeshManager) {
        alice.broadcast_announce(vec![]).await.unwrap();
        bob.broadcast_announce(vec![]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn directed_bundle_is_delivered_and_acknowledged_on_contact() {
        let network = MemoryNetwork::new();
        let (alice_mesh, alice_dtn, _alice_id) = node(&network).await;
        let (bob_mesh, bob_dtn, bob_id) = node(&network).await;
        connect(&alice_mesh, &bob_mesh).await;

        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        bob_dtn.on_payload(move |_source, payload| received_clone.lock().unwrap().push(payload));

        let id = alice_dtn
            .submit(Some(bob_id), Priority::High, b"need: water".to_vec())
            .unwrap();

        alice_dtn.on_peer_contact(bob_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.lock().unwrap().as_slice(), &[b"need: water".to_vec()]);
        assert!(bob_dtn.held_bundles().is_empty());

        // bob's ack propagates back to alice on the next contact.
        bob_dtn.on_peer_contact(_alice_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice_dtn.held_bundles().iter().all(|b| b.id != id));
    }

    #[tokio::test]
    async fn undeliverable_directed_send_is_converted_to_a_bundle() {
        let network = MemoryNetwork::new();
        let (alice_mesh, alice_dtn, _alice_id) = node(&network).await;
        let stranger = Identity::ephemeral().id();

        let result = alice_mesh.send_directed(stranger, b"hi".to_vec(), true).await;
        assert!(result.is_err());
        assert_eq!(alice_dtn.held_bundles().len(), 1);
    }

    #[tokio::test]
    async fn degraded_budget_rejects_non_critical_submissions() {
        let network = MemoryNetwork::new();
        let (_mesh, _dtn, id) = node(&network).await;
        let small = BundleLayer::new(
            id,
            _mesh,
            BundleStore::in_memory(),
            DtnConfig {
                budget_bytes: 100,
                default_ttl_ms: 60_000,
            },
        );
        small.submit(None, Priority::Normal, vec![0u8; 90]).unwrap();
        let err = small.submit(None, Priority::Normal, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, DtnError::BudgetExceeded(Priority::Normal)));
        // critical is still admitted under degradation (§5).
        assert!(small.submit(None, Priority::Critical, vec![0u8; 10]).is_ok());
    }
}
