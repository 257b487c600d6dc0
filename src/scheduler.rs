//! The sync scheduler (C8, §4.8): debounces local document changes
//! into batches and proactively re-syncs every trusted peer, rather
//! than waiting for the mesh manager's own announce-triggered
//! handshake (which only fires once, on first contact).

use aidmesh_crdt::Document;
use aidmesh_identity::PeerId;
use aidmesh_mesh::{MeshManager, MessageType, SyncRequestPayload};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// §6 `sync_debounce_ms` plus the backpressure threshold from §4.8
/// ("if the outbound queue for any peer exceeds a threshold, new sync
/// payloads for that peer are coalesced rather than enqueued").
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub debounce_ms: u64,
    pub max_queue_per_peer: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            max_queue_per_peer: 8,
        }
    }
}

struct State {
    pending: bool,
    /// Per-peer count of sends currently in flight or coalesced away;
    /// reset on a successful send (§4.8 "coalesced rather than
    /// enqueued" — this is the coalescing counter, not a real queue).
    backlog: HashMap<PeerId, u32>,
}

/// The sync scheduler's handle (§4.8). Cheaply cloneable.
#[derive(Clone)]
pub struct SyncScheduler {
    document: Document,
    mesh: MeshManager,
    config: SchedulerConfig,
    state: Arc<SyncMutex<State>>,
}

impl SyncScheduler {
    /// Subscribes to `document`'s change stream and begins debouncing
    /// batches into per-peer sync requests against `mesh`.
    pub fn new(document: Document, mesh: MeshManager, config: SchedulerConfig) -> Self {
        let scheduler = Self {
            document: document.clone(),
            mesh,
            config,
            state: Arc::new(SyncMutex::new(State {
                pending: false,
                backlog: HashMap::new(),
            })),
        };

        let observer = scheduler.clone();
        // The handle is never cancelled: a node-lifetime scheduler has
        // nothing else to hand the cancellation capability to.
        document.subscribe(move |_event| observer.notify_change());
        scheduler
    }

    fn notify_change(&self) {
        let mut state = self.state.lock();
        if state.pending {
            return;
        }
        state.pending = true;
        drop(state);

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(scheduler.config.debounce_ms)).await;
            scheduler.state.lock().pending = false;
            scheduler.flush().await;
        });
    }

    /// Sends a sync request for the current causal summary to every
    /// trusted peer, coalescing peers already over the backlog
    /// threshold instead of sending (§4.8).
    async fn flush(&self) {
        let summary = self.document.causal_summary();
        let payload = SyncRequestPayload { summary }.encode();
        let peers: Vec<PeerId> = self
            .mesh
            .peer_table_snapshot()
            .into_iter()
            .filter(|peer| peer.trusted)
            .map(|peer| peer.id)
            .collect();

        for peer in peers {
            let over_threshold = {
                let state = self.state.lock();
                state.backlog.get(&peer).copied().unwrap_or(0) >= self.config.max_queue_per_peer
            };
            if over_threshold {
                tracing::debug!(peer = %peer, "coalescing sync request, peer over backlog threshold");
                continue;
            }
            let result = self
                .mesh
                .send_directed_typed(MessageType::SyncRequest, peer, payload.clone(), false)
                .await;
            let mut state = self.state.lock();
            match result {
                Ok(()) => {
                    state.backlog.remove(&peer);
                }
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "sync request send failed");
                    *state.backlog.entry(peer).or_insert(0) += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_crdt::{Document, FieldPatch, RecordKind, Scalar};
    use aidmesh_identity::Identity;
    use aidmesh_mesh::adapters::{memory_link::MemoryNetwork, LocalNetAdapter};
    use aidmesh_mesh::{AdapterHandle, MeshConfig};
    use aidmesh_session::{SecureSession, TrustMode};
    use std::collections::BTreeMap;
    use std::sync::Arc as StdArc;

    async fn node(network: &StdArc<MemoryNetwork>) -> (MeshManager, Document) {
        let identity = StdArc::new(Identity::ephemeral());
        let id = identity.id();
        let document = Document::in_memory(id);
        let session = StdArc::new(SecureSession::new(identity.clone(), TrustMode::Tofu, 60_000));
        let manager = MeshManager::new(identity.clone(), document.clone(), session, MeshConfig::default());
        let link = StdArc::new(network.join(id));
        let (adapter, events) = LocalNetAdapter::new(link);
        manager
            .register_adapter(AdapterHandle {
                adapter: StdArc::new(adapter),
                events,
            })
            .await
            .unwrap();
        (manager, document)
    }

    #[tokio::test]
    async fn local_change_propagates_to_a_trusted_peer_without_a_new_announce() {
        let network = MemoryNetwork::new();
        let (alice_mesh, alice_doc) = node(&network).await;
        let (bob_mesh, bob_doc) = node(&network).await;

        alice_mesh.broadcast_announce(vec![]).await.unwrap();
        bob_mesh.broadcast_announce(vec![]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _scheduler = SyncScheduler::new(
            alice_doc.clone(),
            alice_mesh.clone(),
            SchedulerConfig {
                debounce_ms: 20,
                max_queue_per_peer: 8,
            },
        );

        let mut fields = BTreeMap::new();
        fields.insert("need".to_string(), FieldPatch::Scalar(Scalar::Text("water".into())));
        alice_doc.add_record(RecordKind::Need, fields).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(bob_doc.list_records(RecordKind::Need, None).len(), 1);
    }
}
