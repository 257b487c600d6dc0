//! The Bridge API (C9, §4.9): the only public surface domain modules
//! reach the core through. Everything else in the workspace is an
//! implementation detail of [`Node`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aidmesh_crdt::{ChangeEvent, Document, FieldPatch, Record, RecordId, RecordKind, SubscriptionHandle};
use aidmesh_dtn::{Bundle, BundleLayer, BundleStore, Priority};
use aidmesh_identity::{Identity, PeerId, SealedIdentity};
use aidmesh_mesh::adapters::{BleAdapter, LoraAdapter, LoraConfig};
use aidmesh_mesh::{AdapterHandle, AdapterStatus, Link, MeshManager, Peer, TransportAdapter};
use aidmesh_session::SecureSession;
use parking_lot::Mutex as SyncMutex;

use crate::config::{Config, TransportKind};
use crate::error::AidmeshError;
use crate::scheduler::{SchedulerConfig, SyncScheduler};

const IDENTITY_FILE: &str = "identity.sealed";

/// The session layer's tolerated clock skew (§4.7). Not one of the
/// named §6 options; chosen the same order of magnitude the teacher
/// crate's own session tests use.
const CLOCK_SKEW_MILLIS: u64 = 60_000;

fn identity_path(dir: &Path) -> PathBuf {
    dir.join(IDENTITY_FILE)
}

/// A running node (§4.9): the document store, mesh manager, secure
/// session layer, sync scheduler and (optionally) the DTN bundle layer,
/// wired together per `config` and reachable only through this type's
/// methods.
#[derive(Clone)]
pub struct Node {
    identity: Arc<Identity>,
    document: Document,
    mesh: MeshManager,
    dtn: Option<BundleLayer>,
    #[allow(dead_code)]
    scheduler: SyncScheduler,
    adapters: Arc<SyncMutex<HashMap<TransportKind, Arc<dyn TransportAdapter>>>>,
}

impl Node {
    // ---- identity create/load/export (§4.9) ----

    /// Generates a brand-new identity. Not yet persisted — call
    /// [`Node::save_identity`] (or seal it yourself) to write
    /// `identity.sealed`.
    pub fn create_identity(display_name: Option<String>) -> Identity {
        Identity::generate(display_name)
    }

    /// Seals and writes `identity.sealed` under `dir` (§6 persistent
    /// layout). There is no plaintext export path (§9 Open Question
    /// resolution): the only thing ever written to disk is this sealed
    /// blob.
    pub fn save_identity(
        dir: &Path,
        identity: &Identity,
        passphrase: &str,
        work_factor: u32,
    ) -> Result<(), AidmeshError> {
        std::fs::create_dir_all(dir)?;
        let sealed = identity.seal(passphrase, work_factor);
        std::fs::write(identity_path(dir), sealed.to_bytes())?;
        Ok(())
    }

    /// Loads the identity sealed under `dir` (§6 `identity.sealed`).
    pub fn load_identity(dir: &Path, passphrase: &str) -> Result<Identity, AidmeshError> {
        let bytes = std::fs::read(identity_path(dir))?;
        let sealed = SealedIdentity::from_bytes(&bytes)?;
        Ok(Identity::unseal(&sealed, passphrase)?)
    }

    /// Re-seals `identity` under a (possibly new) passphrase, returning
    /// the portable blob rather than writing it anywhere — "export" in
    /// the sense of §4.9, still never plaintext.
    pub fn export_identity(identity: &Identity, passphrase: &str, work_factor: u32) -> Vec<u8> {
        identity.seal(passphrase, work_factor).to_bytes()
    }

    // ---- open/close store (§4.9) ----

    /// Opens (creating if absent) the node's persistent state under
    /// `dir` and wires up the mesh manager, secure session layer, sync
    /// scheduler, and — if `config.dtn_enabled` — the DTN bundle layer.
    /// No transport is enabled automatically; call
    /// [`Node::enable_transport`] for each medium the embedder wants
    /// active.
    pub fn open(dir: &Path, identity: Identity, config: Config) -> Result<Self, AidmeshError> {
        let identity = Arc::new(identity);
        let document = Document::open(dir, identity.id())?;
        let session = Arc::new(SecureSession::new(
            identity.clone(),
            config.trust_mode.into(),
            CLOCK_SKEW_MILLIS,
        ));
        let mesh = MeshManager::new(identity.clone(), document.clone(), session, config.mesh_config());

        let dtn = if config.dtn_enabled {
            let store = BundleStore::open(dir)?;
            Some(BundleLayer::new(identity.id(), mesh.clone(), store, config.dtn_config()))
        } else {
            None
        };

        let scheduler = SyncScheduler::new(
            document.clone(),
            mesh.clone(),
            SchedulerConfig {
                debounce_ms: config.sync_debounce_ms,
                max_queue_per_peer: 8,
            },
        );

        Ok(Self {
            identity,
            document,
            mesh,
            dtn,
            scheduler,
            adapters: Arc::new(SyncMutex::new(HashMap::new())),
        })
    }

    /// An in-memory-only node with no persistent backing, for tests and
    /// ephemeral replicas.
    pub fn in_memory(identity: Identity, config: Config) -> Result<Self, AidmeshError> {
        let identity = Arc::new(identity);
        let document = Document::in_memory(identity.id());
        let session = Arc::new(SecureSession::new(
            identity.clone(),
            config.trust_mode.into(),
            CLOCK_SKEW_MILLIS,
        ));
        let mesh = MeshManager::new(identity.clone(), document.clone(), session, config.mesh_config());

        let dtn = if config.dtn_enabled {
            Some(BundleLayer::new(
                identity.id(),
                mesh.clone(),
                BundleStore::in_memory(),
                config.dtn_config(),
            ))
        } else {
            None
        };

        let scheduler = SyncScheduler::new(
            document.clone(),
            mesh.clone(),
            SchedulerConfig {
                debounce_ms: config.sync_debounce_ms,
                max_queue_per_peer: 8,
            },
        );

        Ok(Self {
            identity,
            document,
            mesh,
            dtn,
            scheduler,
            adapters: Arc::new(SyncMutex::new(HashMap::new())),
        })
    }

    /// Checkpoints the document to disk. There is no other teardown:
    /// dropping the `Node` releases its in-process resources.
    pub fn close(&self) -> Result<(), AidmeshError> {
        Ok(self.document.checkpoint()?)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.identity.id()
    }

    // ---- record operations (§4.9 "apply record updates... list
    // records with filters") ----

    pub fn register_invariant(
        &self,
        kind: RecordKind,
        field: impl Into<String>,
        predicate: impl Fn(&FieldPatch) -> bool + Send + Sync + 'static,
    ) {
        self.document.register_invariant(kind, field, predicate);
    }

    pub fn add_record(&self, kind: RecordKind, fields: BTreeMap<String, FieldPatch>) -> Result<RecordId, AidmeshError> {
        Ok(self.document.add_record(kind, fields)?)
    }

    pub fn update_record(
        &self,
        kind: RecordKind,
        id: RecordId,
        patch: BTreeMap<String, FieldPatch>,
    ) -> Result<(), AidmeshError> {
        Ok(self.document.update_record(kind, id, patch)?)
    }

    pub fn delete_record(&self, kind: RecordKind, id: RecordId) -> Result<(), AidmeshError> {
        Ok(self.document.delete_record(kind, id)?)
    }

    pub fn get_record(&self, kind: RecordKind, id: RecordId) -> Option<Record> {
        self.document.get_record(kind, id)
    }

    pub fn list_records(&self, kind: RecordKind, filter: Option<&dyn Fn(&Record) -> bool>) -> Vec<Record> {
        self.document.list_records(kind, filter)
    }

    /// Subscribes to the record change stream (§4.9).
    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> SubscriptionHandle {
        self.document.subscribe(callback)
    }

    // ---- transports (§4.9 "enable/disable a transport") ----

    /// Constructs and registers an adapter of `kind` against `link`
    /// (SPEC_FULL §4.4: the only shipped `Link` is
    /// [`aidmesh_mesh::adapters::MemoryLink`] — a real platform
    /// integration supplies its own). `lora` additionally requires
    /// `config.lora` to have been set at [`Node::open`] time.
    pub async fn enable_transport(&self, kind: TransportKind, link: Arc<dyn Link>) -> Result<(), AidmeshError> {
        let handle: AdapterHandle = match kind {
            TransportKind::Ble => {
                let (adapter, events) = BleAdapter::new(link);
                let adapter: Arc<dyn TransportAdapter> = Arc::new(adapter);
                self.adapters.lock().insert(kind, adapter.clone());
                AdapterHandle { adapter, events }
            }
            TransportKind::LocalNet => {
                let (adapter, events) = aidmesh_mesh::adapters::LocalNetAdapter::new(link);
                let adapter: Arc<dyn TransportAdapter> = Arc::new(adapter);
                self.adapters.lock().insert(kind, adapter.clone());
                AdapterHandle { adapter, events }
            }
            TransportKind::Lora => {
                return Err(AidmeshError::Config(
                    "lora transport requires a configured region/channel; use enable_lora_transport".into(),
                ));
            }
        };
        self.mesh.register_adapter(handle).await?;
        Ok(())
    }

    /// As [`Node::enable_transport`] for the LoRa-class adapter, which
    /// additionally needs `lora: { channel, region }` (§6).
    pub async fn enable_lora_transport(&self, link: Arc<dyn Link>, settings: LoraConfig) -> Result<(), AidmeshError> {
        let (adapter, events) = LoraAdapter::new(link, self.identity.id(), settings);
        let adapter = Arc::new(adapter);
        self.adapters.lock().insert(TransportKind::Lora, adapter.clone());
        self.mesh
            .register_adapter(AdapterHandle { adapter, events })
            .await?;
        Ok(())
    }

    /// Stops the adapter registered for `kind`, if any (§4.9). The mesh
    /// manager has no deregistration path (§9 REDESIGN FLAGS: "no
    /// open-ended listener registry" keeps adapter bookkeeping to one
    /// observer channel per adapter) — a stopped adapter simply refuses
    /// new traffic until re-enabled.
    pub async fn disable_transport(&self, kind: TransportKind) -> Result<(), AidmeshError> {
        let adapter = self.adapters.lock().get(&kind).cloned();
        if let Some(adapter) = adapter {
            adapter.stop().await?;
        }
        Ok(())
    }

    pub fn transport_status(&self, kind: TransportKind) -> Option<AdapterStatus> {
        self.adapters.lock().get(&kind).map(|adapter| adapter.current_status())
    }

    /// Triggers a discovery pass on every enabled transport (§4.9).
    pub async fn trigger_discovery(&self) {
        let adapters: Vec<Arc<dyn TransportAdapter>> = self.adapters.lock().values().cloned().collect();
        for adapter in adapters {
            adapter.discover_peers().await;
        }
    }

    // ---- peer table / transport status (§4.9) ----

    pub fn peer_table(&self) -> Vec<Peer> {
        self.mesh.peer_table_snapshot()
    }

    // ---- DTN (§4.9 "submit a DTN bundle for an arbitrary payload
    // with a chosen priority") ----

    pub fn submit_bundle(
        &self,
        destination: Option<PeerId>,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Result<aidmesh_dtn::BundleId, AidmeshError> {
        let dtn = self.dtn.as_ref().ok_or_else(|| AidmeshError::Config("dtn_enabled is false".into()))?;
        Ok(dtn.submit(destination, priority, payload)?)
    }

    pub fn held_bundles(&self) -> Vec<Bundle> {
        self.dtn.as_ref().map(BundleLayer::held_bundles).unwrap_or_default()
    }

    /// Announces this node and runs the periodic maintenance the
    /// concurrency model's "coordination loop" timer drives (§5): idle
    /// peer eviction and the DTN expiry sweep. The caller owns the
    /// actual timer (e.g. a `tokio::time::interval` in the binary
    /// entrypoint); this is one tick of it.
    pub async fn tick(&self, now_millis: u64) -> Result<(), AidmeshError> {
        self.mesh.evict_idle_peers(now_millis);
        if let Some(dtn) = &self.dtn {
            dtn.sweep_expired()?;
        }
        Ok(())
    }

    pub async fn announce(&self, capabilities: Vec<String>) -> Result<(), AidmeshError> {
        Ok(self.mesh.broadcast_announce(capabilities).await?)
    }
}
