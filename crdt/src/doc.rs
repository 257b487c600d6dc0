//! The replicated document store (§4.1): a CRDT document over typed
//! record tables, a deterministic merge function, and the change
//! stream domain modules subscribe to.

use crate::causal::CausalSummary;
use crate::change::{Change, Op};
use crate::dot::Dot;
use crate::error::DocError;
use crate::field::{FieldPatch, FieldValue};
use crate::id::{ChangeHash, RecordId};
use crate::persist::{ChangeLog, SnapshotStore};
use crate::record::{Record, RecordKey, RecordKind};
use crate::subscriber::{next_subscription_id, ChangeEvent, Subscription, SubscriptionHandle};
use aidmesh_identity::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

type Invariant = Box<dyn Fn(&FieldPatch) -> bool + Send + Sync>;

struct State {
    records: BTreeMap<RecordKey, Record>,
    changes: BTreeMap<ChangeHash, Change>,
    frontier: CausalSummary,
    heads: BTreeSet<ChangeHash>,
    local_seq: u64,
    subscribers: Vec<Subscription>,
    invariants: BTreeMap<(RecordKind, String), Invariant>,
}

/// Canonical on-the-wire snapshot format (§6, §8 property 7).
#[derive(Serialize, Deserialize)]
struct Snapshot {
    records: BTreeMap<RecordKey, Record>,
    changes: BTreeMap<ChangeHash, Change>,
    frontier: CausalSummary,
    integrity: [u8; 32],
}

pub(crate) struct DocumentInner {
    local_actor: PeerId,
    state: Mutex<State>,
    log: Option<ChangeLog>,
    snapshot: Option<SnapshotStore>,
}

impl DocumentInner {
    pub(crate) fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.retain(|s| s.id != id);
    }
}

/// The document store handle (§4.1 "Public contract").
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Document {
    /// Opens (creating if absent) a document backed by the two-artifact
    /// persistent layout of §6 under `dir`. Replays `document.log`
    /// after the last valid `document.snapshot` checkpoint.
    pub fn open(dir: &Path, local_actor: PeerId) -> Result<Self, DocError> {
        std::fs::create_dir_all(dir)?;
        let snapshot_store = SnapshotStore::open(dir)?;
        let log = ChangeLog::open(dir)?;

        let mut state = State {
            records: BTreeMap::new(),
            changes: BTreeMap::new(),
            frontier: CausalSummary::new(),
            heads: BTreeSet::new(),
            local_seq: 0,
            subscribers: Vec::new(),
            invariants: BTreeMap::new(),
        };

        if let Some(bytes) = snapshot_store.read()? {
            let snapshot = decode_snapshot(&bytes)?;
            apply_snapshot(&mut state, snapshot);
        }
        for change in log.load_all()? {
            apply_change_locked(&mut state, change);
        }
        state.local_seq = state.frontier.max_seq(&local_actor);

        Ok(Self {
            inner: Arc::new(DocumentInner {
                local_actor,
                state: Mutex::new(state),
                log: Some(log),
                snapshot: Some(snapshot_store),
            }),
        })
    }

    /// An in-memory-only document with no persistent backing, for
    /// tests and ephemeral replicas.
    pub fn in_memory(local_actor: PeerId) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                local_actor,
                state: Mutex::new(State {
                    records: BTreeMap::new(),
                    changes: BTreeMap::new(),
                    frontier: CausalSummary::new(),
                    heads: BTreeSet::new(),
                    local_seq: 0,
                    subscribers: Vec::new(),
                    invariants: BTreeMap::new(),
                }),
                log: None,
                snapshot: None,
            }),
        }
    }

    pub fn local_actor(&self) -> PeerId {
        self.inner.local_actor
    }

    /// Registers a per-type field invariant (§4.1), checked on every
    /// local `add_record`/`update_record` before the batch commits.
    pub fn register_invariant(
        &self,
        kind: RecordKind,
        field: impl Into<String>,
        predicate: impl Fn(&FieldPatch) -> bool + Send + Sync + 'static,
    ) {
        self.inner
            .state
            .lock()
            .invariants
            .insert((kind, field.into()), Box::new(predicate));
    }

    #[tracing::instrument(skip(self, fields), fields(kind = ?kind))]
    pub fn add_record(
        &self,
        kind: RecordKind,
        fields: BTreeMap<String, FieldPatch>,
    ) -> Result<RecordId, DocError> {
        let id = RecordId::generate();
        let key = (kind, id);
        let mut ops = vec![Op::CreateRecord {
            key,
            creator: self.inner.local_actor,
            created_at_millis: now_millis(),
        }];
        for (field, patch) in fields {
            ops.push(Op::SetField { key, field, patch });
        }
        self.commit_local(ops)?;
        Ok(id)
    }

    #[tracing::instrument(skip(self, patch), fields(kind = ?kind, id = %id))]
    pub fn update_record(
        &self,
        kind: RecordKind,
        id: RecordId,
        patch: BTreeMap<String, FieldPatch>,
    ) -> Result<(), DocError> {
        let key = (kind, id);
        let ops = patch
            .into_iter()
            .map(|(field, patch)| Op::SetField { key, field, patch })
            .collect();
        self.commit_local(ops)
    }

    /// Soft-deletes a record (§3 "Lifecycles"): it remains mergeable
    /// and enumerable, just tombstoned.
    pub fn delete_record(&self, kind: RecordKind, id: RecordId) -> Result<(), DocError> {
        self.commit_local(vec![Op::Tombstone { key: (kind, id) }])
    }

    pub fn get_record(&self, kind: RecordKind, id: RecordId) -> Option<Record> {
        self.inner.state.lock().records.get(&(kind, id)).cloned()
    }

    pub fn list_records(
        &self,
        kind: RecordKind,
        filter: Option<&dyn Fn(&Record) -> bool>,
    ) -> Vec<Record> {
        self.inner
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.kind == kind && !r.tombstoned)
            .filter(|r| filter.map(|f| f(r)).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Subscribes to the change stream (§4.1 "Change notification").
    pub fn subscribe(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = next_subscription_id();
        self.inner.state.lock().subscribers.push(Subscription {
            id,
            callback: Box::new(callback),
        });
        SubscriptionHandle {
            id,
            document: self.inner.clone(),
        }
    }

    /// The causal summary to advertise to a remote replica (§6 Document
    /// API is consumer-facing; this is the mesh-facing half used by
    /// the sync scheduler / mesh manager).
    pub fn causal_summary(&self) -> CausalSummary {
        self.inner.state.lock().frontier.clone()
    }

    /// The minimal set of changes the holder of `remote` summary lacks
    /// (§4.1 "Minimal delta").
    pub fn changes_since(&self, remote: &CausalSummary) -> Vec<Change> {
        self.inner
            .state
            .lock()
            .changes
            .values()
            .filter(|c| c.seq > remote.max_seq(&c.actor))
            .cloned()
            .collect()
    }

    /// Applies changes received from a remote replica (§4.1
    /// "apply a received sync message").
    pub fn apply_remote_changes(&self, changes: Vec<Change>) -> Result<(), DocError> {
        let mut state = self.inner.state.lock();
        let mut touched = Vec::new();
        for change in changes {
            touched.extend(apply_change_locked(&mut state, change));
        }
        self.persist_pending(&mut state)?;
        notify(&state, touched);
        Ok(())
    }

    /// `export_snapshot() -> bytes` (§4.1, §6).
    pub fn export_snapshot(&self) -> Vec<u8> {
        let state = self.inner.state.lock();
        encode_snapshot(&state)
    }

    /// `import_snapshot(bytes)` (§4.1, §6): merges the snapshot's
    /// changes into this document. Importing into an empty store
    /// yields an equivalent state (§4.1 "Snapshot stability").
    pub fn import_snapshot(&self, bytes: &[u8]) -> Result<(), DocError> {
        let snapshot = decode_snapshot(bytes)?;
        let mut state = self.inner.state.lock();
        let mut touched = Vec::new();
        for change in snapshot.changes.into_values() {
            touched.extend(apply_change_locked(&mut state, change));
        }
        self.persist_pending(&mut state)?;
        notify(&state, touched);
        Ok(())
    }

    /// Merges another in-process replica's full state into this one —
    /// a convenience for tests exercising §8 properties 1–2 without a
    /// network round trip.
    pub fn merge_from(&self, other: &Document) -> Result<(), DocError> {
        let changes: Vec<Change> = other.inner.state.lock().changes.values().cloned().collect();
        self.apply_remote_changes(changes)
    }

    fn commit_local(&self, ops: Vec<Op>) -> Result<(), DocError> {
        let mut state = self.inner.state.lock();
        for op in &ops {
            if let Op::SetField { key, field, patch } = op {
                if let Some(predicate) = state.invariants.get(&(key.0, field.clone())) {
                    if !predicate(patch) {
                        return Err(DocError::ConflictInInvariant(format!(
                            "{:?}.{}",
                            key.0, field
                        )));
                    }
                }
            }
        }
        let seq = state.local_seq + 1;
        let parents: Vec<ChangeHash> = state.heads.iter().cloned().collect();
        let change = Change::new(parents, self.inner.local_actor, seq, now_millis(), ops);
        state.local_seq = seq;
        let touched = apply_change_locked(&mut state, change.clone());
        if let Some(log) = &self.inner.log {
            log.append(&change).map_err(|_| DocError::StorageExhausted)?;
        }
        notify(&state, touched);
        Ok(())
    }

    fn persist_pending(&self, state: &mut State) -> Result<(), DocError> {
        if let Some(log) = &self.inner.log {
            for change in state.changes.values() {
                if !log.contains(&change.hash).unwrap_or(false) {
                    log.append(change)?;
                }
            }
        }
        let _ = state;
        Ok(())
    }

    /// Writes a checkpoint of the current merged state to
    /// `document.snapshot` (§4.1 "Persistence"). Non-blocking with
    /// respect to concurrent readers: it only holds the state lock for
    /// the in-memory encode, not for the disk write.
    pub fn checkpoint(&self) -> Result<(), DocError> {
        let Some(store) = &self.inner.snapshot else {
            return Ok(());
        };
        let bytes = self.export_snapshot();
        store.write(&bytes)
    }
}

fn apply_change_locked(state: &mut State, change: Change) -> Vec<RecordKey> {
    if state.changes.contains_key(&change.hash) {
        return Vec::new();
    }
    state.frontier.observe(change.actor, change.seq);
    for parent in &change.parents {
        state.heads.remove(parent);
    }
    state.heads.insert(change.hash);

    let mut touched = Vec::with_capacity(change.ops.len());
    for op in &change.ops {
        touched.push(op.key());
        apply_op(state, &change, op);
    }
    state.changes.insert(change.hash, change);
    touched
}

fn apply_op(state: &mut State, change: &Change, op: &Op) {
    match op {
        Op::CreateRecord {
            key,
            creator,
            created_at_millis,
        } => {
            state.records.entry(*key).or_insert_with(|| Record {
                id: key.1,
                kind: key.0,
                creator: *creator,
                created_at_millis: *created_at_millis,
                fields: BTreeMap::new(),
                tombstoned: false,
            });
        }
        Op::SetField { key, field, patch } => {
            let record = state.records.entry(*key).or_insert_with(|| Record {
                id: key.1,
                kind: key.0,
                creator: change.actor,
                created_at_millis: change.timestamp_millis,
                fields: BTreeMap::new(),
                tombstoned: false,
            });
            let dot = Dot::new(change.actor, change.seq);
            let next = patch
                .clone()
                .apply(record.fields.get(field), dot, change.timestamp_millis);
            match record.fields.get_mut(field) {
                Some(existing) => existing.merge(&next),
                None => {
                    record.fields.insert(field.clone(), next);
                }
            }
        }
        Op::Tombstone { key } => {
            let record = state.records.entry(*key).or_insert_with(|| Record {
                id: key.1,
                kind: key.0,
                creator: change.actor,
                created_at_millis: change.timestamp_millis,
                fields: BTreeMap::new(),
                tombstoned: false,
            });
            record.tombstoned = true;
        }
    }
}

fn notify(state: &State, touched: Vec<RecordKey>) {
    if touched.is_empty() {
        return;
    }
    let event = ChangeEvent { touched };
    for subscriber in &state.subscribers {
        (subscriber.callback)(&event);
    }
}

fn encode_snapshot(state: &State) -> Vec<u8> {
    let records = state.records.clone();
    let changes = state.changes.clone();
    let frontier = state.frontier.clone();
    let integrity = integrity_hash(&records, &changes);
    let snapshot = Snapshot {
        records,
        changes,
        frontier,
        integrity,
    };
    bincode::serialize(&snapshot).expect("snapshot always serializes")
}

fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, DocError> {
    let snapshot: Snapshot = bincode::deserialize(bytes).map_err(|_| DocError::CorruptSnapshot)?;
    let expected = integrity_hash(&snapshot.records, &snapshot.changes);
    if expected != snapshot.integrity {
        return Err(DocError::CorruptSnapshot);
    }
    Ok(snapshot)
}

fn integrity_hash(
    records: &BTreeMap<RecordKey, Record>,
    changes: &BTreeMap<ChangeHash, Change>,
) -> [u8; 32] {
    let encoded = bincode::serialize(&(records, changes)).expect("snapshot body always serializes");
    *blake3::hash(&encoded).as_bytes()
}

fn apply_snapshot(state: &mut State, snapshot: Snapshot) {
    state.records = snapshot.records;
    state.changes = snapshot.changes.clone();
    state.frontier = snapshot.frontier;
    state.heads = compute_heads(&snapshot.changes);
}

fn compute_heads(changes: &BTreeMap<ChangeHash, Change>) -> BTreeSet<ChangeHash> {
    let mut heads: BTreeSet<ChangeHash> = changes.keys().cloned().collect();
    for change in changes.values() {
        for parent in &change.parents {
            heads.remove(parent);
        }
    }
    heads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Scalar;

    fn actor(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    fn text(value: &str) -> FieldPatch {
        FieldPatch::Scalar(Scalar::Text(value.to_owned()))
    }

    #[test]
    fn commit_emits_one_event_with_touched_keys() {
        let doc = Document::in_memory(actor(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _handle = doc.subscribe(move |event| seen2.lock().push(event.touched.clone()));
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), text("drill"));
        doc.add_record(RecordKind::ResourceOffer, fields).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a = Document::in_memory(actor(1));
        let b = Document::in_memory(actor(2));

        let mut f1 = BTreeMap::new();
        f1.insert("name".to_string(), text("drill"));
        let id = a.add_record(RecordKind::ResourceOffer, f1).unwrap();

        let mut f2 = BTreeMap::new();
        f2.insert("description".to_string(), text("saw"));
        b.add_record(RecordKind::Need, f2).unwrap();

        let ab = Document::in_memory(actor(3));
        ab.merge_from(&a).unwrap();
        ab.merge_from(&b).unwrap();

        let ba = Document::in_memory(actor(4));
        ba.merge_from(&b).unwrap();
        ba.merge_from(&a).unwrap();

        assert_eq!(ab.export_snapshot(), ba.export_snapshot());

        // idempotence
        ab.merge_from(&a).unwrap();
        ab.merge_from(&b).unwrap();
        assert_eq!(ab.export_snapshot(), ba.export_snapshot());

        assert!(ab.get_record(RecordKind::ResourceOffer, id).is_some());
    }

    #[test]
    fn snapshot_round_trips() {
        let doc = Document::in_memory(actor(7));
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), text("drill"));
        doc.add_record(RecordKind::ResourceOffer, fields).unwrap();
        let bytes = doc.export_snapshot();

        let fresh = Document::in_memory(actor(7));
        fresh.import_snapshot(&bytes).unwrap();
        assert_eq!(fresh.export_snapshot(), bytes);
    }

    #[test]
    fn invariant_violation_aborts_whole_batch() {
        let doc = Document::in_memory(actor(1));
        doc.register_invariant(RecordKind::ResourceOffer, "count", |patch| {
            matches!(patch, FieldPatch::Scalar(Scalar::Int(n)) if *n >= 0)
        });
        let mut fields = BTreeMap::new();
        fields.insert("count".to_string(), FieldPatch::Scalar(Scalar::Int(-1)));
        let err = doc.add_record(RecordKind::ResourceOffer, fields).unwrap_err();
        assert!(matches!(err, DocError::ConflictInInvariant(_)));
        assert!(doc.list_records(RecordKind::ResourceOffer, None).is_empty());
    }

    #[test]
    fn partition_and_heal_resolves_concurrent_field_updates() {
        // S2: R1 updates `available`, R2 concurrently updates `name`
        // on the same record; since the two edits touch different
        // fields there is no LWW contention and both survive the
        // merge, byte-identically, regardless of merge direction.
        let seed = Document::in_memory(actor(0));
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), text("drill"));
        fields.insert(
            "available".to_string(),
            FieldPatch::Scalar(Scalar::Bool(true)),
        );
        let id = seed.add_record(RecordKind::ResourceOffer, fields).unwrap();

        let r1 = Document::in_memory(actor(1));
        r1.merge_from(&seed).unwrap();
        let r2 = Document::in_memory(actor(2));
        r2.merge_from(&seed).unwrap();

        let mut patch1 = BTreeMap::new();
        patch1.insert(
            "available".to_string(),
            FieldPatch::Scalar(Scalar::Bool(false)),
        );
        r1.update_record(RecordKind::ResourceOffer, id, patch1).unwrap();

        let mut patch2 = BTreeMap::new();
        patch2.insert("name".to_string(), text("hand drill"));
        r2.update_record(RecordKind::ResourceOffer, id, patch2).unwrap();

        r1.merge_from(&r2).unwrap();
        r2.merge_from(&r1).unwrap();

        assert_eq!(r1.export_snapshot(), r2.export_snapshot());
        let merged = r1.get_record(RecordKind::ResourceOffer, id).unwrap();
        let FieldValue::Scalar(name) = &merged.fields["name"] else {
            panic!()
        };
        assert_eq!(name.value, Scalar::Text("hand drill".into()));
        let FieldValue::Scalar(available) = &merged.fields["available"] else {
            panic!()
        };
        assert_eq!(available.value, Scalar::Bool(false));
    }

    #[test]
    fn sequence_append_and_remove_round_trip() {
        let doc = Document::in_memory(actor(1));
        let mut fields = BTreeMap::new();
        fields.insert(
            "tags".to_string(),
            FieldPatch::AppendToSequence(Scalar::Text("urgent".into())),
        );
        let id = doc.add_record(RecordKind::BulletinPost, fields).unwrap();

        let mut patch = BTreeMap::new();
        patch.insert(
            "tags".to_string(),
            FieldPatch::AppendToSequence(Scalar::Text("update".into())),
        );
        doc.update_record(RecordKind::BulletinPost, id, patch).unwrap();

        let record = doc.get_record(RecordKind::BulletinPost, id).unwrap();
        let FieldValue::Sequence(seq) = &record.fields["tags"] else {
            panic!()
        };
        assert_eq!(
            seq.live_values(),
            vec![&Scalar::Text("urgent".into()), &Scalar::Text("update".into())]
        );
    }
}
