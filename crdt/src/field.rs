//! Field-level CRDTs (§3, SPEC_FULL §4.1): the three shapes a record
//! field can take, each merged according to its own algebra. Record
//! bodies stay opaque `BTreeMap<String, FieldValue>` maps from the
//! domain's perspective (§3); this module is what makes that map
//! mergeable.

use crate::dot::{Dot, HybridTimestamp};
use crate::pos::Position;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An opaque scalar leaf value.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    /// IEEE-754 bit pattern, so `Scalar` can derive `Eq`/`Ord` and stay
    /// deterministic across replicas without NaN-comparison pitfalls.
    FloatBits(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    pub fn float(value: f64) -> Self {
        Scalar::FloatBits(value.to_bits())
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::FloatBits(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// A last-writer-wins register. Field-level scalars merge by `(millis,
/// dot)` total order (§4.1): higher order wins, deterministically,
/// regardless of which replica applied which change first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LwwRegister {
    pub value: Scalar,
    pub timestamp: HybridTimestamp,
}

impl LwwRegister {
    pub fn new(value: Scalar, timestamp: HybridTimestamp) -> Self {
        Self { value, timestamp }
    }

    fn merge(&mut self, other: &LwwRegister) {
        if other.timestamp > self.timestamp {
            self.value = other.value.clone();
            self.timestamp = other.timestamp;
        }
    }
}

/// A grow-only set (§3: "grow-only for sets"). Tags and participant
/// lists never shrink at the CRDT layer; domain-level "removal" is
/// modeled as an application-level tombstone scalar if ever needed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GSet {
    pub elements: BTreeSet<Scalar>,
}

impl GSet {
    pub fn insert(&mut self, value: Scalar) {
        self.elements.insert(value);
    }

    fn merge(&mut self, other: &GSet) {
        self.elements.extend(other.elements.iter().cloned());
    }
}

/// One element of an ordered [`Sequence`]: a fractional position, a
/// value, and a tombstone. Keyed by the inserting dot so concurrent
/// inserts at the same logical position never collide and removal is
/// monotonic (§3: "ordered sequences with tombstones").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeqEntry {
    pub position: Position,
    pub value: Scalar,
    pub tombstoned: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub entries: BTreeMap<Dot, SeqEntry>,
}

impl Sequence {
    pub fn insert(&mut self, dot: Dot, position: Position, value: Scalar) {
        self.entries.insert(
            dot,
            SeqEntry {
                position,
                value,
                tombstoned: false,
            },
        );
    }

    pub fn tombstone(&mut self, dot: &Dot) {
        if let Some(entry) = self.entries.get_mut(dot) {
            entry.tombstoned = true;
        }
    }

    /// The live (non-tombstoned) values, in position order.
    pub fn live_values(&self) -> Vec<&Scalar> {
        let mut live: Vec<_> = self
            .entries
            .values()
            .filter(|e| !e.tombstoned)
            .collect();
        live.sort_by(|a, b| a.position.cmp(&b.position));
        live.into_iter().map(|e| &e.value).collect()
    }

    fn merge(&mut self, other: &Sequence) {
        for (dot, entry) in &other.entries {
            self.entries
                .entry(*dot)
                .and_modify(|existing| existing.tombstoned |= entry.tombstoned)
                .or_insert_with(|| entry.clone());
        }
    }
}

/// A record field's value: a scalar register, a grow-only set, or an
/// ordered sequence — the three shapes named in §3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FieldValue {
    Scalar(LwwRegister),
    Set(GSet),
    Sequence(Sequence),
}

impl FieldValue {
    /// Merges `other` into `self` in place. Mismatched variants (a bug
    /// in the caller, since a field's shape is fixed at schema time)
    /// resolve by keeping `self` unchanged; callers should never mix
    /// shapes for the same field name.
    pub fn merge(&mut self, other: &FieldValue) {
        match (self, other) {
            (FieldValue::Scalar(a), FieldValue::Scalar(b)) => a.merge(b),
            (FieldValue::Set(a), FieldValue::Set(b)) => a.merge(b),
            (FieldValue::Sequence(a), FieldValue::Sequence(b)) => a.merge(b),
            _ => {}
        }
    }
}

/// The write-side counterpart of [`FieldValue`]: what a caller of
/// [`crate::doc::Document::add_record`]/`update_record` supplies for a
/// field. The document stamps the CRDT metadata (dot, timestamp,
/// position) itself at commit time, so callers never touch it
/// directly — there is no timestamp to get wrong or forge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FieldPatch {
    /// Overwrite a scalar register.
    Scalar(Scalar),
    /// Add an element to a grow-only set.
    AddToSet(Scalar),
    /// Append an element to the end of a sequence.
    AppendToSequence(Scalar),
    /// Remove a previously-appended sequence element, identified by
    /// the dot the document assigned it when it was inserted (visible
    /// on the record's [`Sequence::entries`] keys).
    RemoveFromSequence(Dot),
}

impl FieldPatch {
    /// Applies this patch against the field's current value (absent on
    /// first write), stamping CRDT metadata from `dot`/`millis`.
    pub(crate) fn apply(
        self,
        existing: Option<&FieldValue>,
        dot: Dot,
        millis: u64,
    ) -> FieldValue {
        let timestamp = HybridTimestamp::new(millis, dot);
        match self {
            FieldPatch::Scalar(value) => FieldValue::Scalar(LwwRegister::new(value, timestamp)),
            FieldPatch::AddToSet(value) => {
                let mut set = match existing {
                    Some(FieldValue::Set(set)) => set.clone(),
                    _ => GSet::default(),
                };
                set.insert(value);
                FieldValue::Set(set)
            }
            FieldPatch::AppendToSequence(value) => {
                let mut sequence = match existing {
                    Some(FieldValue::Sequence(seq)) => seq.clone(),
                    _ => Sequence::default(),
                };
                let tail_position = sequence
                    .entries
                    .values()
                    .map(|e| e.position.clone())
                    .max();
                let position =
                    Position::between(tail_position.as_ref().unwrap_or(&Position::head()), None, &dot.actor.public_key_bytes());
                sequence.insert(dot, position, value);
                FieldValue::Sequence(sequence)
            }
            FieldPatch::RemoveFromSequence(target) => {
                let mut sequence = match existing {
                    Some(FieldValue::Sequence(seq)) => seq.clone(),
                    _ => Sequence::default(),
                };
                sequence.tombstone(&target);
                FieldValue::Sequence(sequence)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidmesh_identity::PeerId;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    #[test]
    fn lww_register_merge_is_commutative() {
        let d1 = Dot::new(peer(1), 1);
        let d2 = Dot::new(peer(2), 1);
        let mut a = LwwRegister::new(Scalar::Bool(true), HybridTimestamp::new(5, d1));
        let b = LwwRegister::new(Scalar::Bool(false), HybridTimestamp::new(3, d2));
        let mut a2 = a.clone();
        a.merge(&b);
        let mut b2 = b.clone();
        b2.merge(&a2);
        a2 = a;
        assert_eq!(format!("{:?}", a2.value), format!("{:?}", b2.value));
    }

    #[test]
    fn gset_merge_is_union() {
        let mut a = GSet::default();
        a.insert(Scalar::Text("tag-a".into()));
        let mut b = GSet::default();
        b.insert(Scalar::Text("tag-b".into()));
        a.merge(&b);
        assert_eq!(a.elements.len(), 2);
    }

    #[test]
    fn sequence_tombstone_is_monotonic_under_merge() {
        let d = Dot::new(peer(1), 1);
        let mut a = Sequence::default();
        a.insert(d, Position::head(), Scalar::Text("x".into()));
        let mut b = a.clone();
        b.tombstone(&d);
        a.merge(&b);
        assert!(a.entries.get(&d).unwrap().tombstoned);
    }
}
