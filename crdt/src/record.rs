use crate::field::FieldValue;
use crate::id::RecordId;
use aidmesh_identity::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of record type tags (§3): nine thematic kinds plus an
/// extensibility tag for whatever a domain module needs next. The core
/// never interprets the fields of any of these — only the tag.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum RecordKind {
    ResourceOffer,
    Need,
    SkillOffer,
    BulletinPost,
    Event,
    HelpSession,
    CareCheckIn,
    GratitudeExpression,
    CommunityMetadata,
    Extension,
}

impl RecordKind {
    pub const ALL: [RecordKind; 10] = [
        RecordKind::ResourceOffer,
        RecordKind::Need,
        RecordKind::SkillOffer,
        RecordKind::BulletinPost,
        RecordKind::Event,
        RecordKind::HelpSession,
        RecordKind::CareCheckIn,
        RecordKind::GratitudeExpression,
        RecordKind::CommunityMetadata,
        RecordKind::Extension,
    ];
}

/// A record's key inside the document: its kind plus its id. Records
/// of different kinds may freely reuse the same [`RecordId`] value
/// without colliding, since the pair is what identifies a record.
pub type RecordKey = (RecordKind, RecordId);

/// One persisted item (§3 "Record (abstract)"). Bodies are opaque
/// field maps; the core never downcasts them to a domain struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    pub creator: PeerId,
    pub created_at_millis: u64,
    pub fields: BTreeMap<String, FieldValue>,
    /// Soft-delete marker (§3 "Lifecycles": records are never hard
    /// deleted). Tombstoned records stay in the table, merge normally,
    /// and are filtered out of default listings.
    pub tombstoned: bool,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        (self.kind, self.id)
    }
}
