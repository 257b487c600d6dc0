//! The replicated document store (C3): a CRDT document over typed
//! record tables, with a deterministic merge function, a compact
//! causal summary for minimal-delta sync, and an append-only
//! persistent backing.
//!
//! Every replica of the document can be merged into any other replica
//! and the outcome is independent of the order merges were applied in
//! (§3 invariants; §8 properties 1-2, 7).

mod causal;
mod change;
mod dot;
mod error;
mod field;
mod id;
mod persist;
mod pos;
mod record;
mod subscriber;

pub mod doc;

pub use crate::causal::CausalSummary;
pub use crate::change::{Change, Op};
pub use crate::dot::{Dot, HybridTimestamp};
pub use crate::doc::Document;
pub use crate::error::DocError;
pub use crate::field::{FieldPatch, FieldValue, GSet, LwwRegister, Scalar, SeqEntry, Sequence};
pub use crate::id::{ChangeHash, RecordId};
pub use crate::pos::Position;
pub use crate::record::{Record, RecordKey, RecordKind};
pub use crate::subscriber::{ChangeEvent, SubscriptionHandle};
