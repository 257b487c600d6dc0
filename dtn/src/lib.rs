//! The delay-tolerant bundle layer (C6, §4.6): store-carry-forward
//! delivery with priority scheduling, expiry, and epidemic exchange on
//! contact, layered on top of [`aidmesh_mesh`]'s `bundle`-typed mesh
//! messages.
//!
//! Directed traffic the mesh manager could not deliver immediately
//! (§4.5 "Failure semantics") is handed here automatically; nothing
//! above this crate needs to retry a failed send itself.

mod bundle;
mod control;
mod error;
mod id;
mod layer;
mod store;

pub use crate::bundle::{Bundle, Priority};
pub use crate::control::{BundleControl, BundleDigest};
pub use crate::error::DtnError;
pub use crate::id::BundleId;
pub use crate::layer::{BundleLayer, DtnConfig};
pub use crate::store::BundleStore;
