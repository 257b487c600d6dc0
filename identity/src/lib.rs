//! Crypto primitives (C1) and self-sovereign identity (C2).
//!
//! Every node is a keypair. The public half, base-encoded with a short
//! type tag, is the node's self-certifying identifier (`PeerId`):
//! possession of the matching private key is proof of ownership, so no
//! central authority ever issues or revokes one.
//!
//! The private key never leaves this crate except sealed behind a
//! passphrase (see [`sealed`]). Everything above this crate — the
//! document store, the mesh manager, the session layer — only ever
//! holds a [`PeerId`] or asks this crate to sign/verify/box/unbox on its
//! behalf.

mod crypto;
mod error;
mod identity;
mod peer_id;
pub mod sealed;

pub use crate::crypto::{BoxedMessage, Keypair, PublicKeys, SignedMessage};
pub use crate::error::IdentityError;
pub use crate::identity::Identity;
pub use crate::peer_id::PeerId;
pub use crate::sealed::SealedIdentity;
