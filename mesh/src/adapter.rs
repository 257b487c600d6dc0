//! The transport adapter interface (§4.4) and the hardware boundary it
//! is split across (SPEC_FULL §4.4): medium-specific framing, fully
//! implemented here, against a small [`Link`] trait a platform
//! integration would implement over the real BLE/WebRTC/LoRa stack.

use crate::error::MeshError;
use crate::message::MeshMessage;
use aidmesh_identity::PeerId;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Which physical medium an adapter speaks, also used as the §4.5
/// tie-break key (WebRTC-class > BLE-class > LoRa-class).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AdapterKind {
    /// Short-range radio, BLE-class (§4.4).
    Ble,
    /// Local-network P2P, WebRTC-class (§4.4).
    LocalNet,
    /// Long-range low-bandwidth radio, LoRa-class (§4.4).
    Lora,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterKind::Ble => "ble",
            AdapterKind::LocalNet => "local-net",
            AdapterKind::Lora => "lora",
        };
        write!(f, "{name}")
    }
}

/// §4.4 `current_status`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// The three sum-typed events an adapter reports (§9 REDESIGN FLAGS:
/// "no open-ended listener registry" — one observer channel per
/// adapter instead).
#[derive(Debug)]
pub enum AdapterEvent {
    MessageReceived(MeshMessage),
    PeerFound {
        peer: PeerId,
        signal_strength: Option<i8>,
    },
    PeerLost(PeerId),
}

/// The platform boundary (SPEC_FULL §4.4): a real integration
/// implements this against the OS Bluetooth/WebRTC/radio stack. The
/// only implementation shipped in this crate is
/// [`crate::adapters::memory_link::MemoryLink`], for tests and
/// in-process multi-node demos.
/// One raw frame observed by a [`Link`]: either an inbound payload
/// from a link-local peer, or a discovery sighting.
#[derive(Debug)]
pub enum LinkEvent {
    Frame { from: PeerId, bytes: Vec<u8> },
    PeerSighted { peer: PeerId, signal_strength: Option<i8> },
    PeerLost(PeerId),
}

#[async_trait]
pub trait Link: Send + Sync {
    /// Sends a raw frame, optionally to a specific link-local peer
    /// (`None` broadcasts to everyone reachable). Does not retry
    /// (§4.4): a single failed attempt is reported and the caller
    /// decides what to do about it.
    async fn send_raw(&self, frame: &[u8], target: Option<PeerId>) -> Result<(), MeshError>;

    /// Receives the next raw link event (inbound frame or discovery
    /// sighting). Adapters poll this in a loop once started.
    async fn recv_raw(&self) -> Option<LinkEvent>;

    /// Requests a (possibly passive) peer discovery pass.
    async fn discover(&self);
}

/// One transport medium (§4.4). Adapters translate between
/// [`MeshMessage`] and a medium-specific frame; they never sign,
/// encrypt, route, or interpret payloads (§4.4).
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    async fn start(&self) -> Result<(), MeshError>;
    async fn stop(&self) -> Result<(), MeshError>;
    fn current_status(&self) -> AdapterStatus;

    async fn discover_peers(&self);

    /// `send(message, optional_target)` (§4.4). Adapters report errors
    /// per attempt; they never retry (§4.4, §5 "for directed traffic,
    /// cause the message to be handed to C6 as a bundle").
    async fn send(&self, message: &MeshMessage, target: Option<PeerId>) -> Result<(), MeshError>;
}

/// An adapter plus the receiving half of its single observer channel
/// (§9 REDESIGN FLAGS: "no open-ended listener registry"). Returned by
/// each adapter constructor; the mesh manager drains the channel for
/// the lifetime of the adapter (§4.5 "Registers itself as observer on
/// every adapter").
pub struct AdapterHandle {
    pub adapter: std::sync::Arc<dyn TransportAdapter>,
    pub events: mpsc::Receiver<AdapterEvent>,
}
