//! The only [`Link`] implementation shipped in this crate: an
//! in-process, in-memory medium for tests and local multi-node demos
//! (SPEC_FULL §4.4). Production wiring of each adapter kind to real
//! BLE/WebRTC/LoRa hardware is out of scope for this crate.

use crate::adapter::{Link, LinkEvent};
use crate::error::MeshError;
use aidmesh_identity::PeerId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// A shared in-memory "ether" that a test or demo process's nodes all
/// register against. Frames sent with `target: None` fan out to every
/// other registered peer; a specific target is delivered only to that
/// peer's inbox.
pub struct MemoryNetwork {
    inboxes: Mutex<HashMap<PeerId, mpsc::Sender<LinkEvent>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: Mutex::new(HashMap::new()),
        })
    }

    /// Registers `peer` on the network and returns a [`MemoryLink`] for it.
    pub fn join(self: &Arc<Self>, peer: PeerId) -> MemoryLink {
        let (tx, rx) = mpsc::channel(256);
        self.inboxes.lock().insert(peer, tx);
        MemoryLink {
            network: self.clone(),
            local: peer,
            inbox: AsyncMutex::new(rx),
        }
    }

    pub fn leave(&self, peer: &PeerId) {
        self.inboxes.lock().remove(peer);
    }

    fn deliver(&self, from: PeerId, target: Option<PeerId>, bytes: Vec<u8>) {
        let inboxes = self.inboxes.lock();
        match target {
            Some(to) => {
                if let Some(tx) = inboxes.get(&to) {
                    let _ = tx.try_send(LinkEvent::Frame {
                        from,
                        bytes: bytes.clone(),
                    });
                }
            }
            None => {
                for (peer, tx) in inboxes.iter() {
                    if *peer == from {
                        continue;
                    }
                    let _ = tx.try_send(LinkEvent::Frame {
                        from,
                        bytes: bytes.clone(),
                    });
                }
            }
        }
    }

    fn announce_discovery(&self, from: PeerId) {
        let inboxes = self.inboxes.lock();
        for (peer, tx) in inboxes.iter() {
            if *peer == from {
                continue;
            }
            let _ = tx.try_send(LinkEvent::PeerSighted {
                peer: from,
                signal_strength: None,
            });
        }
    }
}

pub struct MemoryLink {
    network: Arc<MemoryNetwork>,
    local: PeerId,
    inbox: AsyncMutex<mpsc::Receiver<LinkEvent>>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send_raw(&self, frame: &[u8], target: Option<PeerId>) -> Result<(), MeshError> {
        self.network.deliver(self.local, target, frame.to_vec());
        Ok(())
    }

    async fn recv_raw(&self) -> Option<LinkEvent> {
        self.inbox.lock().await.recv().await
    }

    async fn discover(&self) {
        self.network.announce_discovery(self.local);
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.network.leave(&self.local);
    }
}
