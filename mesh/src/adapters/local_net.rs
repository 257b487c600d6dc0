//! Local-network P2P adapter, WebRTC-class (§4.4): ordered, larger-frame
//! data channels. Connection setup/signaling is the `Link`'s concern;
//! this adapter only frames and delivers whole messages.

use crate::adapter::{AdapterEvent, AdapterKind, AdapterStatus, Link, LinkEvent, TransportAdapter};
use crate::error::MeshError;
use crate::message::MeshMessage;
use aidmesh_identity::PeerId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn status_from_u8(value: u8) -> AdapterStatus {
    match value {
        1 => AdapterStatus::Connecting,
        2 => AdapterStatus::Connected,
        3 => AdapterStatus::Error,
        _ => AdapterStatus::Disconnected,
    }
}

pub struct LocalNetAdapter {
    link: Arc<dyn Link>,
    status: AtomicU8,
    events_tx: mpsc::Sender<AdapterEvent>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalNetAdapter {
    pub fn new(link: Arc<dyn Link>) -> (Self, mpsc::Receiver<AdapterEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Self {
                link,
                status: AtomicU8::new(0),
                events_tx,
                recv_task: Mutex::new(None),
            },
            events_rx,
        )
    }
}

#[async_trait]
impl TransportAdapter for LocalNetAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::LocalNet
    }

    async fn start(&self) -> Result<(), MeshError> {
        self.status.store(2, Ordering::SeqCst);
        let link = self.link.clone();
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = link.recv_raw().await {
                match event {
                    LinkEvent::Frame { bytes, .. } => {
                        if let Ok(message) = MeshMessage::decode(&bytes) {
                            let _ = tx.send(AdapterEvent::MessageReceived(message)).await;
                        }
                    }
                    LinkEvent::PeerSighted { peer, signal_strength } => {
                        let _ = tx
                            .send(AdapterEvent::PeerFound { peer, signal_strength })
                            .await;
                    }
                    LinkEvent::PeerLost(peer) => {
                        let _ = tx.send(AdapterEvent::PeerLost(peer)).await;
                    }
                }
            }
        });
        *self.recv_task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MeshError> {
        self.status.store(0, Ordering::SeqCst);
        if let Some(handle) = self.recv_task.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    fn current_status(&self) -> AdapterStatus {
        status_from_u8(self.status.load(Ordering::SeqCst))
    }

    async fn discover_peers(&self) {
        self.link.discover().await;
    }

    async fn send(&self, message: &MeshMessage, target: Option<PeerId>) -> Result<(), MeshError> {
        self.link.send_raw(&message.encode(), target).await
    }
}
