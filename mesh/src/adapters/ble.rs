//! Short-range radio adapter, BLE-class (§4.4): MTU-constrained
//! (~20 bytes), chunked with a sequence header, reassembled on
//! receive. Out-of-order and duplicate chunks are tolerated within a
//! bounded reassembly window.

use crate::adapter::{AdapterEvent, AdapterKind, AdapterStatus, Link, LinkEvent, TransportAdapter};
use crate::error::MeshError;
use crate::message::MeshMessage;
use aidmesh_identity::PeerId;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// BLE's advertised-data-style MTU (§4.4 "~20 bytes").
const MTU: usize = 20;
const HEADER_LEN: usize = 3;
const CHUNK_PAYLOAD: usize = MTU - HEADER_LEN;
/// How many concurrent in-flight reassemblies per peer the bounded
/// window tolerates before the oldest is evicted.
const REASSEMBLY_WINDOW: usize = 32;

fn chunk(short_id: u8, bytes: &[u8]) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_PAYLOAD).collect();
    let total = chunks.len().max(1) as u8;
    if bytes.is_empty() {
        return vec![vec![short_id, 0, total]];
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
            frame.push(short_id);
            frame.push(i as u8);
            frame.push(total);
            frame.extend_from_slice(data);
            frame
        })
        .collect()
}

struct Reassembly {
    total: u8,
    have: u8,
    parts: Vec<Option<Vec<u8>>>,
}

/// Per-sender reassembly state, bounded so a misbehaving or very chatty
/// peer cannot grow memory without bound (§5 memory budget).
struct Reassembler {
    by_peer: Mutex<LruCache<(PeerId, u8), Reassembly>>,
}

impl Reassembler {
    fn new() -> Self {
        Self {
            by_peer: Mutex::new(LruCache::new(NonZeroUsize::new(REASSEMBLY_WINDOW).unwrap())),
        }
    }

    /// Feeds one chunk in; returns the reassembled message bytes once
    /// every chunk has arrived (duplicates are harmless no-ops).
    fn feed(&self, from: PeerId, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        let short_id = frame[0];
        let index = frame[1];
        let total = frame[2];
        let data = &frame[HEADER_LEN..];

        let mut cache = self.by_peer.lock();
        let key = (from, short_id);
        if !cache.contains(&key) {
            cache.put(
                key,
                Reassembly {
                    total,
                    have: 0,
                    parts: vec![None; total.max(1) as usize],
                },
            );
        }
        let entry = cache.get_mut(&key).expect("just inserted");
        if let Some(slot) = entry.parts.get_mut(index as usize) {
            if slot.is_none() {
                *slot = Some(data.to_vec());
                entry.have += 1;
            }
        }
        if entry.have >= entry.total.max(1) {
            let parts = entry.parts.clone();
            cache.pop(&key);
            let mut out = Vec::new();
            for part in parts {
                out.extend_from_slice(&part.unwrap_or_default());
            }
            Some(out)
        } else {
            None
        }
    }
}

/// Atomic-compatible encoding of [`AdapterStatus`].
fn status_from_u8(value: u8) -> AdapterStatus {
    match value {
        1 => AdapterStatus::Connecting,
        2 => AdapterStatus::Connected,
        3 => AdapterStatus::Error,
        _ => AdapterStatus::Disconnected,
    }
}

pub struct BleAdapter {
    link: Arc<dyn Link>,
    status: AtomicU8,
    events_tx: mpsc::Sender<AdapterEvent>,
    reassembler: Arc<Reassembler>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleAdapter {
    pub fn new(link: Arc<dyn Link>) -> (Self, mpsc::Receiver<AdapterEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Self {
                link,
                status: AtomicU8::new(0),
                events_tx,
                reassembler: Arc::new(Reassembler::new()),
                recv_task: Mutex::new(None),
            },
            events_rx,
        )
    }
}

#[async_trait]
impl TransportAdapter for BleAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Ble
    }

    async fn start(&self) -> Result<(), MeshError> {
        self.status.store(2, Ordering::SeqCst);
        let link = self.link.clone();
        let tx = self.events_tx.clone();
        let reassembler = self.reassembler.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = link.recv_raw().await {
                match event {
                    LinkEvent::Frame { from, bytes } => {
                        if let Some(full) = reassembler.feed(from, &bytes) {
                            if let Ok(message) = MeshMessage::decode(&full) {
                                let _ = tx.send(AdapterEvent::MessageReceived(message)).await;
                            }
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
        // Active discovery on BLE-class hardware often needs a user
        // gesture on the host platform (§4.4); this call just asks the
        // link to run whatever passive/active scan it supports.
        self.link.discover().await;
    }

    async fn send(&self, message: &MeshMessage, target: Option<PeerId>) -> Result<(), MeshError> {
        let encoded = message.encode();
        let mut short_id = [0u8; 1];
        OsRng.fill_bytes(&mut short_id);
        for frame in chunk(short_id[0], &encoded) {
            self.link.send_raw(&frame, target).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_out_of_order_chunks() {
        let reassembler = Reassembler::new();
        let peer = PeerId::from_public_key_bytes([1; 32]);
        let payload = vec![7u8; 50];
        let mut chunks = chunk(42, &payload);
        chunks.reverse();
        let mut result = None;
        for frame in &chunks {
            result = reassembler.feed(peer, frame);
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn duplicate_chunks_are_harmless() {
        let reassembler = Reassembler::new();
        let peer = PeerId::from_public_key_bytes([2; 32]);
        let payload = vec![1u8, 2, 3];
        let chunks = chunk(7, &payload);
        for frame in &chunks {
            reassembler.feed(peer, frame);
        }
        // re-feed first chunk again; should not double count or panic.
        let result = reassembler.feed(peer, &chunks[0]);
        assert!(result.is_none());
    }
}
