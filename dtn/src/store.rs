//! The bundle store (§4.6, §6 `bundles.db`): a `sled`-backed table of
//! held bundles, with dequeue ordering (§4.6 "Scheduling") and
//! pressure-driven eviction (§4.6 "Eviction under pressure").

use crate::bundle::Bundle;
use crate::error::DtnError;
use crate::id::BundleId;
use std::cmp::Reverse;
use std::path::Path;

const BUNDLES_TREE: &str = "bundles";

#[derive(serde::Serialize, serde::Deserialize)]
struct Entry {
    seq: u64,
    bundle: Bundle,
}

/// Single-writer, bounded-queue backing for DTN bundles (§5 "The
/// bundle store is single-writer and uses a bounded queue").
pub struct BundleStore {
    db: sled::Db,
}

impl BundleStore {
    pub fn open(dir: &Path) -> Result<Self, DtnError> {
        let db = sled::open(dir.join("bundles.db"))?;
        Ok(Self { db })
    }

    /// An ephemeral, disk-backed-but-unlinked store for tests.
    pub fn in_memory() -> Self {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db always opens");
        Self { db }
    }

    fn tree(&self) -> Result<sled::Tree, DtnError> {
        Ok(self.db.open_tree(BUNDLES_TREE)?)
    }

    /// Inserts (or overwrites, keyed by bundle id) a bundle, tagging it
    /// with a monotonic sequence number for FIFO tie-breaks (§4.6
    /// "within equal expiry, FIFO").
    pub fn insert(&self, bundle: Bundle) -> Result<(), DtnError> {
        let seq = self.db.generate_id()?;
        let tree = self.tree()?;
        let entry = Entry { seq, bundle: bundle.clone() };
        tree.insert(bundle.id.as_bytes(), bincode::serialize(&entry)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn remove(&self, id: &BundleId) -> Result<Option<Bundle>, DtnError> {
        let tree = self.tree()?;
        let removed = tree.remove(id.as_bytes())?;
        self.db.flush()?;
        Ok(removed
            .map(|bytes| bincode::deserialize::<Entry>(&bytes))
            .transpose()?
            .map(|entry| entry.bundle))
    }

    pub fn get(&self, id: &BundleId) -> Result<Option<Bundle>, DtnError> {
        let tree = self.tree()?;
        Ok(tree
            .get(id.as_bytes())?
            .map(|bytes| bincode::deserialize::<Entry>(&bytes))
            .transpose()?
            .map(|entry| entry.bundle))
    }

    pub fn contains(&self, id: &BundleId) -> Result<bool, DtnError> {
        Ok(self.tree()?.contains_key(id.as_bytes())?)
    }

    fn entries(&self) -> Result<Vec<Entry>, DtnError> {
        let tree = self.tree()?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn all(&self) -> Result<Vec<Bundle>, DtnError> {
        Ok(self.entries()?.into_iter().map(|e| e.bundle).collect())
    }

    pub fn total_bytes(&self) -> Result<u64, DtnError> {
        Ok(self.all()?.iter().map(|b| b.encode().len() as u64).sum())
    }

    pub fn len(&self) -> Result<usize, DtnError> {
        Ok(self.tree()?.len())
    }

    /// Outbound dequeue order (§4.6 "Scheduling"): strict priority,
    /// then earliest expiry, then FIFO.
    pub fn dequeue_order(&self) -> Result<Vec<Bundle>, DtnError> {
        let mut entries = self.entries()?;
        entries.sort_by_key(|e| (e.bundle.priority, e.bundle.expiry_millis, e.seq));
        Ok(entries.into_iter().map(|e| e.bundle).collect())
    }

    /// Removes every bundle expired as of `now_millis` (§4.6
    /// "Expiry": periodic sweep plus pre-forward check).
    pub fn purge_expired(&self, now_millis: u64) -> Result<Vec<BundleId>, DtnError> {
        let mut purged = Vec::new();
        for entry in self.entries()? {
            if entry.bundle.is_expired(now_millis) {
                self.remove(&entry.bundle.id)?;
                purged.push(entry.bundle.id);
            }
        }
        Ok(purged)
    }

    /// Evicts bundles until total size is at or under `budget_bytes`
    /// (§4.6 "Eviction under pressure"): lowest priority first, then
    /// greatest remaining TTL first within that priority, so that
    /// time-critical (soon-to-expire) entries of the same priority
    /// survive longest.
    pub fn evict_to_budget(&self, budget_bytes: u64, now_millis: u64) -> Result<Vec<BundleId>, DtnError> {
        let mut entries = self.entries()?;
        entries.sort_by_key(|e| {
            (
                Reverse(e.bundle.priority),
                Reverse(e.bundle.remaining_ttl_millis(now_millis)),
            )
        });
        let mut total: u64 = entries.iter().map(|e| e.bundle.encode().len() as u64).sum();
        let mut evicted = Vec::new();
        for entry in entries {
            if total <= budget_bytes {
                break;
            }
            let size = entry.bundle.encode().len() as u64;
            self.remove(&entry.bundle.id)?;
            total = total.saturating_sub(size);
            evicted.push(entry.bundle.id);
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Bundle, Priority};
    use aidmesh_identity::PeerId;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_public_key_bytes([byte; 32])
    }

    fn bundle(priority: Priority, expiry_ms: u64, size: usize) -> Bundle {
        Bundle::new(peer(1), None, 0, expiry_ms, priority, vec![0u8; size])
    }

    #[test]
    fn dequeue_order_is_priority_then_expiry_then_fifo() {
        let store = BundleStore::in_memory();
        let low = bundle(Priority::Low, 10_000, 8);
        let high_later = bundle(Priority::High, 5_000, 8);
        let high_sooner = bundle(Priority::High, 1_000, 8);
        store.insert(low.clone()).unwrap();
        store.insert(high_later.clone()).unwrap();
        store.insert(high_sooner.clone()).unwrap();

        let order = store.dequeue_order().unwrap();
        let ids: Vec<_> = order.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![high_sooner.id, high_later.id, low.id]);
    }

    #[test]
    fn expired_bundles_are_purged() {
        let store = BundleStore::in_memory();
        let expired = bundle(Priority::Normal, 100, 8);
        let fresh = bundle(Priority::Normal, 100_000, 8);
        store.insert(expired.clone()).unwrap();
        store.insert(fresh.clone()).unwrap();

        let purged = store.purge_expired(1_000).unwrap();
        assert_eq!(purged, vec![expired.id]);
        assert!(store.get(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn eviction_under_pressure_drops_lowest_priority_first() {
        // S5: budget 1_000_000 bytes, bundles at
        // critical/high/normal/low totaling 1_500_000.
        let store = BundleStore::in_memory();
        let critical = bundle(Priority::Critical, 1_000_000, 200_000 - 32);
        let high = bundle(Priority::High, 1_000_000, 400_000 - 32);
        let normal = bundle(Priority::Normal, 1_000_000, 500_000 - 32);
        let low = bundle(Priority::Low, 1_000_000, 400_000 - 32);
        for b in [&critical, &high, &normal, &low] {
            store.insert(b.clone()).unwrap();
        }

        let evicted = store.evict_to_budget(1_000_000, 0).unwrap();
        assert!(evicted.contains(&low.id));
        assert!(store.get(&critical.id).unwrap().is_some());
        assert!(store.get(&high.id).unwrap().is_some());
        assert!(store.total_bytes().unwrap() <= 1_000_000);
    }
}
