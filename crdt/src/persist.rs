//! On-disk backing for the document store (§6 "Persistent layout"):
//! an append-only change log (`document.log`) and a periodic
//! checkpoint (`document.snapshot`), as two independent `sled`
//! databases under the node's data directory. Checkpointing never
//! blocks readers: it opens its own transaction against the snapshot
//! tree while the log tree keeps accepting appends (§4.1
//! "Checkpointing is non-blocking with respect to reads").

use crate::change::Change;
use crate::error::DocError;
use crate::id::ChangeHash;
use std::path::Path;

const CHANGES_TREE: &str = "changes";
const SNAPSHOT_KEY: &[u8] = b"snapshot";

pub struct ChangeLog {
    db: sled::Db,
}

impl ChangeLog {
    pub fn open(dir: &Path) -> Result<Self, DocError> {
        let db = sled::open(dir.join("document.log"))?;
        Ok(Self { db })
    }

    pub fn append(&self, change: &Change) -> Result<(), DocError> {
        let tree = self.db.open_tree(CHANGES_TREE)?;
        let encoded = bincode::serialize(change)?;
        tree.insert(change.hash.as_bytes(), encoded)?;
        // fsync-equivalent: commit is not durable until this returns (§5).
        self.db.flush()?;
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<Change>, DocError> {
        let tree = self.db.open_tree(CHANGES_TREE)?;
        let mut changes = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            changes.push(bincode::deserialize(&value)?);
        }
        Ok(changes)
    }

    pub fn contains(&self, hash: &ChangeHash) -> Result<bool, DocError> {
        let tree = self.db.open_tree(CHANGES_TREE)?;
        Ok(tree.contains_key(hash.as_bytes())?)
    }
}

pub struct SnapshotStore {
    db: sled::Db,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> Result<Self, DocError> {
        let db = sled::open(dir.join("document.snapshot"))?;
        Ok(Self { db })
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), DocError> {
        self.db.insert(SNAPSHOT_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn read(&self) -> Result<Option<Vec<u8>>, DocError> {
        Ok(self.db.get(SNAPSHOT_KEY)?.map(|ivec| ivec.to_vec()))
    }
}
