//! Checkpoints, and the stores that receive them.
//!
//! Each node of a running pipeline delivers its serialized operator state for a checkpoint to a
//! [`CheckpointStore`]. Once every node delivered, the executor commits the checkpoint, and it
//! becomes the one a later execution can be restored from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifies a checkpoint; identifiers increase monotonically within one execution.
pub type CheckpointId = u64;

/// The states of all nodes of a pipeline at one checkpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Checkpoint {
    /// The checkpoint identifier.
    pub id: CheckpointId,
    /// The state of each node, by position in the pipeline; `None` for stateless operators.
    pub states: BTreeMap<usize, Option<Vec<u8>>>,
}

impl Checkpoint {
    /// An empty checkpoint.
    pub fn new(id: CheckpointId) -> Self {
        Checkpoint { id, states: BTreeMap::new() }
    }

    /// The state saved for the node at `index`.
    pub fn state(&self, index: usize) -> Option<Vec<u8>> {
        self.states.get(&index).cloned().flatten()
    }
}

/// Receives checkpoint states.
pub trait CheckpointStore: Send + Sync {
    /// Accepts the state of the node at `node` for checkpoint `id`.
    ///
    /// Returning `Ok` acknowledges receipt.
    fn deliver(&self, id: CheckpointId, node: usize, state: Option<Vec<u8>>) -> Result<()>;
    /// Marks checkpoint `id` as complete, discarding older ones.
    fn commit(&self, id: CheckpointId) -> Result<()>;
    /// The most recently committed checkpoint.
    fn latest(&self) -> Result<Option<Checkpoint>>;
}

#[derive(Debug, Default)]
struct Pending {
    partial: BTreeMap<CheckpointId, Checkpoint>,
}

impl Pending {
    fn deliver(&mut self, id: CheckpointId, node: usize, state: Option<Vec<u8>>) {
        self.partial.entry(id).or_insert_with(|| Checkpoint::new(id)).states.insert(node, state);
    }

    fn take(&mut self, id: CheckpointId) -> Result<Checkpoint> {
        let checkpoint = self
            .partial
            .remove(&id)
            .ok_or_else(|| Error::Internal(format!("checkpoint {} has no delivered states", id)))?;
        self.partial.retain(|other, _| *other > id);
        Ok(checkpoint)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps checkpoints in memory; clones share the same checkpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pending: Arc<Mutex<Pending>>,
    committed: Arc<Mutex<Option<Checkpoint>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn deliver(&self, id: CheckpointId, node: usize, state: Option<Vec<u8>>) -> Result<()> {
        lock(&self.pending).deliver(id, node, state);
        Ok(())
    }

    fn commit(&self, id: CheckpointId) -> Result<()> {
        let checkpoint = lock(&self.pending).take(id)?;
        *lock(&self.committed) = Some(checkpoint);
        Ok(())
    }

    fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(lock(&self.committed).clone())
    }
}

/// Writes committed checkpoints to a file, replacing it atomically.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    pending: Mutex<Pending>,
}

impl FileStore {
    /// A store writing to `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStore { path: path.as_ref().to_path_buf(), pending: Mutex::new(Pending::default()) }
    }

    /// The checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileStore {
    fn deliver(&self, id: CheckpointId, node: usize, state: Option<Vec<u8>>) -> Result<()> {
        lock(&self.pending).deliver(id, node, state);
        Ok(())
    }

    fn commit(&self, id: CheckpointId) -> Result<()> {
        let checkpoint = lock(&self.pending).take(id)?;
        let staging = self.path.with_extension("partial");
        std::fs::write(&staging, bincode::serialize(&checkpoint)?)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn latest(&self) -> Result<Option<Checkpoint>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_replace_older_checkpoints() {
        let store = MemoryStore::new();
        store.deliver(1, 0, Some(vec![1])).unwrap();
        store.deliver(1, 1, None).unwrap();
        store.deliver(2, 0, Some(vec![2])).unwrap();
        assert_eq!(store.latest().unwrap(), None);
        store.commit(1).unwrap();
        let latest = store.latest().unwrap().unwrap();
        assert_eq!((latest.id, latest.state(0), latest.state(1)), (1, Some(vec![1]), None));
        store.deliver(2, 1, None).unwrap();
        store.commit(2).unwrap();
        assert_eq!(store.latest().unwrap().unwrap().state(0), Some(vec![2]));
        assert!(matches!(store.commit(1), Err(Error::Internal(_))));
    }

    #[test]
    fn file_store_survives_reopening() {
        let path = std::env::temp_dir().join(format!("conduit-checkpoint-{}.bin", std::process::id()));
        let store = FileStore::new(&path);
        assert_eq!(store.latest().unwrap(), None);
        store.deliver(7, 0, Some(b"state".to_vec())).unwrap();
        store.commit(7).unwrap();
        let reopened = FileStore::new(&path);
        let latest = reopened.latest().unwrap().unwrap();
        assert_eq!(latest.id, 7);
        assert_eq!(latest.state(0), Some(b"state".to_vec()));
        std::fs::remove_file(&path).unwrap();
    }
}
