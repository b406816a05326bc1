//! Per-taxon sequence storage.
//!
//! An [`Alignment`](crate::model::Alignment) never owns its sequence strings
//! directly: they live behind a [`SequenceStore`]. Two stores exist:
//!
//! - [`MemoryStore`]: a plain map, used by default and in tests.
//! - [`DiskStore`]: one scratch file per taxon inside a shared
//!   [`ScratchDir`], keyed by (store id, taxon). Only the file handles live in
//!   memory, which bounds memory use for datasets with many large loci.
//!
//! Which store an alignment gets is decided once, by the [`StorageBackend`]
//! carried in the parse options.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use tempfile::TempDir;
use thiserror::Error;

/// Errors raised by sequence stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Scratch storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No sequence stored for taxon '{0}'")]
    MissingTaxon(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for the sequences of one alignment, keyed by taxon name.
pub trait SequenceStore: Send + Sync + fmt::Debug {
    /// Returns the sequence of `taxon`.
    fn get(&self, taxon: &str) -> StoreResult<String>;

    /// Stores (or overwrites) the sequence of `taxon`.
    fn put(&mut self, taxon: &str, data: &str) -> StoreResult<()>;

    /// Drops `taxon`. Removing an absent taxon is a no-op.
    fn remove(&mut self, taxon: &str) -> StoreResult<()>;

    /// Returns true if a sequence is stored for `taxon`.
    fn contains(&self, taxon: &str) -> bool;

    /// Duplicates the stored data into an independent working copy.
    fn fork(&self) -> StoreResult<Box<dyn SequenceStore>>;
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    sequences: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceStore for MemoryStore {
    fn get(&self, taxon: &str) -> StoreResult<String> {
        self.sequences
            .get(taxon)
            .cloned()
            .ok_or_else(|| StoreError::MissingTaxon(taxon.to_string()))
    }

    fn put(&mut self, taxon: &str, data: &str) -> StoreResult<()> {
        self.sequences.insert(taxon.to_string(), data.to_string());
        Ok(())
    }

    fn remove(&mut self, taxon: &str) -> StoreResult<()> {
        self.sequences.remove(taxon);
        Ok(())
    }

    fn contains(&self, taxon: &str) -> bool {
        self.sequences.contains_key(taxon)
    }

    fn fork(&self) -> StoreResult<Box<dyn SequenceStore>> {
        Ok(Box::new(self.clone()))
    }
}

/// Shared scratch directory, removed when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct ScratchDir(Arc<TempDir>);

impl ScratchDir {
    /// Creates a scratch directory under the system temporary directory.
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("alnkit-").tempdir()?;
        Ok(Self(Arc::new(dir)))
    }

    /// Creates a scratch directory inside `parent`.
    pub fn new_in<P: AsRef<Path>>(parent: P) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("alnkit-").tempdir_in(parent)?;
        Ok(Self(Arc::new(dir)))
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }
}

/// File-backed store: one file per taxon, named after the store id and a
/// per-store counter so taxon names never reach the filesystem.
#[derive(Debug)]
pub struct DiskStore {
    dir: ScratchDir,
    id: u64,
    next_slot: usize,
    files: HashMap<String, PathBuf>,
}

impl DiskStore {
    pub fn new(dir: ScratchDir) -> Self {
        Self {
            dir,
            id: rand::random::<u64>(),
            next_slot: 0,
            files: HashMap::new(),
        }
    }

    fn slot_path(&mut self) -> PathBuf {
        let path = self
            .dir
            .path()
            .join(format!("{:016x}_{}.seq", self.id, self.next_slot));
        self.next_slot += 1;
        path
    }
}

impl SequenceStore for DiskStore {
    fn get(&self, taxon: &str) -> StoreResult<String> {
        let path = self
            .files
            .get(taxon)
            .ok_or_else(|| StoreError::MissingTaxon(taxon.to_string()))?;
        Ok(fs::read_to_string(path)?)
    }

    fn put(&mut self, taxon: &str, data: &str) -> StoreResult<()> {
        let path = match self.files.get(taxon) {
            Some(path) => path.clone(),
            None => self.slot_path(),
        };
        fs::write(&path, data)?;
        self.files.insert(taxon.to_string(), path);
        Ok(())
    }

    fn remove(&mut self, taxon: &str) -> StoreResult<()> {
        if let Some(path) = self.files.remove(taxon) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn contains(&self, taxon: &str) -> bool {
        self.files.contains_key(taxon)
    }

    fn fork(&self) -> StoreResult<Box<dyn SequenceStore>> {
        let mut copy = DiskStore::new(self.dir.clone());
        for (taxon, source) in &self.files {
            let target = copy.slot_path();
            fs::copy(source, &target)?;
            copy.files.insert(taxon.clone(), target);
        }
        Ok(Box::new(copy))
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        for path in self.files.values() {
            if let Err(e) = fs::remove_file(path) {
                debug!("Could not remove scratch file {}: {}", path.display(), e);
            }
        }
    }
}

/// Which store new alignments are created with.
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Disk(ScratchDir),
}

impl StorageBackend {
    /// Disk backend in a fresh system scratch directory.
    pub fn disk() -> io::Result<Self> {
        Ok(StorageBackend::Disk(ScratchDir::new()?))
    }

    /// Creates an empty store for this backend.
    pub fn create_store(&self) -> Box<dyn SequenceStore> {
        match self {
            StorageBackend::Memory => Box::new(MemoryStore::new()),
            StorageBackend::Disk(dir) => Box::new(DiskStore::new(dir.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &mut dyn SequenceStore) {
        store.put("taxon_a", "acgt").unwrap();
        store.put("taxon_b", "tt--").unwrap();
        assert_eq!(store.get("taxon_a").unwrap(), "acgt");
        assert!(store.contains("taxon_b"));

        store.put("taxon_a", "aaaa").unwrap();
        assert_eq!(store.get("taxon_a").unwrap(), "aaaa");

        store.remove("taxon_b").unwrap();
        assert!(!store.contains("taxon_b"));
        assert!(matches!(store.get("taxon_b"), Err(StoreError::MissingTaxon(_))));
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        exercise(&mut store);
    }

    #[test]
    fn test_disk_store() {
        let parent = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new_in(parent.path()).unwrap();
        let mut store = DiskStore::new(dir);
        exercise(&mut store);
    }

    #[test]
    fn test_fork_is_independent() {
        let parent = tempfile::tempdir().unwrap();
        let backend = StorageBackend::Disk(ScratchDir::new_in(parent.path()).unwrap());
        for backend in [StorageBackend::Memory, backend] {
            let mut store = backend.create_store();
            store.put("x", "acgt").unwrap();

            let mut copy = store.fork().unwrap();
            copy.put("x", "nnnn").unwrap();
            copy.put("y", "----").unwrap();

            assert_eq!(store.get("x").unwrap(), "acgt");
            assert!(!store.contains("y"));
            assert_eq!(copy.get("x").unwrap(), "nnnn");
        }
    }

    #[test]
    fn test_disk_store_cleans_up_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let dir = ScratchDir::new_in(parent.path()).unwrap();
        {
            let mut store = DiskStore::new(dir.clone());
            store.put("x", "acgt").unwrap();
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
