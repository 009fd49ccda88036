//! Local replica storage for reference holders.
//!
//! Chunks are immutable and self-certifying: a chunk's bytes must digest to
//! its name, which is checked on the way in and on the way out. Storage
//! sits on a content-addressed, integrity-checked on-disk cache; on top of
//! that the store enforces a byte budget so a vault never promises more
//! space than it was given.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;
use vaultex_model::ChunkName;

use crate::hash::IdHasher;

#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("chunk content does not digest to its name")]
    ContentMismatch,

    #[error("chunk store capacity exceeded")]
    InsufficientSpace,

    #[error("chunk not found")]
    NotFound,

    #[error("cache error: {0}")]
    Cache(#[from] cacache::Error),
}

#[derive(Clone, Debug)]
pub struct ChunkStoreOptions {
    pub root_dir: PathBuf,
    pub capacity_bytes: u64,
}

/// Budgeted, self-verifying chunk store.
pub struct ChunkStore {
    root_dir: PathBuf,
    hasher: Arc<dyn IdHasher>,
    capacity: u64,
    used: Mutex<u64>,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("root_dir", &self.root_dir)
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .finish()
    }
}

impl ChunkStore {
    /// Open (or create) a store under `options.root_dir`, re-counting the
    /// space already used by surviving entries.
    pub fn open(options: ChunkStoreOptions, hasher: Arc<dyn IdHasher>) -> Result<Self, ChunkStoreError> {
        let mut used = 0u64;
        // A fresh directory has no index yet; only count entries that parse.
        for metadata in cacache::list_sync(&options.root_dir).flatten() {
            used = used.saturating_add(metadata.size as u64);
        }
        debug!(root = %options.root_dir.display(), used, "chunk store opened");
        Ok(Self {
            root_dir: options.root_dir,
            hasher,
            capacity: options.capacity_bytes,
            used: Mutex::new(used),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        *self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used())
    }

    /// Persist a chunk. The bytes must digest to `name`; storing a chunk
    /// that is already present is a no-op.
    pub async fn store(&self, name: &ChunkName, content: &[u8]) -> Result<(), ChunkStoreError> {
        if self.hasher.digest(content) != *name.id() {
            return Err(ChunkStoreError::ContentMismatch);
        }
        let key = name.id().to_hex();
        if cacache::metadata(&self.root_dir, &key).await?.is_some() {
            return Ok(());
        }
        let size = content.len() as u64;
        {
            let mut used = self.lock_used();
            if used.saturating_add(size) > self.capacity {
                return Err(ChunkStoreError::InsufficientSpace);
            }
            *used += size;
        }
        if let Err(e) = cacache::write(&self.root_dir, &key, content).await {
            *self.lock_used() -= size;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read a chunk back, re-verifying that it digests to its name.
    pub async fn fetch(&self, name: &ChunkName) -> Result<Vec<u8>, ChunkStoreError> {
        let key = name.id().to_hex();
        let content = match cacache::read(&self.root_dir, &key).await {
            Ok(content) => content,
            Err(cacache::Error::EntryNotFound(..)) => return Err(ChunkStoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        if self.hasher.digest(&content) != *name.id() {
            return Err(ChunkStoreError::ContentMismatch);
        }
        Ok(content)
    }

    pub async fn has(&self, name: &ChunkName) -> Result<bool, ChunkStoreError> {
        let key = name.id().to_hex();
        Ok(cacache::metadata(&self.root_dir, &key).await?.is_some())
    }

    /// Drop a chunk and release its budget.
    pub async fn delete(&self, name: &ChunkName) -> Result<(), ChunkStoreError> {
        let key = name.id().to_hex();
        let Some(metadata) = cacache::metadata(&self.root_dir, &key).await? else {
            return Err(ChunkStoreError::NotFound);
        };
        cacache::remove(&self.root_dir, &key).await?;
        cacache::remove_hash(&self.root_dir, &metadata.integrity).await?;
        let mut used = self.lock_used();
        *used = used.saturating_sub(metadata.size as u64);
        Ok(())
    }

    fn lock_used(&self) -> std::sync::MutexGuard<'_, u64> {
        self.used.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
