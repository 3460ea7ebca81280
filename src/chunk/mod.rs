//! Content-addressed chunk storage
//!
//! Chunks are immutable byte strings named by the BLAKE3 hash of their
//! content. Adding the same bytes twice yields the same key and stores
//! them once.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Length of a chunk key in bytes
pub const CHUNK_KEY_LEN: usize = 32;

/// BLAKE3 hash naming a chunk
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey([u8; CHUNK_KEY_LEN]);

impl ChunkKey {
    /// Compute the key of `data`
    pub fn of(data: &[u8]) -> Self {
        ChunkKey(*blake3::hash(data).as_bytes())
    }

    /// Parse a key from raw bytes, e.g. a directory manifest
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; CHUNK_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::CorruptRecord(format!("chunk key must be {} bytes", CHUNK_KEY_LEN))
        })?;
        Ok(ChunkKey(key))
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKey({})", &self.to_hex()[..16])
    }
}

/// A store of content-addressed chunks
pub trait ChunkStore: Send + Sync {
    /// Store `data`, returning its key
    fn add(&self, data: &[u8]) -> Result<ChunkKey>;

    /// Fetch the chunk named by `key`
    fn get(&self, key: &ChunkKey) -> Result<Vec<u8>>;
}

/// In-process chunk store
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<ChunkKey, Vec<u8>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks held
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn add(&self, data: &[u8]) -> Result<ChunkKey> {
        let key = ChunkKey::of(data);
        self.chunks
            .write()
            .entry(key)
            .or_insert_with(|| data.to_vec());
        Ok(key)
    }

    fn get(&self, key: &ChunkKey) -> Result<Vec<u8>> {
        self.chunks
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ChunkNotFound(key.to_hex()))
    }
}

/// Chunk store keeping one file per chunk in a directory
pub struct DirChunkStore {
    dir: PathBuf,
}

impl DirChunkStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Chunk store at {:?}", dir);
        Ok(DirChunkStore { dir })
    }

    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }
}

impl ChunkStore for DirChunkStore {
    fn add(&self, data: &[u8]) -> Result<ChunkKey> {
        let key = ChunkKey::of(data);
        let path = self.chunk_path(&key);
        if path.exists() {
            return Ok(key);
        }
        // Write then rename so a crash never leaves a truncated chunk.
        // Concurrent writers of the same chunk each use their own temp file.
        let tmp = self
            .dir
            .join(format!("{}.{:016x}.tmp", key.to_hex(), rand::random::<u64>()));
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Stored chunk {} ({} bytes)", key, data.len());
        Ok(key)
    }

    fn get(&self, key: &ChunkKey) -> Result<Vec<u8>> {
        match fs::read(self.chunk_path(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ChunkNotFound(key.to_hex())),
            Err(e) => Err(e.into()),
        }
    }
}
