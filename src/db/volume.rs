//! Volume identity and per-volume namespaces

use super::{Bucket, Clocks, Dirs, InodeTable, Snapshots, Tx};
use crate::clock::Epoch;
use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a volume ID in bytes
pub const VOLUME_ID_LEN: usize = 64;

/// Key of the persisted epoch inside a volume bucket
const EPOCH_KEY: &[u8] = b"epoch";

/// Name of the storage backend registered at volume creation
pub const DEFAULT_STORAGE: &str = "default";

/// Globally unique volume identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId([u8; VOLUME_ID_LEN]);

impl VolumeId {
    /// Generate a volume ID from the operating system's secure random source
    pub fn random() -> Result<Self> {
        let mut id = [0u8; VOLUME_ID_LEN];
        OsRng
            .try_fill_bytes(&mut id)
            .map_err(|e| Error::Entropy(e.to_string()))?;
        Ok(VolumeId(id))
    }

    /// Parse a volume ID from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let id: [u8; VOLUME_ID_LEN] = bytes.try_into().map_err(|_| {
            Error::CorruptRecord(format!(
                "volume ID must be {} bytes, got {}",
                VOLUME_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(VolumeId(id))
    }

    /// Parse a volume ID from its hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Deserialization(format!("invalid volume ID: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Raw bytes of the ID
    pub fn as_bytes(&self) -> &[u8; VOLUME_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({}..)", hex::encode(&self.0[..8]))
    }
}

/// Opaque credential for a volume's storage backend
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SharingKey(Vec<u8>);

impl SharingKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        SharingKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharingKey(<redacted>)")
    }
}

/// A storage backend association of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBackend {
    /// Where chunks for this volume are kept
    pub location: String,
    /// Key the chunks are shared under
    pub sharing_key: SharingKey,
}

/// The set of all volumes, bound to a transaction
pub struct Volumes<'tx> {
    volumes: Bucket<'tx>,
    names: Bucket<'tx>,
}

impl Tx {
    /// Access the volumes of this database
    pub fn volumes(&self) -> Result<Volumes<'_>> {
        let names = self.names();
        Ok(Volumes {
            volumes: self.required_bucket(&names.volume)?,
            names: self.required_bucket(&names.volume_name)?,
        })
    }
}

impl<'tx> Volumes<'tx> {
    /// Look up a volume by its name
    pub fn get_by_name(&self, name: &str) -> Result<Volume<'tx>> {
        let id = self
            .names
            .get(name.as_bytes())?
            .ok_or_else(|| Error::VolumeNameNotFound(name.to_string()))?;
        let id = VolumeId::from_bytes(&id)?;
        let bucket = self
            .volumes
            .bucket(id.as_bytes())?
            .ok_or_else(|| {
                Error::CorruptRecord(format!("volume {} has a name but no state", name))
            })?;
        Ok(Volume { bucket, id })
    }

    /// Look up a volume by its ID
    pub fn get_by_id(&self, id: &VolumeId) -> Result<Volume<'tx>> {
        let bucket = self
            .volumes
            .bucket(id.as_bytes())?
            .ok_or_else(|| Error::VolumeIdNotFound(id.to_string()))?;
        Ok(Volume { bucket, id: *id })
    }

    /// Create a new volume, not yet shared with any peers.
    ///
    /// Fails with [`Error::InvalidVolumeName`] for an empty name and
    /// [`Error::VolumeNameExists`] if the name is taken.
    pub fn create(
        &self,
        name: &str,
        storage: &str,
        sharing_key: &SharingKey,
    ) -> Result<Volume<'tx>> {
        self.create_with(name, storage, sharing_key, VolumeId::random)
    }

    /// Create a volume drawing candidate IDs from `generate`
    pub(crate) fn create_with<G>(
        &self,
        name: &str,
        storage: &str,
        sharing_key: &SharingKey,
        mut generate: G,
    ) -> Result<Volume<'tx>>
    where
        G: FnMut() -> Result<VolumeId>,
    {
        if name.is_empty() {
            return Err(Error::InvalidVolumeName);
        }
        if self.names.get(name.as_bytes())?.is_some() {
            return Err(Error::VolumeNameExists(name.to_string()));
        }

        let (id, bucket) = loop {
            let id = generate()?;
            match self.volumes.create_bucket(id.as_bytes()) {
                Ok(bucket) => break (id, bucket),
                Err(Error::BucketExists) => {
                    debug!("Volume ID collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        self.names.put(name.as_bytes(), id.as_bytes())?;
        let names = bucket.tx().names();
        for namespace in [
            &names.volume_dir,
            &names.volume_inode,
            &names.volume_snap,
            &names.volume_storage,
        ] {
            bucket.create_bucket(namespace.as_bytes())?;
        }

        let volume = Volume { bucket, id };
        volume.storage()?.add(DEFAULT_STORAGE, storage, sharing_key)?;
        info!("Created volume {} ({:?})", name, id);
        Ok(volume)
    }

    /// List all volumes as (name, ID), ordered by name
    pub fn list(&self) -> Result<Vec<(String, VolumeId)>> {
        let mut volumes = Vec::new();
        for item in self.names.cursor()? {
            let (name, id) = item?;
            let name = String::from_utf8(name)
                .map_err(|_| Error::CorruptRecord("volume name is not UTF-8".to_string()))?;
            volumes.push((name, VolumeId::from_bytes(&id)?));
        }
        Ok(volumes)
    }
}

/// One volume's persisted state, bound to a transaction
pub struct Volume<'tx> {
    bucket: Bucket<'tx>,
    id: VolumeId,
}

impl<'tx> Volume<'tx> {
    /// ID of this volume; valid after the transaction ends
    pub fn id(&self) -> VolumeId {
        self.id
    }

    fn namespace(&self, name: &str) -> Result<Bucket<'tx>> {
        self.bucket.bucket(name.as_bytes())?.ok_or_else(|| {
            Error::CorruptRecord(format!("volume {:?} is missing namespace {}", self.id, name))
        })
    }

    /// Directory entries of this volume
    pub fn dirs(&self) -> Result<Dirs<'tx>> {
        let name = &self.bucket.tx().names().volume_dir;
        Ok(Dirs::new(self.namespace(name)?))
    }

    /// Inode table of this volume
    pub fn inodes(&self) -> Result<InodeTable<'tx>> {
        let name = &self.bucket.tx().names().volume_inode;
        Ok(InodeTable::new(self.namespace(name)?))
    }

    /// Snapshot history of this volume
    pub fn snapshots(&self) -> Result<Snapshots<'tx>> {
        let name = &self.bucket.tx().names().volume_snap;
        Ok(Snapshots::new(self.namespace(name)?))
    }

    /// Storage backends of this volume
    pub fn storage(&self) -> Result<VolumeStorage<'tx>> {
        let name = &self.bucket.tx().names().volume_storage;
        Ok(VolumeStorage {
            bucket: self.namespace(name)?,
        })
    }

    /// Dirent clocks of this volume; the namespace is created on first write
    pub fn clocks(&self) -> Clocks<'tx> {
        let name = self.bucket.tx().names().volume_clock.clone();
        Clocks::new(self.bucket.clone(), name)
    }

    /// Raw namespace lookup, for inspection
    pub fn namespace_bucket(&self, name: &str) -> Result<Option<Bucket<'tx>>> {
        self.bucket.bucket(name.as_bytes())
    }

    /// The persisted epoch; 0 for a volume that never ticked
    pub fn epoch(&self) -> Result<Epoch> {
        match self.bucket.get(EPOCH_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::CorruptRecord(format!("epoch of volume {:?} is not 8 bytes", self.id))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Advance the persisted epoch by one and return the new value
    pub fn next_epoch(&self) -> Result<Epoch> {
        let next = self
            .epoch()?
            .checked_add(1)
            .ok_or_else(|| Error::CorruptRecord("epoch counter overflow".to_string()))?;
        self.bucket.put(EPOCH_KEY, &next.to_be_bytes())?;
        Ok(next)
    }
}

/// Storage backends of a volume, keyed by backend name
pub struct VolumeStorage<'tx> {
    bucket: Bucket<'tx>,
}

impl<'tx> VolumeStorage<'tx> {
    /// Register a storage backend
    pub fn add(&self, name: &str, location: &str, sharing_key: &SharingKey) -> Result<()> {
        if self.bucket.get(name.as_bytes())?.is_some() {
            return Err(Error::StorageNameExists(name.to_string()));
        }
        let backend = StorageBackend {
            location: location.to_string(),
            sharing_key: sharing_key.clone(),
        };
        self.bucket.put(name.as_bytes(), &bincode::serialize(&backend)?)?;
        Ok(())
    }

    /// Get a storage backend by name
    pub fn get(&self, name: &str) -> Result<StorageBackend> {
        let data = self
            .bucket
            .get(name.as_bytes())?
            .ok_or_else(|| Error::StorageNotFound(name.to_string()))?;
        bincode::deserialize(&data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// All backends as (name, backend), ordered by name
    pub fn list(&self) -> Result<Vec<(String, StorageBackend)>> {
        let mut backends = Vec::new();
        for item in self.bucket.cursor()? {
            let (name, data) = item?;
            let name = String::from_utf8(name)
                .map_err(|_| Error::CorruptRecord("storage name is not UTF-8".to_string()))?;
            let backend = bincode::deserialize(&data)
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            backends.push((name, backend));
        }
        Ok(backends)
    }
}
