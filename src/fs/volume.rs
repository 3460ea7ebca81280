//! Volume handle and local mutations

use super::epoch::{EpochClock, EpochGuard};
use super::path::{clean, resolve};
use crate::chunk::ChunkStore;
use crate::clock::{Clock, Epoch};
use crate::db::{Clocks, Db, DirItem, Dirent, PeerId, PublicKey, VolumeId, ROOT_INODE};
use crate::error::{Error, Result};
use crate::snapshot::{self, DirSource, SnapshotRecord, SnapshotSource};
use tracing::{debug, info};

/// Default number of children per sync message
pub const DEFAULT_MAX_BATCH: usize = 1000;

/// An open volume.
///
/// Shared between request handlers with `Arc`; every method takes `&self`.
pub struct Volume {
    db: Db,
    vol_id: VolumeId,
    pub_key: PublicKey,
    pub(super) epoch: EpochClock,
    pub(super) max_batch: usize,
}

impl Volume {
    /// Open the stored volume `vol_id`, serving as the peer `pub_key`
    pub fn open(db: Db, vol_id: &VolumeId, pub_key: &PublicKey) -> Result<Self> {
        let ticks = db.view(|tx| tx.volumes()?.get_by_id(vol_id)?.epoch())?;
        info!("Opened volume {:?} at epoch {}", vol_id, ticks);
        Ok(Volume {
            db,
            vol_id: *vol_id,
            pub_key: *pub_key,
            epoch: EpochClock::new(ticks),
            max_batch: DEFAULT_MAX_BATCH,
        })
    }

    /// Set the number of children per sync message
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn id(&self) -> &VolumeId {
        &self.vol_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pub_key
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn epoch(&self) -> &EpochClock {
        &self.epoch
    }

    /// Mark the epoch dirty, returning the tick to stamp a mutation with
    pub fn mark_dirty(&self) -> Epoch {
        self.epoch.mark_dirty()
    }

    /// Seal the current epoch, advancing the persisted tick if dirty
    pub fn seal_epoch(&self) -> Result<Epoch> {
        let mut guard = self.epoch.lock();
        self.seal_locked(&mut guard)
    }

    pub(super) fn seal_locked(&self, guard: &mut EpochGuard<'_>) -> Result<Epoch> {
        guard.seal(|| {
            self.db
                .update(|tx| tx.volumes()?.get_by_id(&self.vol_id)?.next_epoch())
        })
    }

    /// Create directory `name` in `parent`, returning its inode
    pub fn mkdir(&self, parent: u64, name: &str) -> Result<u64> {
        validate_name(name)?;
        let now = self.mark_dirty();
        let inode = self.db.update(|tx| {
            let volume = tx.volumes()?.get_by_id(&self.vol_id)?;
            let dirs = volume.dirs()?;
            if dirs.get(parent, name)?.is_some() {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            let inode = volume.inodes()?.allocate()?;
            dirs.put(parent, name, &Dirent::new_dir(inode))?;
            stamp(&volume.clocks(), parent, name, now, true)?;
            Ok(inode)
        })?;
        debug!("mkdir {}/{} -> inode {} at epoch {}", parent, name, inode, now);
        Ok(inode)
    }

    /// Create or replace file `name` in `parent`, returning its inode.
    ///
    /// Replacing a file keeps its inode and updates its clock.
    pub fn create_file(&self, parent: u64, name: &str, manifest: Vec<u8>) -> Result<u64> {
        validate_name(name)?;
        let now = self.mark_dirty();
        let inode = self.db.update(|tx| {
            let volume = tx.volumes()?.get_by_id(&self.vol_id)?;
            let dirs = volume.dirs()?;
            let (inode, created) = match dirs.get(parent, name)? {
                Some(existing) if existing.is_dir() => {
                    return Err(Error::AlreadyExists(name.to_string()));
                }
                Some(existing) => (existing.inode, false),
                None => (volume.inodes()?.allocate()?, true),
            };
            dirs.put(parent, name, &Dirent::new_file(inode, manifest))?;
            stamp(&volume.clocks(), parent, name, now, created)?;
            Ok(inode)
        })?;
        debug!("create {}/{} -> inode {} at epoch {}", parent, name, inode, now);
        Ok(inode)
    }

    /// Remove entry `name` from `parent`.
    ///
    /// The entry's clock stays behind, stamped with the removal epoch, so
    /// peers can tell a deletion from an entry they never saw.
    pub fn remove(&self, parent: u64, name: &str) -> Result<()> {
        let now = self.mark_dirty();
        self.db.update(|tx| {
            let volume = tx.volumes()?.get_by_id(&self.vol_id)?;
            let dirs = volume.dirs()?;
            let dirent = dirs
                .get(parent, name)?
                .ok_or_else(|| Error::PathNotFound(name.to_string()))?;
            if dirent.is_dir() && dirs.list(dirent.inode)?.next().is_some() {
                return Err(Error::DirectoryNotEmpty(name.to_string()));
            }
            dirs.delete(parent, name)?;
            stamp(&volume.clocks(), parent, name, now, false)
        })?;
        debug!("remove {}/{} at epoch {}", parent, name, now);
        Ok(())
    }

    /// Find the entry at `path`; the root resolves to a directory entry
    pub fn lookup(&self, path: &str) -> Result<Option<Dirent>> {
        self.db.view(|tx| {
            let dirs = tx.volumes()?.get_by_id(&self.vol_id)?.dirs()?;
            match resolve(&dirs, &clean(path)) {
                Ok(resolved) => Ok(Some(
                    resolved
                        .dirent
                        .unwrap_or_else(|| Dirent::new_dir(ROOT_INODE)),
                )),
                Err(Error::PathNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// List directory `inode` in name order
    pub fn list(&self, inode: u64) -> Result<Vec<DirItem>> {
        self.db.view(|tx| {
            let dirs = tx.volumes()?.get_by_id(&self.vol_id)?.dirs()?;
            let items = dirs.list(inode)?.collect::<Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Capture `source` into the chunk store and record it as snapshot `name`
    pub fn capture_snapshot<S>(
        &self,
        name: &str,
        source: &S,
        chunks: &dyn ChunkStore,
    ) -> Result<SnapshotRecord>
    where
        S: SnapshotSource + ?Sized,
    {
        self.ensure_snapshot_name_free(name)?;
        let record = snapshot::capture(name, source, chunks)?;
        self.db.update(|tx| {
            tx.volumes()?
                .get_by_id(&self.vol_id)?
                .snapshots()?
                .put(&record)
        })?;
        Ok(record)
    }

    /// Snapshot the stored directory tree of this volume
    pub fn snapshot(&self, name: &str, chunks: &dyn ChunkStore) -> Result<SnapshotRecord> {
        self.db.update(|tx| {
            let volume = tx.volumes()?.get_by_id(&self.vol_id)?;
            let snapshots = volume.snapshots()?;
            match snapshots.get(name) {
                Ok(_) => return Err(Error::SnapshotAlreadyExists(name.to_string())),
                Err(Error::SnapshotNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            let dirs = volume.dirs()?;
            let record = snapshot::capture(name, &DirSource::new(&dirs), chunks)?;
            snapshots.put(&record)?;
            Ok(record)
        })
    }

    /// All recorded snapshots, ordered by name
    pub fn snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        self.db
            .view(|tx| tx.volumes()?.get_by_id(&self.vol_id)?.snapshots()?.list())
    }

    fn ensure_snapshot_name_free(&self, name: &str) -> Result<()> {
        self.db.view(|tx| {
            match tx.volumes()?.get_by_id(&self.vol_id)?.snapshots()?.get(name) {
                Ok(_) => Err(Error::SnapshotAlreadyExists(name.to_string())),
                Err(Error::SnapshotNotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

/// Stamp the clock of `parent/name` with `now` on behalf of the local peer
fn stamp(clocks: &Clocks<'_>, parent: u64, name: &str, now: Epoch, created: bool) -> Result<()> {
    let clock = match clocks.get(parent, name)? {
        Some(mut clock) if !created => {
            clock.update(PeerId::LOCAL, now);
            clock
        }
        _ => Clock::create(PeerId::LOCAL, now),
    };
    clocks.put(parent, name, &clock)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
