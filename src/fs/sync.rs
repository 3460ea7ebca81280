//! Serving sync pulls
//!
//! A pull streams one directory of the volume to a peer as a sequence of
//! [`SyncPullItem`] messages, all read from a single consistent view taken
//! right after the epoch was sealed.

use super::path::{clean, resolve};
use super::Volume;
use crate::db::{DirentKind, PeerId, PublicKey, Tx};
use crate::error::{Error, Result};
use crate::wire::{SyncDirent, SyncDirentKind, SyncPullError, SyncPullItem};
use std::collections::BTreeMap;
use std::mem;
use tracing::debug;

impl Volume {
    /// Stream the directory at `path` to `sink`.
    ///
    /// The first message carries the peer roster. Children follow in name
    /// order, at most `max_batch` per message. A path naming a file yields
    /// a single `NotADirectory` message and `Ok`; a path that does not
    /// resolve fails before anything is sent. An error from `sink` stops
    /// the pull and is returned as is.
    pub fn sync_send<F>(&self, path: &str, mut sink: F) -> Result<()>
    where
        F: FnMut(SyncPullItem) -> Result<()>,
    {
        let epoch = {
            let mut guard = self.epoch.lock();
            self.seal_locked(&mut guard)?
        };

        self.db().view(|tx| {
            let volume = tx.volumes()?.get_by_id(self.id())?;
            let dirs = volume.dirs()?;
            let clocks = volume.clocks();

            let resolved = resolve(&dirs, &clean(path))?;
            if !resolved.is_dir() {
                debug!("Sync of {:?} refused: not a directory", path);
                return sink(SyncPullItem::error(SyncPullError::NotADirectory));
            }

            let mut msg = SyncPullItem {
                peers: Some(self.roster(tx)?),
                ..Default::default()
            };
            let mut sent = 0usize;
            let mut total = 0usize;

            for item in dirs.list(resolved.inode)? {
                let item = item?;
                let clock = clocks.get(resolved.inode, &item.name)?.ok_or_else(|| {
                    Error::ClockNotFound {
                        parent: resolved.inode,
                        name: item.name.clone(),
                    }
                })?;
                let kind = match item.dirent.kind {
                    DirentKind::File { manifest } => SyncDirentKind::File { manifest },
                    DirentKind::Dir => SyncDirentKind::Dir,
                };
                msg.children.push(SyncDirent {
                    name: item.name,
                    kind,
                    clock: clock.to_bytes()?,
                });
                total += 1;

                if msg.children.len() >= self.max_batch {
                    sink(mem::take(&mut msg))?;
                    sent += 1;
                }
            }

            if !msg.children.is_empty() || msg.peers.is_some() {
                sink(msg)?;
                sent += 1;
            }
            debug!(
                "Synced {:?} at epoch {}: {} entries in {} messages",
                path, epoch, total, sent
            );
            Ok(())
        })
    }

    /// The local identity plus every peer authorized for this volume
    fn roster(&self, tx: &Tx) -> Result<BTreeMap<PeerId, PublicKey>> {
        let mut roster = BTreeMap::new();
        roster.insert(PeerId::LOCAL, *self.public_key());

        let peers = tx.peers()?;
        for peer in peers.iter()? {
            let peer = peer?;
            // Peers not sharing this volume stay hidden
            if peers.is_allowed(peer.id, self.id())? {
                roster.insert(peer.id, peer.pub_key);
            }
        }
        Ok(roster)
    }
}
