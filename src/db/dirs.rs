//! Directory entries
//!
//! Entries are keyed by parent inode (8 bytes, big-endian) followed by the
//! entry name, so iterating a parent's prefix lists its children in name
//! order.

use super::{Bucket, Cursor};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Inode of every volume's root directory
pub const ROOT_INODE: u64 = 1;

/// What a directory entry refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirentKind {
    /// A file; the manifest is an opaque reference into the chunk store
    File { manifest: Vec<u8> },
    /// A subdirectory
    Dir,
}

/// A persisted directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    /// Inode of the entry itself
    pub inode: u64,
    pub kind: DirentKind,
}

impl Dirent {
    pub fn new_file(inode: u64, manifest: Vec<u8>) -> Self {
        Dirent {
            inode,
            kind: DirentKind::File { manifest },
        }
    }

    pub fn new_dir(inode: u64) -> Self {
        Dirent {
            inode,
            kind: DirentKind::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, DirentKind::Dir)
    }

    /// Manifest of a file entry
    pub fn manifest(&self) -> Option<&[u8]> {
        match &self.kind {
            DirentKind::File { manifest } => Some(manifest),
            DirentKind::Dir => None,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(format!("dirent: {}", e)))
    }
}

/// Create the (parent, name) key shared by dirents and their clocks
pub(crate) fn dirent_key(parent: u64, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + name.len());
    key.extend_from_slice(&parent.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

/// The directory namespace of a volume
pub struct Dirs<'tx> {
    bucket: Bucket<'tx>,
}

impl<'tx> Dirs<'tx> {
    pub(crate) fn new(bucket: Bucket<'tx>) -> Self {
        Dirs { bucket }
    }

    /// Look up `name` in directory `parent`
    pub fn get(&self, parent: u64, name: &str) -> Result<Option<Dirent>> {
        match self.bucket.get(&dirent_key(parent, name))? {
            Some(data) => Ok(Some(Dirent::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    /// Store an entry, replacing any existing one with the same name
    pub fn put(&self, parent: u64, name: &str, dirent: &Dirent) -> Result<()> {
        self.bucket.put(&dirent_key(parent, name), &dirent.to_bytes()?)
    }

    pub fn delete(&self, parent: u64, name: &str) -> Result<()> {
        self.bucket.delete(&dirent_key(parent, name))
    }

    /// List the entries of directory `parent` in name order
    pub fn list(&self, parent: u64) -> Result<DirList> {
        Ok(DirList {
            cursor: self.bucket.cursor_prefix(&parent.to_be_bytes())?,
        })
    }
}

/// One listed directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirItem {
    pub name: String,
    pub dirent: Dirent,
}

/// Iterator over the entries of one directory
pub struct DirList {
    cursor: Cursor,
}

impl Iterator for DirList {
    type Item = Result<DirItem>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.next()?;
        Some(item.and_then(|(key, value)| {
            if key.len() < 8 {
                return Err(Error::CorruptRecord("dirent key too short".to_string()));
            }
            let name = String::from_utf8(key[8..].to_vec())
                .map_err(|_| Error::CorruptRecord("dirent name is not UTF-8".to_string()))?;
            let dirent = Dirent::from_bytes(&value)?;
            Ok(DirItem { name, dirent })
        }))
    }
}
