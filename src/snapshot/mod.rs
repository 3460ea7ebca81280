//! Volume snapshots
//!
//! A snapshot freezes a directory tree into the chunk store. Each
//! directory's sorted entry list is serialized and stored as a chunk; the
//! chunk's key becomes that directory's manifest, so a whole tree is named
//! by the manifest of its root. File manifests are carried over unchanged,
//! since file content is already immutable and content-addressed.

use crate::chunk::{ChunkKey, ChunkStore};
use crate::db::{DirentKind, Dirs, ROOT_INODE};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// What a source directory entry refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceNode {
    File { manifest: Vec<u8> },
    /// A subdirectory, identified by the handle to list it with
    Dir { handle: u64 },
}

/// One entry of a source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub node: SourceNode,
}

/// A directory tree that can be captured into a snapshot
pub trait SnapshotSource {
    /// Handle of the root directory
    fn root(&self) -> u64;

    /// Entries of directory `handle`, in any order
    fn children(&self, handle: u64) -> Result<Vec<SourceEntry>>;
}

/// What a snapshotted entry refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    File { manifest: Vec<u8> },
    /// A directory; the manifest is the chunk key of its entry list
    Dir { manifest: ChunkKey },
}

/// One entry of a snapshotted directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDirent {
    pub name: String,
    pub kind: SnapshotKind,
}

/// A persisted snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub created: DateTime<Utc>,
    /// The root directory; its name is empty
    pub contents: SnapshotDirent,
}

impl SnapshotRecord {
    /// Serialize the snapshot for storage
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a snapshot
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Manifest of the root directory
    pub fn root_manifest(&self) -> Result<ChunkKey> {
        match &self.contents.kind {
            SnapshotKind::Dir { manifest } => Ok(*manifest),
            SnapshotKind::File { .. } => Err(Error::CorruptRecord(format!(
                "snapshot {} has a file as root",
                self.name
            ))),
        }
    }
}

/// Capture the tree under `source`'s root.
///
/// Nothing is returned unless every directory was stored; chunks written
/// before a failure stay in the store, unreferenced.
pub fn capture<S>(name: &str, source: &S, chunks: &dyn ChunkStore) -> Result<SnapshotRecord>
where
    S: SnapshotSource + ?Sized,
{
    let mut ancestors = HashSet::new();
    let manifest = capture_dir(source, source.root(), chunks, &mut ancestors)?;
    info!("Captured snapshot {} (root {:?})", name, manifest);
    Ok(SnapshotRecord {
        name: name.to_string(),
        created: Utc::now(),
        contents: SnapshotDirent {
            name: String::new(),
            kind: SnapshotKind::Dir { manifest },
        },
    })
}

/// `ancestors` holds the handles of the directories currently being
/// captured; meeting one again means the tree loops back on itself.
fn capture_dir<S>(
    source: &S,
    handle: u64,
    chunks: &dyn ChunkStore,
    ancestors: &mut HashSet<u64>,
) -> Result<ChunkKey>
where
    S: SnapshotSource + ?Sized,
{
    if !ancestors.insert(handle) {
        return Err(Error::CorruptRecord(format!(
            "directory {} contains itself",
            handle
        )));
    }
    let mut entries = source.children(handle)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut dirents = Vec::with_capacity(entries.len());
    for entry in entries {
        let kind = match entry.node {
            SourceNode::File { manifest } => SnapshotKind::File { manifest },
            SourceNode::Dir { handle } => SnapshotKind::Dir {
                manifest: capture_dir(source, handle, chunks, ancestors)?,
            },
        };
        dirents.push(SnapshotDirent {
            name: entry.name,
            kind,
        });
    }

    ancestors.remove(&handle);

    let data = bincode::serialize(&dirents)?;
    let key = chunks.add(&data)?;
    debug!("Stored directory {} with {} entries as {:?}", handle, dirents.len(), key);
    Ok(key)
}

/// Read back the entries of a snapshotted directory
pub fn read_dir(manifest: &ChunkKey, chunks: &dyn ChunkStore) -> Result<Vec<SnapshotDirent>> {
    let data = chunks.get(manifest)?;
    bincode::deserialize(&data)
        .map_err(|e| Error::Deserialization(format!("snapshot directory {}: {}", manifest, e)))
}

/// Snapshot source over a volume's persisted directory namespace.
///
/// Handles are inodes; the root is [`ROOT_INODE`].
pub struct DirSource<'a, 'tx> {
    dirs: &'a Dirs<'tx>,
}

impl<'a, 'tx> DirSource<'a, 'tx> {
    pub fn new(dirs: &'a Dirs<'tx>) -> Self {
        DirSource { dirs }
    }
}

impl SnapshotSource for DirSource<'_, '_> {
    fn root(&self) -> u64 {
        ROOT_INODE
    }

    fn children(&self, handle: u64) -> Result<Vec<SourceEntry>> {
        let mut entries = Vec::new();
        for item in self.dirs.list(handle)? {
            let item = item?;
            let node = match item.dirent.kind {
                DirentKind::File { manifest } => SourceNode::File { manifest },
                DirentKind::Dir => SourceNode::Dir {
                    handle: item.dirent.inode,
                },
            };
            entries.push(SourceEntry {
                name: item.name,
                node,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MemoryChunkStore;
    use std::collections::HashMap;

    /// An in-memory tree: handle -> entries
    struct TreeSource {
        dirs: HashMap<u64, Vec<SourceEntry>>,
    }

    impl SnapshotSource for TreeSource {
        fn root(&self) -> u64 {
            1
        }

        fn children(&self, handle: u64) -> Result<Vec<SourceEntry>> {
            self.dirs
                .get(&handle)
                .cloned()
                .ok_or(Error::InodeNotFound(handle))
        }
    }

    fn file(name: &str, manifest: &[u8]) -> SourceEntry {
        SourceEntry {
            name: name.to_string(),
            node: SourceNode::File {
                manifest: manifest.to_vec(),
            },
        }
    }

    fn dir(name: &str, handle: u64) -> SourceEntry {
        SourceEntry {
            name: name.to_string(),
            node: SourceNode::Dir { handle },
        }
    }

    fn sample_tree() -> TreeSource {
        let mut dirs = HashMap::new();
        dirs.insert(1, vec![file("z.txt", b"mz"), dir("photos", 2), file("a.txt", b"ma")]);
        dirs.insert(2, vec![file("cat.jpg", b"mc")]);
        TreeSource { dirs }
    }

    #[test]
    fn test_capture_sorted_and_recursive() {
        let chunks = MemoryChunkStore::new();
        let record = capture("first", &sample_tree(), &chunks).unwrap();
        assert_eq!(record.name, "first");
        assert_eq!(record.contents.name, "");

        let root = read_dir(&record.root_manifest().unwrap(), &chunks).unwrap();
        let names: Vec<&str> = root.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "photos", "z.txt"]);
        assert_eq!(
            root[0].kind,
            SnapshotKind::File {
                manifest: b"ma".to_vec()
            }
        );

        let photos = match &root[1].kind {
            SnapshotKind::Dir { manifest } => read_dir(manifest, &chunks).unwrap(),
            other => panic!("expected dir, got {:?}", other),
        };
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].name, "cat.jpg");
    }

    #[test]
    fn test_identical_trees_share_manifests() {
        let chunks = MemoryChunkStore::new();
        let first = capture("one", &sample_tree(), &chunks).unwrap();
        let stored = chunks.len();
        let second = capture("two", &sample_tree(), &chunks).unwrap();
        assert_eq!(first.root_manifest().unwrap(), second.root_manifest().unwrap());
        assert_eq!(chunks.len(), stored);
    }

    #[test]
    fn test_capture_fails_on_source_error() {
        let mut tree = sample_tree();
        tree.dirs.remove(&2);
        let chunks = MemoryChunkStore::new();
        assert!(matches!(
            capture("broken", &tree, &chunks),
            Err(Error::InodeNotFound(2))
        ));
    }

    #[test]
    fn test_cycle_is_corrupt() {
        let mut tree = sample_tree();
        tree.dirs.insert(2, vec![file("cat.jpg", b"mc"), dir("up", 1)]);
        let chunks = MemoryChunkStore::new();
        assert!(matches!(
            capture("loop", &tree, &chunks),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_shared_directory_is_not_a_cycle() {
        let mut tree = sample_tree();
        tree.dirs.get_mut(&1).unwrap().push(dir("also-photos", 2));
        let chunks = MemoryChunkStore::new();
        let record = capture("shared", &tree, &chunks).unwrap();
        let root = read_dir(&record.root_manifest().unwrap(), &chunks).unwrap();
        assert_eq!(root[1].name, "also-photos");
        assert_eq!(root[2].name, "photos");
        assert_eq!(root[1].kind, root[2].kind);
    }

    #[test]
    fn test_empty_root() {
        let mut dirs = HashMap::new();
        dirs.insert(1, Vec::new());
        let chunks = MemoryChunkStore::new();
        let record = capture("empty", &TreeSource { dirs }, &chunks).unwrap();
        assert!(read_dir(&record.root_manifest().unwrap(), &chunks)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_record_serialization() {
        let chunks = MemoryChunkStore::new();
        let record = capture("s", &sample_tree(), &chunks).unwrap();
        let back = SnapshotRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(back, record);
    }
}
