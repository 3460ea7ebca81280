//! Transactional metadata database
//!
//! A bucket layer over a single sled tree. Buckets nest and each one owns a
//! key prefix. Update transactions buffer their writes and commit them as
//! one atomic sled batch; read views see the database as it was when they
//! were opened, even while later updates commit.

mod clocks;
mod dirs;
mod inodes;
mod peer;
mod snapshots;
mod volume;

pub use clocks::Clocks;
pub use dirs::{DirItem, DirList, Dirent, DirentKind, Dirs, ROOT_INODE};
pub use inodes::InodeTable;
pub use peer::{Peer, PeerId, PeerIter, Peers, PublicKey, PUBLIC_KEY_LEN};
pub use snapshots::Snapshots;
pub use volume::{
    SharingKey, StorageBackend, Volume, VolumeId, VolumeStorage, Volumes, VOLUME_ID_LEN,
};

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{btree_map, BTreeMap};
use std::iter::Peekable;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Marks a nested bucket in the key encoding
const BUCKET_TAG: u8 = b'B';
/// Marks a plain key in the key encoding
const KEY_TAG: u8 = b'K';

/// Name of the sled tree holding all buckets
const STATE_TREE: &str = "state";

/// Names of the buckets the database is laid out in.
///
/// Passed explicitly to [`Db::open`] so that no bucket name lives in
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    /// Top-level bucket holding one nested bucket per volume ID
    pub volume: String,
    /// Top-level bucket mapping volume names to IDs
    pub volume_name: String,
    /// Top-level bucket mapping peer IDs to public keys
    pub peer: String,
    /// Top-level bucket mapping public keys to peer IDs
    pub peer_key: String,
    /// Top-level bucket of (peer, volume) authorizations
    pub peer_volume: String,
    /// Per-volume directory entries
    pub volume_dir: String,
    /// Per-volume inode table
    pub volume_inode: String,
    /// Per-volume snapshot history
    pub volume_snap: String,
    /// Per-volume storage backends
    pub volume_storage: String,
    /// Per-volume dirent clocks
    pub volume_clock: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        BucketNames {
            volume: "volume".to_string(),
            volume_name: "volume_name".to_string(),
            peer: "peer".to_string(),
            peer_key: "peer_key".to_string(),
            peer_volume: "peer_volume".to_string(),
            volume_dir: "dir".to_string(),
            volume_inode: "inode".to_string(),
            volume_snap: "snap".to_string(),
            volume_storage: "storage".to_string(),
            volume_clock: "clock".to_string(),
        }
    }
}

/// Values a read view must keep seeing after an update overwrote them
#[derive(Default)]
struct ViewState {
    /// key -> value at the time the view was opened (None: key was absent)
    preimages: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl ViewState {
    fn record(&self, key: &[u8], old: Option<Vec<u8>>) {
        // Only the first overwrite matters; later ones already see the new value.
        self.preimages.lock().entry(key.to_vec()).or_insert(old);
    }

    fn preimage(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.preimages.lock().get(key).cloned()
    }

    /// First recorded key under `prefix` strictly after `after`
    fn first_after(
        &self,
        prefix: &[u8],
        after: Option<&[u8]>,
    ) -> Option<(Vec<u8>, Option<Vec<u8>>)> {
        let preimages = self.preimages.lock();
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_vec()),
            None => Bound::Included(prefix.to_vec()),
        };
        preimages
            .range((lower, Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
    }
}

struct Shared {
    /// Serializes update transactions
    writer: Mutex<()>,
    /// Open read views, pruned on every view and commit
    views: Mutex<Vec<Weak<ViewState>>>,
    /// Number of non-empty commits
    commits: AtomicU64,
}

/// Metadata database handle. Cheap to clone.
#[derive(Clone)]
pub struct Db {
    db: sled::Db,
    tree: sled::Tree,
    names: Arc<BucketNames>,
    shared: Arc<Shared>,
}

impl Db {
    /// Open or create a database at `path`
    pub fn open<P: AsRef<Path>>(path: P, names: BucketNames) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let store = Self::from_sled(db, names)?;
        info!("Metadata database opened at {:?}", path.as_ref());
        Ok(store)
    }

    /// Create a temporary database (for testing)
    pub fn temporary(names: BucketNames) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_sled(db, names)
    }

    fn from_sled(db: sled::Db, names: BucketNames) -> Result<Self> {
        let tree = db.open_tree(STATE_TREE)?;
        let store = Db {
            db,
            tree,
            names: Arc::new(names),
            shared: Arc::new(Shared {
                writer: Mutex::new(()),
                views: Mutex::new(Vec::new()),
                commits: AtomicU64::new(0),
            }),
        };
        store.update(|tx| tx.init_buckets())?;
        Ok(store)
    }

    /// Bucket names this database was opened with
    pub fn names(&self) -> &BucketNames {
        &self.names
    }

    /// Run `f` against a read-only view of the database.
    ///
    /// Every read inside `f` observes the state as of the moment the view
    /// was opened. Updates may commit concurrently, including from inside
    /// `f`, without being seen by the view.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx) -> Result<T>,
    {
        let state = Arc::new(ViewState::default());
        {
            let mut views = self.shared.views.lock();
            views.retain(|view| view.strong_count() > 0);
            views.push(Arc::downgrade(&state));
        }
        let tx = Tx {
            db: self.clone(),
            mode: TxMode::View(state),
        };
        f(&tx)
    }

    /// Run `f` in a write transaction.
    ///
    /// Writes become visible atomically when `f` returns `Ok`; on `Err`
    /// nothing is written. Must not be called while the calling thread is
    /// already inside an update.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx) -> Result<T>,
    {
        let _writer = self.shared.writer.lock();
        let tx = Tx {
            db: self.clone(),
            mode: TxMode::Update(RefCell::new(BTreeMap::new())),
        };
        let value = f(&tx)?;
        let writes = match tx.mode {
            TxMode::Update(writes) => writes.into_inner(),
            TxMode::View(_) => BTreeMap::new(),
        };
        if !writes.is_empty() {
            self.commit(writes)?;
        }
        Ok(value)
    }

    fn commit(&self, writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<()> {
        let mut views = self.shared.views.lock();
        views.retain(|view| view.strong_count() > 0);
        let open: Vec<Arc<ViewState>> = views.iter().filter_map(Weak::upgrade).collect();

        if !open.is_empty() {
            for key in writes.keys() {
                let old = self.tree.get(key)?.map(|v| v.to_vec());
                for view in &open {
                    view.record(key, old.clone());
                }
            }
        }

        let count = writes.len();
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            match value {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        self.tree.apply_batch(batch)?;
        drop(views);

        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} writes ({} open views)", count, open.len());
        Ok(())
    }

    /// Number of registered view slots, including ones not yet pruned
    #[cfg(test)]
    fn registered_views(&self) -> usize {
        self.shared.views.lock().len()
    }

    /// Number of non-empty commits since the database was opened
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

enum TxMode {
    View(Arc<ViewState>),
    Update(RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>),
}

/// An open transaction, either a read view or an update
pub struct Tx {
    db: Db,
    mode: TxMode,
}

impl Tx {
    /// Whether writes are allowed in this transaction
    pub fn writable(&self) -> bool {
        matches!(self.mode, TxMode::Update(_))
    }

    /// Bucket names of the underlying database
    pub fn names(&self) -> &BucketNames {
        &self.db.names
    }

    fn init_buckets(&self) -> Result<()> {
        let names = self.db.names.clone();
        for name in [
            &names.volume,
            &names.volume_name,
            &names.peer,
            &names.peer_key,
            &names.peer_volume,
        ] {
            self.create_bucket_if_not_exists(name)?;
        }
        Ok(())
    }

    /// Get a top-level bucket, if it exists
    pub fn bucket(&self, name: &str) -> Result<Option<Bucket<'_>>> {
        self.root().bucket(name.as_bytes())
    }

    /// Get a top-level bucket, creating it if needed
    pub fn create_bucket_if_not_exists(&self, name: &str) -> Result<Bucket<'_>> {
        self.root().create_bucket_if_not_exists(name.as_bytes())
    }

    /// Get a top-level bucket that must exist
    pub(crate) fn required_bucket(&self, name: &str) -> Result<Bucket<'_>> {
        self.bucket(name)?
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))
    }

    fn root(&self) -> Bucket<'_> {
        Bucket {
            tx: self,
            prefix: Vec::new(),
        }
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.mode {
            TxMode::View(state) => {
                let current = self.db.tree.get(key)?.map(|v| v.to_vec());
                // Checked after the tree read: a commit records preimages before applying.
                Ok(state.preimage(key).unwrap_or(current))
            }
            TxMode::Update(writes) => {
                if let Some(pending) = writes.borrow().get(key) {
                    return Ok(pending.clone());
                }
                Ok(self.db.tree.get(key)?.map(|v| v.to_vec()))
            }
        }
    }

    fn put_raw(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        match &self.mode {
            TxMode::Update(writes) => {
                writes.borrow_mut().insert(key, Some(value));
                Ok(())
            }
            TxMode::View(_) => Err(Error::ReadOnlyTransaction),
        }
    }

    fn delete_raw(&self, key: Vec<u8>) -> Result<()> {
        match &self.mode {
            TxMode::Update(writes) => {
                writes.borrow_mut().insert(key, None);
                Ok(())
            }
            TxMode::View(_) => Err(Error::ReadOnlyTransaction),
        }
    }

    fn scan_raw(&self, prefix: Vec<u8>) -> Result<RawIter> {
        match &self.mode {
            TxMode::View(state) => Ok(RawIter::View(ViewIter {
                tree: self.db.tree.scan_prefix(&prefix).peekable(),
                state: state.clone(),
                prefix,
                last: None,
            })),
            TxMode::Update(writes) => {
                let mut merged = BTreeMap::new();
                for item in self.db.tree.scan_prefix(&prefix) {
                    let (key, value) = item?;
                    merged.insert(key.to_vec(), value.to_vec());
                }
                for (key, value) in writes.borrow().range(prefix.clone()..) {
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    match value {
                        Some(value) => merged.insert(key.clone(), value.clone()),
                        None => merged.remove(key),
                    };
                }
                Ok(RawIter::Buffered(merged.into_iter()))
            }
        }
    }
}

/// A nested namespace of keys, bound to the transaction it came from
#[derive(Clone)]
pub struct Bucket<'tx> {
    tx: &'tx Tx,
    prefix: Vec<u8>,
}

impl<'tx> Bucket<'tx> {
    /// Transaction this bucket is bound to
    pub fn tx(&self) -> &'tx Tx {
        self.tx
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + 1 + key.len());
        full.extend_from_slice(&self.prefix);
        full.push(KEY_TAG);
        full.extend_from_slice(key);
        full
    }

    fn child_prefix(&self, name: &[u8]) -> Result<Vec<u8>> {
        let len = u16::try_from(name.len())
            .map_err(|_| Error::CorruptRecord(format!("bucket name too long: {}", name.len())))?;
        let mut prefix = Vec::with_capacity(self.prefix.len() + 3 + name.len());
        prefix.extend_from_slice(&self.prefix);
        prefix.push(BUCKET_TAG);
        prefix.extend_from_slice(&len.to_be_bytes());
        prefix.extend_from_slice(name);
        Ok(prefix)
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.get_raw(&self.key(key))
    }

    /// Store `value` under `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.put_raw(self.key(key), value.to_vec())
    }

    /// Remove `key`; removing an absent key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tx.delete_raw(self.key(key))
    }

    /// Iterate all keys of this bucket in key order
    pub fn cursor(&self) -> Result<Cursor> {
        self.cursor_prefix(&[])
    }

    /// Iterate the keys of this bucket starting with `prefix`, in key order
    pub fn cursor_prefix(&self, prefix: &[u8]) -> Result<Cursor> {
        let scan = self.key(prefix);
        let strip = self.prefix.len() + 1;
        Ok(Cursor {
            inner: self.tx.scan_raw(scan)?,
            strip,
        })
    }

    /// Get a nested bucket, if it exists
    pub fn bucket(&self, name: &[u8]) -> Result<Option<Bucket<'tx>>> {
        let prefix = self.child_prefix(name)?;
        match self.tx.get_raw(&prefix)? {
            Some(_) => Ok(Some(Bucket {
                tx: self.tx,
                prefix,
            })),
            None => Ok(None),
        }
    }

    /// Create a nested bucket; fails with [`Error::BucketExists`] if present
    pub fn create_bucket(&self, name: &[u8]) -> Result<Bucket<'tx>> {
        let prefix = self.child_prefix(name)?;
        if self.tx.get_raw(&prefix)?.is_some() {
            return Err(Error::BucketExists);
        }
        self.tx.put_raw(prefix.clone(), Vec::new())?;
        Ok(Bucket {
            tx: self.tx,
            prefix,
        })
    }

    /// Get a nested bucket, creating it if needed
    pub fn create_bucket_if_not_exists(&self, name: &[u8]) -> Result<Bucket<'tx>> {
        match self.bucket(name)? {
            Some(bucket) => Ok(bucket),
            None => self.create_bucket(name),
        }
    }

    /// True when the bucket holds no keys and no nested buckets
    pub fn is_empty(&self) -> Result<bool> {
        let marker_len = self.prefix.len();
        for item in self.tx.scan_raw(self.prefix.clone())? {
            let (key, _) = item?;
            if key.len() != marker_len {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Read view iterator over a prefix.
///
/// Merges the live tree with the view's preimages so keys written after
/// the view was opened show their old values, and keys created after it
/// are skipped.
struct ViewIter {
    tree: Peekable<sled::Iter>,
    state: Arc<ViewState>,
    prefix: Vec<u8>,
    last: Option<Vec<u8>>,
}

impl Iterator for ViewIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Peek the tree before consulting preimages; a key deleted after the
            // peek has its preimage recorded by then.
            let tree_key = match self.tree.peek() {
                Some(Ok((key, _))) => Some(key.to_vec()),
                Some(Err(_)) => {
                    return self
                        .tree
                        .next()
                        .and_then(|item| item.err())
                        .map(|e| Err(Error::from(e)));
                }
                None => None,
            };
            let recorded = self.state.first_after(&self.prefix, self.last.as_deref());

            let take_recorded = match (&tree_key, &recorded) {
                (None, None) => return None,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (Some(tree_key), Some((key, _))) => key <= tree_key,
            };

            if take_recorded {
                let (key, old) = recorded?;
                if tree_key.as_deref() == Some(key.as_slice()) {
                    self.tree.next();
                }
                self.last = Some(key.clone());
                match old {
                    Some(value) => return Some(Ok((key, value))),
                    None => continue,
                }
            }

            let (key, value) = match self.tree.next()? {
                Ok((key, value)) => (key.to_vec(), value.to_vec()),
                Err(e) => return Some(Err(e.into())),
            };
            self.last = Some(key.clone());
            match self.state.preimage(&key) {
                Some(Some(old)) => return Some(Ok((key, old))),
                Some(None) => continue,
                None => return Some(Ok((key, value))),
            }
        }
    }
}

enum RawIter {
    View(ViewIter),
    Buffered(btree_map::IntoIter<Vec<u8>, Vec<u8>>),
}

impl Iterator for RawIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            RawIter::View(iter) => iter.next(),
            RawIter::Buffered(iter) => iter.next().map(Ok),
        }
    }
}

/// Ordered iteration over the plain keys of a bucket.
///
/// Yields `(key, value)` with the bucket prefix stripped. Nested buckets
/// are not included.
pub struct Cursor {
    inner: RawIter,
    strip: usize,
}

impl Iterator for Cursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let strip = self.strip;
        self.inner
            .next()
            .map(|item| item.map(|(key, value)| (key[strip..].to_vec(), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Db {
        Db::temporary(BucketNames::default()).unwrap()
    }

    #[test]
    fn test_top_level_buckets_created() {
        let db = test_db();
        db.view(|tx| {
            let names = tx.names().clone();
            assert!(tx.bucket(&names.volume)?.is_some());
            assert!(tx.bucket(&names.volume_name)?.is_some());
            assert!(tx.bucket(&names.peer)?.is_some());
            assert!(tx.bucket("missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_put_and_get() {
        let db = test_db();
        db.update(|tx| {
            let bucket = tx.create_bucket_if_not_exists("test")?;
            bucket.put(b"key", b"value")?;
            // Pending writes are visible inside the same transaction
            assert_eq!(bucket.get(b"key")?, Some(b"value".to_vec()));
            Ok(())
        })
        .unwrap();

        let value = db
            .view(|tx| tx.required_bucket("test")?.get(b"key"))
            .unwrap();
        assert_eq!(value, Some(b"value".to_vec()));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let db = test_db();
        let before = db.commit_count();
        let result: Result<()> = db.update(|tx| {
            tx.create_bucket_if_not_exists("test")?.put(b"key", b"value")?;
            Err(Error::InvalidVolumeName)
        });
        assert!(result.is_err());
        assert_eq!(db.commit_count(), before);
        db.view(|tx| {
            assert!(tx.bucket("test")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_read_only_view_rejects_writes() {
        let db = test_db();
        let result = db.view(|tx| tx.required_bucket(&tx.names().volume.clone())?.put(b"k", b"v"));
        assert!(matches!(result, Err(Error::ReadOnlyTransaction)));
    }

    #[test]
    fn test_empty_update_does_not_commit() {
        let db = test_db();
        let before = db.commit_count();
        db.update(|tx| tx.required_bucket("volume").map(|_| ())).unwrap();
        assert_eq!(db.commit_count(), before);
    }

    #[test]
    fn test_nested_buckets() {
        let db = test_db();
        db.update(|tx| {
            let outer = tx.create_bucket_if_not_exists("outer")?;
            let inner = outer.create_bucket(b"inner")?;
            inner.put(b"a", b"1")?;
            assert!(matches!(outer.create_bucket(b"inner"), Err(Error::BucketExists)));
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let outer = tx.required_bucket("outer")?;
            // Nested bucket contents are not plain keys of the parent
            assert_eq!(outer.cursor()?.count(), 0);
            assert!(!outer.is_empty()?);
            let inner = outer.bucket(b"inner")?.unwrap();
            assert_eq!(inner.get(b"a")?, Some(b"1".to_vec()));
            assert!(outer.bucket(b"inne")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cursor_order_and_prefix() {
        let db = test_db();
        db.update(|tx| {
            let bucket = tx.create_bucket_if_not_exists("list")?;
            for key in ["b2", "a1", "b1", "c1"] {
                bucket.put(key.as_bytes(), b"")?;
            }
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let bucket = tx.required_bucket("list")?;
            let keys: Vec<Vec<u8>> = bucket
                .cursor()?
                .map(|r| r.map(|(k, _)| k))
                .collect::<Result<_>>()?;
            assert_eq!(
                keys,
                vec![b"a1".to_vec(), b"b1".to_vec(), b"b2".to_vec(), b"c1".to_vec()]
            );

            let keys: Vec<Vec<u8>> = bucket
                .cursor_prefix(b"b")?
                .map(|r| r.map(|(k, _)| k))
                .collect::<Result<_>>()?;
            assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_view_is_isolated_from_concurrent_commit() {
        let db = test_db();
        db.update(|tx| {
            let bucket = tx.create_bucket_if_not_exists("iso")?;
            bucket.put(b"a", b"1")?;
            bucket.put(b"b", b"1")?;
            bucket.put(b"d", b"1")?;
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let bucket = tx.required_bucket("iso")?;
            let mut cursor = bucket.cursor()?;
            assert_eq!(cursor.next().unwrap()?.0, b"a".to_vec());

            db.update(|tx| {
                let bucket = tx.required_bucket("iso")?;
                bucket.put(b"a", b"2")?;
                bucket.delete(b"b")?;
                bucket.put(b"c", b"2")?;
                bucket.put(b"d", b"2")?;
                Ok(())
            })?;

            // The cursor continues over the state the view was opened on
            let rest: Vec<(Vec<u8>, Vec<u8>)> = cursor.collect::<Result<_>>()?;
            assert_eq!(
                rest,
                vec![(b"b".to_vec(), b"1".to_vec()), (b"d".to_vec(), b"1".to_vec())]
            );
            assert_eq!(bucket.get(b"a")?, Some(b"1".to_vec()));
            assert_eq!(bucket.get(b"c")?, None);
            Ok(())
        })
        .unwrap();

        // A new view sees the committed state
        db.view(|tx| {
            let bucket = tx.required_bucket("iso")?;
            let keys: Vec<Vec<u8>> = bucket
                .cursor()?
                .map(|r| r.map(|(k, _)| k))
                .collect::<Result<_>>()?;
            assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
            assert_eq!(bucket.get(b"a")?, Some(b"2".to_vec()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_closed_views_are_released_without_commits() {
        let db = test_db();
        let commits = db.commit_count();
        for _ in 0..10_000 {
            db.view(|tx| tx.bucket("volume").map(|_| ())).unwrap();
        }
        assert_eq!(db.commit_count(), commits);
        assert!(db.registered_views() <= 1);

        // Nested views stay registered while open
        db.view(|_| {
            db.view(|_| {
                assert_eq!(db.registered_views(), 2);
                Ok(())
            })
        })
        .unwrap();
        db.view(|_| Ok(())).unwrap();
        assert!(db.registered_views() <= 1);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        {
            let db = Db::open(&path, BucketNames::default()).unwrap();
            db.update(|tx| tx.create_bucket_if_not_exists("keep")?.put(b"k", b"v"))
                .unwrap();
            db.flush().unwrap();
        }
        let db = Db::open(&path, BucketNames::default()).unwrap();
        let value = db.view(|tx| tx.required_bucket("keep")?.get(b"k")).unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
    }
}
