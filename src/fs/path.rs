//! Volume-relative path handling

use crate::db::{Dirent, Dirs, ROOT_INODE};
use crate::error::{Error, Result};

/// Split `path` into normalized segments.
///
/// The path is taken relative to the volume root: leading, trailing and
/// repeated slashes are ignored, `.` is dropped and `..` removes the
/// previous segment without ever leaving the root. An empty result names
/// the root itself.
pub fn clean(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments
}

/// Where a path led
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Inode of the final entry
    pub inode: u64,
    /// The final entry; `None` for the root
    pub dirent: Option<Dirent>,
}

impl Resolved {
    /// Whether the resolved entry can be listed
    pub fn is_dir(&self) -> bool {
        self.dirent.as_ref().map_or(true, Dirent::is_dir)
    }
}

/// Walk `segments` from the root.
///
/// Each segment is looked up under the inode the previous one named,
/// whatever kind of entry that was; a file has no children, so a path
/// continuing past a file fails at the next segment.
pub fn resolve(dirs: &Dirs<'_>, segments: &[&str]) -> Result<Resolved> {
    let mut resolved = Resolved {
        inode: ROOT_INODE,
        dirent: None,
    };
    for (i, segment) in segments.iter().enumerate() {
        let dirent = dirs
            .get(resolved.inode, segment)?
            .ok_or_else(|| Error::PathNotFound(segments[..=i].join("/")))?;
        resolved.inode = dirent.inode;
        resolved.dirent = Some(dirent);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BucketNames, Db};

    #[test]
    fn test_clean() {
        let empty: Vec<&str> = Vec::new();
        assert_eq!(clean(""), empty);
        assert_eq!(clean("/"), empty);
        assert_eq!(clean("."), empty);
        assert_eq!(clean(".."), empty);
        assert_eq!(clean("/../.."), empty);
        assert_eq!(clean("a/b"), vec!["a", "b"]);
        assert_eq!(clean("//a//b/"), vec!["a", "b"]);
        assert_eq!(clean("./a/./b/../c"), vec!["a", "c"]);
        assert_eq!(clean("a/../../b"), vec!["b"]);
    }

    fn setup() -> Db {
        let db = Db::temporary(BucketNames::default()).unwrap();
        db.update(|tx| {
            let dirs = Dirs::new(tx.create_bucket_if_not_exists("dir")?);
            dirs.put(ROOT_INODE, "docs", &Dirent::new_dir(2))?;
            dirs.put(2, "report.txt", &Dirent::new_file(3, b"m".to_vec()))?;
            dirs.put(ROOT_INODE, "top.txt", &Dirent::new_file(4, vec![]))?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn resolve_path(db: &Db, path: &str) -> Result<Resolved> {
        db.view(|tx| {
            let dirs = Dirs::new(tx.required_bucket("dir")?);
            resolve(&dirs, &clean(path))
        })
    }

    #[test]
    fn test_resolve_root() {
        let db = setup();
        let root = resolve_path(&db, "/").unwrap();
        assert_eq!(root.inode, ROOT_INODE);
        assert!(root.dirent.is_none());
        assert!(root.is_dir());
    }

    #[test]
    fn test_resolve_nested() {
        let db = setup();
        let docs = resolve_path(&db, "docs").unwrap();
        assert_eq!(docs.inode, 2);
        assert!(docs.is_dir());

        let file = resolve_path(&db, "/docs/./report.txt").unwrap();
        assert_eq!(file.inode, 3);
        assert!(!file.is_dir());
    }

    #[test]
    fn test_resolve_missing() {
        let db = setup();
        match resolve_path(&db, "docs/missing/deeper") {
            Err(Error::PathNotFound(path)) => assert_eq!(path, "docs/missing"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_through_file() {
        let db = setup();
        match resolve_path(&db, "top.txt/x") {
            Err(Error::PathNotFound(path)) => assert_eq!(path, "top.txt/x"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
