//! Error types for volsync

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for volsync
#[derive(Error, Debug)]
pub enum Error {
    // Volume errors
    #[error("Invalid volume name")]
    InvalidVolumeName,

    #[error("Volume name exists already: {0}")]
    VolumeNameExists(String),

    #[error("Volume name not found: {0}")]
    VolumeNameNotFound(String),

    #[error("Volume ID not found: {0}")]
    VolumeIdNotFound(String),

    #[error("Storage backend exists already: {0}")]
    StorageNameExists(String),

    #[error("Storage backend not found: {0}")]
    StorageNotFound(String),

    // Directory errors
    #[error("Inode not found: {0}")]
    InodeNotFound(u64),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Clock not found for {name:?} in inode {parent}")]
    ClockNotFound { parent: u64, name: String },

    // Peer errors
    #[error("Peer not found: {0}")]
    PeerNotFound(u32),

    // Snapshot errors
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot already exists: {0}")]
    SnapshotAlreadyExists(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Bucket exists already")]
    BucketExists,

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    // Sync errors
    #[error("Transport error: {0}")]
    Transport(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Random source failed: {0}")]
    Entropy(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Convert to libc errno for the kernel dispatch layer
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::InodeNotFound(_)
            | Error::PathNotFound(_)
            | Error::VolumeNameNotFound(_)
            | Error::VolumeIdNotFound(_)
            | Error::SnapshotNotFound(_)
            | Error::ChunkNotFound(_) => libc::ENOENT,
            Error::AlreadyExists(_)
            | Error::VolumeNameExists(_)
            | Error::StorageNameExists(_)
            | Error::SnapshotAlreadyExists(_) => libc::EEXIST,
            Error::InvalidVolumeName | Error::InvalidName(_) => libc::EINVAL,
            Error::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Error::ReadOnlyTransaction => libc::EROFS,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    /// Whether this error reports a missing entity rather than a failure
    pub fn is_not_found(&self) -> bool {
        self.to_errno() == libc::ENOENT
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::PathNotFound("a/b".to_string()).to_errno(), libc::ENOENT);
        assert_eq!(Error::InvalidVolumeName.to_errno(), libc::EINVAL);
        assert_eq!(
            Error::VolumeNameExists("home".to_string()).to_errno(),
            libc::EEXIST
        );
        assert_eq!(Error::Transport("closed".to_string()).to_errno(), libc::EIO);
    }

    #[test]
    fn test_not_found_distinction() {
        assert!(Error::VolumeNameNotFound("home".to_string()).is_not_found());
        assert!(Error::PathNotFound("docs".to_string()).is_not_found());
        assert!(!Error::BucketExists.is_not_found());
    }
}
