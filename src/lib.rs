//! volsync - Volume metadata and incremental directory sync
//!
//! This library keeps the metadata of peer-replicated volumes in a
//! transactional store, tracks mutations with per-volume epochs and
//! per-entry vector clocks, and streams directory contents to peers.

pub mod chunk;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod snapshot;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, Epoch};
    pub use crate::config::Config;
    pub use crate::db::{Db, PeerId, PublicKey, VolumeId};
    pub use crate::error::{Error, Result};
    pub use crate::fs::Volume;
    pub use crate::wire::SyncPullItem;
}
