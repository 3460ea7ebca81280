//! Open volumes
//!
//! A [`Volume`] is the live handle of one stored volume: it owns the epoch
//! clock, applies local mutations and serves sync pulls to peers.

mod epoch;
pub mod path;
mod sync;
mod volume;

pub use epoch::{EpochClock, EpochGuard};
pub use volume::{Volume, DEFAULT_MAX_BATCH};
