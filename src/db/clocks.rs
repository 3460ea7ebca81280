//! Per-dirent clocks
//!
//! Stored under the same (parent, name) key as the dirent they describe,
//! in a namespace of their own.

use super::dirs::dirent_key;
use super::Bucket;
use crate::clock::Clock;
use crate::error::Result;

/// The clock namespace of a volume
pub struct Clocks<'tx> {
    volume: Bucket<'tx>,
    name: String,
}

impl<'tx> Clocks<'tx> {
    pub(crate) fn new(volume: Bucket<'tx>, name: String) -> Self {
        Clocks { volume, name }
    }

    /// Get the clock of entry `name` in directory `parent`
    pub fn get(&self, parent: u64, name: &str) -> Result<Option<Clock>> {
        let bucket = match self.volume.bucket(self.name.as_bytes())? {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        match bucket.get(&dirent_key(parent, name))? {
            Some(data) => Ok(Some(Clock::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    /// Store the clock of entry `name` in directory `parent`
    pub fn put(&self, parent: u64, name: &str, clock: &Clock) -> Result<()> {
        let bucket = self.volume.create_bucket_if_not_exists(self.name.as_bytes())?;
        bucket.put(&dirent_key(parent, name), &clock.to_bytes()?)
    }
}
