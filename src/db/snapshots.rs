//! Snapshot history of a volume

use super::Bucket;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotRecord;
use tracing::debug;

/// The snapshot namespace of a volume, keyed by snapshot name
pub struct Snapshots<'tx> {
    bucket: Bucket<'tx>,
}

impl<'tx> Snapshots<'tx> {
    pub(crate) fn new(bucket: Bucket<'tx>) -> Self {
        Snapshots { bucket }
    }

    /// Record a snapshot; names are never reused
    pub fn put(&self, record: &SnapshotRecord) -> Result<()> {
        let key = record.name.as_bytes();
        if self.bucket.get(key)?.is_some() {
            return Err(Error::SnapshotAlreadyExists(record.name.clone()));
        }
        self.bucket.put(key, &record.serialize()?)?;
        debug!("Recorded snapshot {}", record.name);
        Ok(())
    }

    /// Get a snapshot by name
    pub fn get(&self, name: &str) -> Result<SnapshotRecord> {
        let data = self
            .bucket
            .get(name.as_bytes())?
            .ok_or_else(|| Error::SnapshotNotFound(name.to_string()))?;
        SnapshotRecord::deserialize(&data)
    }

    /// All snapshots, ordered by name
    pub fn list(&self) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        for item in self.bucket.cursor()? {
            let (_, data) = item?;
            records.push(SnapshotRecord::deserialize(&data)?);
        }
        Ok(records)
    }
}
