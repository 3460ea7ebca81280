//! Inode allocation

use super::dirs::ROOT_INODE;
use super::Bucket;
use crate::error::{Error, Result};

/// Key of the next free inode counter
const NEXT_KEY: &[u8] = b"next";

/// The inode table of a volume
pub struct InodeTable<'tx> {
    bucket: Bucket<'tx>,
}

impl<'tx> InodeTable<'tx> {
    pub(crate) fn new(bucket: Bucket<'tx>) -> Self {
        InodeTable { bucket }
    }

    /// Allocate a fresh inode number
    pub fn allocate(&self) -> Result<u64> {
        let ino = match self.bucket.get(NEXT_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::CorruptRecord("inode counter is not 8 bytes".to_string())
                })?;
                u64::from_be_bytes(bytes)
            }
            None => ROOT_INODE + 1,
        };
        let next = ino
            .checked_add(1)
            .ok_or_else(|| Error::CorruptRecord("inode counter overflow".to_string()))?;
        self.bucket.put(NEXT_KEY, &next.to_be_bytes())?;
        Ok(ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BucketNames, Db};

    #[test]
    fn test_allocate_sequence() {
        let db = Db::temporary(BucketNames::default()).unwrap();
        let first = db
            .update(|tx| {
                let table = InodeTable::new(tx.create_bucket_if_not_exists("inode")?);
                let a = table.allocate()?;
                let b = table.allocate()?;
                assert_eq!(b, a + 1);
                Ok(a)
            })
            .unwrap();
        assert_eq!(first, ROOT_INODE + 1);

        // The counter survives the transaction
        let next = db
            .update(|tx| InodeTable::new(tx.required_bucket("inode")?).allocate())
            .unwrap();
        assert_eq!(next, first + 2);
    }
}
