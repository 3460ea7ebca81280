//! Peer directory and per-volume peer authorization

use super::{Bucket, Cursor, Tx, VolumeId};
use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::info;

/// Length of a peer public key in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Small integer naming a peer within this database.
///
/// ID 0 is reserved and always means the local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The local identity
    pub const LOCAL: PeerId = PeerId(0);

    fn to_key(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    fn from_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; 4] = key
            .try_into()
            .map_err(|_| Error::CorruptRecord("peer ID is not 4 bytes".to_string()))?;
        Ok(PeerId(u32::from_be_bytes(bytes)))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer's public key, carried as opaque bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Parse a public key from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::CorruptRecord(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(PublicKey(key))
    }

    /// Parse a public key from its hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Deserialization(format!("invalid public key: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

// Hex for human readable formats, raw bytes otherwise
impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(&s).map_err(D::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };
        PublicKey::from_slice(&bytes).map_err(D::Error::custom)
    }
}

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub pub_key: PublicKey,
}

/// The peer directory, bound to a transaction
pub struct Peers<'tx> {
    peers: Bucket<'tx>,
    keys: Bucket<'tx>,
    volumes: Bucket<'tx>,
}

impl Tx {
    /// Access the peers known to this database
    pub fn peers(&self) -> Result<Peers<'_>> {
        let names = self.names();
        Ok(Peers {
            peers: self.required_bucket(&names.peer)?,
            keys: self.required_bucket(&names.peer_key)?,
            volumes: self.required_bucket(&names.peer_volume)?,
        })
    }
}

/// Create the (peer, volume) authorization key
fn grant_key(id: PeerId, volume: &VolumeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + volume.as_bytes().len());
    key.extend_from_slice(&id.to_key());
    key.extend_from_slice(volume.as_bytes());
    key
}

impl<'tx> Peers<'tx> {
    /// Return the peer with this public key, assigning it an ID if new
    pub fn make(&self, pub_key: &PublicKey) -> Result<Peer> {
        if let Some(peer) = self.get_by_key(pub_key)? {
            return Ok(peer);
        }

        let last = match self.peers.cursor()?.last() {
            Some(item) => PeerId::from_key(&item?.0)?,
            None => PeerId::LOCAL,
        };
        let id = last
            .0
            .checked_add(1)
            .map(PeerId)
            .ok_or_else(|| Error::CorruptRecord("peer ID space exhausted".to_string()))?;

        self.peers.put(&id.to_key(), pub_key.as_bytes())?;
        self.keys.put(pub_key.as_bytes(), &id.to_key())?;
        info!("Added peer {} ({:?})", id, pub_key);
        Ok(Peer {
            id,
            pub_key: *pub_key,
        })
    }

    /// Get a peer by ID
    pub fn get(&self, id: PeerId) -> Result<Peer> {
        let data = self
            .peers
            .get(&id.to_key())?
            .ok_or(Error::PeerNotFound(id.0))?;
        Ok(Peer {
            id,
            pub_key: PublicKey::from_slice(&data)?,
        })
    }

    /// Find a peer by public key
    pub fn get_by_key(&self, pub_key: &PublicKey) -> Result<Option<Peer>> {
        match self.keys.get(pub_key.as_bytes())? {
            Some(id) => Ok(Some(Peer {
                id: PeerId::from_key(&id)?,
                pub_key: *pub_key,
            })),
            None => Ok(None),
        }
    }

    /// Iterate all peers in ID order
    pub fn iter(&self) -> Result<PeerIter> {
        Ok(PeerIter {
            cursor: self.peers.cursor()?,
        })
    }

    /// Authorize peer `id` for `volume`
    pub fn allow(&self, id: PeerId, volume: &VolumeId) -> Result<()> {
        self.get(id)?;
        self.volumes.put(&grant_key(id, volume), &[])
    }

    /// Revoke the authorization of peer `id` for `volume`
    pub fn deny(&self, id: PeerId, volume: &VolumeId) -> Result<()> {
        self.volumes.delete(&grant_key(id, volume))
    }

    /// Whether peer `id` may see `volume`
    pub fn is_allowed(&self, id: PeerId, volume: &VolumeId) -> Result<bool> {
        Ok(self.volumes.get(&grant_key(id, volume))?.is_some())
    }
}

/// Iterator over peers in ID order
pub struct PeerIter {
    cursor: Cursor,
}

impl Iterator for PeerIter {
    type Item = Result<Peer>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.next()?;
        Some(item.and_then(|(key, value)| {
            Ok(Peer {
                id: PeerId::from_key(&key)?,
                pub_key: PublicKey::from_slice(&value)?,
            })
        }))
    }
}
