//! Messages exchanged with peers during volume synchronization
//!
//! The types are plain serde structures; framing them onto a transport is
//! left to the caller.

use crate::db::{PeerId, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One message of a sync pull stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPullItem {
    /// Peers the receiver may encounter in clocks; only on the first message
    #[serde(default)]
    pub peers: Option<BTreeMap<PeerId, PublicKey>>,
    /// Directory entries, in listing order
    #[serde(default)]
    pub children: Vec<SyncDirent>,
    #[serde(default)]
    pub error: Option<SyncPullError>,
}

impl SyncPullItem {
    /// A message carrying only an error
    pub fn error(error: SyncPullError) -> Self {
        SyncPullItem {
            error: Some(error),
            ..Default::default()
        }
    }

    /// True if the message carries neither a roster nor entries nor an error
    pub fn is_empty(&self) -> bool {
        self.peers.is_none() && self.children.is_empty() && self.error.is_none()
    }
}

/// A directory entry as sent to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDirent {
    pub name: String,
    pub kind: SyncDirentKind,
    /// Serialized [`crate::clock::Clock`] of the entry
    #[serde(with = "hex_bytes")]
    pub clock: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirentKind {
    File {
        #[serde(with = "hex_bytes")]
        manifest: Vec<u8>,
    },
    Dir,
}

/// In-band errors of a sync pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPullError {
    /// The requested path names a file
    NotADirectory,
}

/// Hex encoding for byte fields in human readable formats
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(&s).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PUBLIC_KEY_LEN;

    #[test]
    fn test_error_message_json() {
        let msg = SyncPullItem::error(SyncPullError::NotADirectory);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"peers":null,"children":[],"error":"NOT_A_DIRECTORY"}"#
        );
        // Fields may be omitted by the sender
        let back: SyncPullItem = serde_json::from_str(r#"{"error":"NOT_A_DIRECTORY"}"#).unwrap();
        assert_eq!(back, msg);
        assert!(!msg.is_empty());
        assert!(SyncPullItem::default().is_empty());
    }

    #[test]
    fn test_json_shape() {
        let mut peers = BTreeMap::new();
        peers.insert(PeerId::LOCAL, PublicKey([1; PUBLIC_KEY_LEN]));
        let msg = SyncPullItem {
            peers: Some(peers),
            children: vec![
                SyncDirent {
                    name: "a.txt".to_string(),
                    kind: SyncDirentKind::File {
                        manifest: vec![0xde, 0xad],
                    },
                    clock: vec![1, 2],
                },
                SyncDirent {
                    name: "sub".to_string(),
                    kind: SyncDirentKind::Dir,
                    clock: vec![],
                },
            ],
            error: None,
        };

        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["peers"]["0"], "01".repeat(PUBLIC_KEY_LEN));
        assert_eq!(value["children"][0]["kind"]["file"]["manifest"], "dead");
        assert_eq!(value["children"][0]["clock"], "0102");
        assert_eq!(value["children"][1]["name"], "sub");
        assert_eq!(value["children"][1]["kind"], "dir");
        assert!(value["error"].is_null());

        let back: SyncPullItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);

        let bytes = bincode::serialize(&msg).unwrap();
        assert_eq!(bincode::deserialize::<SyncPullItem>(&bytes).unwrap(), msg);
    }
}
