// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Checkpoint manifest.
//!
//! The manifest records, as of the last checkpoint, how far each shard was
//! written and which queues existed. Startup replays shards only from the
//! recorded cursors instead of from the beginning.
//!
//! ## Binary Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                       │
//! ├──────────────────────┬─────────────────────────────────┤
//! │ magic: [u8; 4]       │ "QMFT" (0x514D4654)             │
//! │ version: u32         │ Format version, currently 2     │
//! │ next_identity: u64   │ Next queue identity to assign   │
//! │ shard_count: u32     │ Shard count of the data dir     │
//! │ checksum: u32        │ CRC32 of content after header   │
//! │ shard_entries: u32   │ Number of ShardCheckpoint       │
//! │ queue_entries: u32   │ Number of QueueCheckpoint       │
//! ├──────────────────────┴─────────────────────────────────┤
//! │ ShardCheckpoint[]: shard_id u32, write_cursor u64      │
//! │ QueueCheckpoint[]: queue_id u64, index_len u64,        │
//! │                    name_len u32, name [u8]             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut, Bytes};
use snafu::ensure;

use crate::{
    Result,
    crc::checksum,
    error::{ManifestCorruptedSnafu, UnsupportedManifestVersionSnafu},
};

/// Magic bytes identifying a manifest file: "QMFT"
pub const MANIFEST_MAGIC: [u8; 4] = [0x51, 0x4D, 0x46, 0x54];

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 2;

/// Size of the manifest header in bytes.
pub const MANIFEST_HEADER_SIZE: usize = 32;

const SHARD_ENTRY_SIZE: usize = 12;
const QUEUE_ENTRY_FIXED_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version:       u32,
    /// Identity the next new queue will receive.
    pub next_identity: u64,
    pub shard_count:   u32,
    /// Write cursors of shards that had been created.
    pub shards:        Vec<ShardCheckpoint>,
    pub queues:        Vec<QueueCheckpoint>,
}

impl Manifest {
    pub const fn new(shard_count: u32) -> Self {
        Self {
            version: MANIFEST_VERSION,
            next_identity: 0,
            shard_count,
            shards: Vec::new(),
            queues: Vec::new(),
        }
    }

    /// Checkpointed write cursor of a shard, or zero if it had none.
    pub fn shard_cursor(&self, shard_id: u32) -> u64 {
        self.shards
            .iter()
            .find(|s| s.shard_id == shard_id)
            .map_or(0, |s| s.write_cursor)
    }
}

/// Every byte of the shard below `write_cursor` was flushed together with
/// the index entries that point into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardCheckpoint {
    pub shard_id:     u32,
    pub write_cursor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCheckpoint {
    pub queue_id:  u64,
    /// Index length at checkpoint time.
    pub index_len: u64,
    pub name:      Bytes,
}

impl Manifest {
    pub fn serialize(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(
            self.shards.len() * SHARD_ENTRY_SIZE
                + self
                    .queues
                    .iter()
                    .map(|q| QUEUE_ENTRY_FIXED_SIZE + q.name.len())
                    .sum::<usize>(),
        );
        for shard in &self.shards {
            content.put_u32_le(shard.shard_id);
            content.put_u64_le(shard.write_cursor);
        }
        for queue in &self.queues {
            content.put_u64_le(queue.queue_id);
            content.put_u64_le(queue.index_len);
            content.put_u32_le(queue.name.len() as u32);
            content.put_slice(&queue.name);
        }

        let mut result = Vec::with_capacity(MANIFEST_HEADER_SIZE + content.len());
        result.put_slice(&MANIFEST_MAGIC);
        result.put_u32_le(self.version);
        result.put_u64_le(self.next_identity);
        result.put_u32_le(self.shard_count);
        result.put_u32_le(checksum(&content));
        result.put_u32_le(self.shards.len() as u32);
        result.put_u32_le(self.queues.len() as u32);
        result.extend(content);
        result
    }

    /// Validates magic, version, checksum and structure.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= MANIFEST_HEADER_SIZE,
            ManifestCorruptedSnafu {
                reason: format!(
                    "data too short: {} bytes, expected at least {MANIFEST_HEADER_SIZE}",
                    data.len()
                ),
            }
        );

        let mut header = &data[..MANIFEST_HEADER_SIZE];
        let magic = &header[..4];
        ensure!(
            magic == MANIFEST_MAGIC,
            ManifestCorruptedSnafu {
                reason: format!("invalid magic: {magic:?}"),
            }
        );
        header.advance(4);

        let version = header.get_u32_le();
        ensure!(
            version == MANIFEST_VERSION,
            UnsupportedManifestVersionSnafu { version }
        );

        let next_identity = header.get_u64_le();
        let shard_count = header.get_u32_le();
        let stored_checksum = header.get_u32_le();
        let shard_entries = header.get_u32_le();
        let queue_entries = header.get_u32_le();

        let mut content = &data[MANIFEST_HEADER_SIZE..];
        let computed_checksum = checksum(content);
        ensure!(
            stored_checksum == computed_checksum,
            ManifestCorruptedSnafu {
                reason: format!(
                    "checksum mismatch: stored={stored_checksum:#x}, computed={computed_checksum:#x}"
                ),
            }
        );

        let mut shards = Vec::new();
        for _ in 0..shard_entries {
            require(&content, SHARD_ENTRY_SIZE, "shard entry")?;
            shards.push(ShardCheckpoint {
                shard_id:     content.get_u32_le(),
                write_cursor: content.get_u64_le(),
            });
        }

        let mut queues = Vec::new();
        for _ in 0..queue_entries {
            require(&content, QUEUE_ENTRY_FIXED_SIZE, "queue entry")?;
            let queue_id = content.get_u64_le();
            let index_len = content.get_u64_le();
            let name_len = content.get_u32_le() as usize;
            require(&content, name_len, "queue name")?;
            let name = Bytes::copy_from_slice(&content[..name_len]);
            content.advance(name_len);
            queues.push(QueueCheckpoint {
                queue_id,
                index_len,
                name,
            });
        }

        ensure!(
            content.is_empty(),
            ManifestCorruptedSnafu {
                reason: format!("{} trailing bytes", content.len()),
            }
        );

        Ok(Self {
            version,
            next_identity,
            shard_count,
            shards,
            queues,
        })
    }
}

fn require(content: &[u8], len: usize, what: &str) -> Result<()> {
    ensure!(
        content.len() >= len,
        ManifestCorruptedSnafu {
            reason: format!("truncated {what}: {} bytes left, need {len}", content.len()),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    fn sample() -> Manifest {
        Manifest {
            version:       MANIFEST_VERSION,
            next_identity: 3,
            shard_count:   4,
            shards:        vec![
                ShardCheckpoint {
                    shard_id:     0,
                    write_cursor: 4096,
                },
                ShardCheckpoint {
                    shard_id:     2,
                    write_cursor: 77,
                },
            ],
            queues:        vec![
                QueueCheckpoint {
                    queue_id:  0,
                    index_len: 12,
                    name:      Bytes::from_static(b"orders"),
                },
                QueueCheckpoint {
                    queue_id:  2,
                    index_len: 1,
                    name:      Bytes::from_static(b"audit"),
                },
            ],
        }
    }

    #[test]
    fn test_manifest_new() {
        let manifest = Manifest::new(16);
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.next_identity, 0);
        assert_eq!(manifest.shard_count, 16);
        assert_eq!(manifest.shard_cursor(5), 0);
    }

    #[test]
    fn test_manifest_roundtrip_with_data() {
        let manifest = sample();
        let recovered = Manifest::deserialize(&manifest.serialize()).unwrap();

        assert_eq!(recovered, manifest);
        assert_eq!(recovered.shard_cursor(0), 4096);
        assert_eq!(recovered.shard_cursor(1), 0);
        assert_eq!(recovered.shard_cursor(2), 77);
    }

    fn corrupt_magic(bytes: &mut Vec<u8>) { bytes[0] = 0xFF; }

    fn corrupt_checksum(bytes: &mut Vec<u8>) { bytes[20] ^= 0xFF; }

    fn corrupt_content(bytes: &mut Vec<u8>) { bytes[MANIFEST_HEADER_SIZE + 3] ^= 0x01; }

    fn truncate_content(bytes: &mut Vec<u8>) { bytes.truncate(bytes.len() - 2); }

    fn overstate_queue_count(bytes: &mut Vec<u8>) {
        // Re-sign so only the structural check can fail.
        bytes[28] = 3;
        let crc = checksum(&bytes[MANIFEST_HEADER_SIZE..]);
        bytes[20..24].copy_from_slice(&crc.to_le_bytes());
    }

    #[test_case(corrupt_magic ; "invalid magic")]
    #[test_case(corrupt_checksum ; "invalid checksum")]
    #[test_case(corrupt_content ; "flipped content bit")]
    #[test_case(truncate_content ; "truncated content")]
    #[test_case(overstate_queue_count ; "entry count exceeds content")]
    fn test_manifest_deserialize_corrupted(corrupt_fn: fn(&mut Vec<u8>)) {
        let mut bytes = sample().serialize();
        corrupt_fn(&mut bytes);
        assert!(matches!(
            Manifest::deserialize(&bytes),
            Err(QueueError::ManifestCorrupted { .. })
        ));
    }

    #[test]
    fn test_manifest_unsupported_version() {
        let mut bytes = sample().serialize();
        bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            Manifest::deserialize(&bytes),
            Err(QueueError::UnsupportedManifestVersion { version: 1 })
        ));
    }

    #[test]
    fn test_manifest_deserialize_too_short() {
        let bytes = vec![0u8; 10];
        assert!(Manifest::deserialize(&bytes).is_err());
    }
}
