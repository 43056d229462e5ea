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

//! Record framing for commit log shards.
//!
//! Every record written to a shard is self-describing, so a shard can be
//! replayed from any frame boundary without an external index:
//!
//! ```text
//! ┌───────────────┬───────────────┬────────────────┬────────┬───────────┬─────────────┐
//! │ queue_id (8B) │ name_len (4B) │ payload_len(4B)│  name  │  payload  │ CRC32 (4B)  │
//! │ little-endian │ little-endian │ little-endian  │ bytes  │  bytes    │ little-end. │
//! └───────────────┴───────────────┴────────────────┴────────┴───────────┴─────────────┘
//! ```
//!
//! Lengths are 32-bit so payloads well beyond 1 KiB encode without loss; the
//! effective limits come from [`StoreConfig`](crate::StoreConfig). The CRC
//! covers the 16-byte header, the name and the payload. A zero-filled region
//! never verifies, which is how unused segment tails are recognised.

use bytes::Bytes;
use snafu::ensure;

use crate::{
    Result,
    crc::{calculate_frame_crc, verify_frame_crc},
    error::{CorruptRecordSnafu, FramingOverflowSnafu},
};

/// Size of the fixed frame header: queue id, name length, payload length.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Size of the trailing CRC32 checksum.
pub const FRAME_CRC_SIZE: usize = 4;

/// Total on-disk size of a frame.
#[inline]
#[must_use]
pub const fn frame_size(name_len: usize, payload_len: usize) -> usize {
    FRAME_HEADER_SIZE + name_len + payload_len + FRAME_CRC_SIZE
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Identity of the queue the record belongs to.
    pub queue_id: u64,
    pub name:     Bytes,
    pub payload:  Bytes,
}

/// Parsed fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub queue_id:    u64,
    pub name_len:    u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub(crate) fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let mut queue_id = [0u8; 8];
        let mut name_len = [0u8; 4];
        let mut payload_len = [0u8; 4];
        queue_id.copy_from_slice(&buf[0..8]);
        name_len.copy_from_slice(&buf[8..12]);
        payload_len.copy_from_slice(&buf[12..16]);

        Self {
            queue_id:    u64::from_le_bytes(queue_id),
            name_len:    u32::from_le_bytes(name_len),
            payload_len: u32::from_le_bytes(payload_len),
        }
    }

    fn to_bytes(self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.queue_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.name_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Bytes following the header: name, payload and CRC.
    pub(crate) const fn body_len(self) -> u64 {
        self.name_len as u64 + self.payload_len as u64 + FRAME_CRC_SIZE as u64
    }

    pub(crate) const fn frame_len(self) -> u64 { FRAME_HEADER_SIZE as u64 + self.body_len() }

    /// Decode the body that follows this header and verify its checksum.
    ///
    /// `position` is only used for error reporting.
    pub(crate) fn decode_body(self, position: u64, body: &[u8]) -> Result<Frame> {
        ensure!(
            body.len() as u64 == self.body_len(),
            CorruptRecordSnafu {
                position,
                reason: format!("expected {} body bytes, got {}", self.body_len(), body.len()),
            }
        );

        let name_end = self.name_len as usize;
        let payload_end = name_end + self.payload_len as usize;
        let name = &body[..name_end];
        let payload = &body[name_end..payload_end];

        let mut stored = [0u8; FRAME_CRC_SIZE];
        stored.copy_from_slice(&body[payload_end..]);

        ensure!(
            verify_frame_crc(&self.to_bytes(), name, payload, u32::from_le_bytes(stored)),
            CorruptRecordSnafu {
                position,
                reason: "checksum mismatch",
            }
        );

        Ok(Frame {
            queue_id: self.queue_id,
            name:     Bytes::copy_from_slice(name),
            payload:  Bytes::copy_from_slice(payload),
        })
    }
}

/// Encodes records into frames, enforcing the configured length limits.
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    max_name_len:    usize,
    max_payload_len: usize,
}

impl Framer {
    #[must_use]
    pub const fn new(max_name_len: usize, max_payload_len: usize) -> Self {
        Self {
            max_name_len,
            max_payload_len,
        }
    }

    /// Reject names or payloads the frame format cannot carry.
    pub fn check(&self, name: &[u8], payload: &[u8]) -> Result<()> {
        ensure!(
            name.len() <= self.max_name_len,
            FramingOverflowSnafu {
                field: "queue name",
                len:   name.len(),
                max:   self.max_name_len,
            }
        );
        ensure!(
            payload.len() <= self.max_payload_len,
            FramingOverflowSnafu {
                field: "payload",
                len:   payload.len(),
                max:   self.max_payload_len,
            }
        );
        Ok(())
    }

    /// Encode one record into a contiguous frame.
    pub fn encode(&self, queue_id: u64, name: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
        self.check(name, payload)?;

        let header = FrameHeader {
            queue_id,
            name_len: u32::try_from(name.len()).map_err(|_| {
                FramingOverflowSnafu {
                    field: "queue name",
                    len:   name.len(),
                    max:   u32::MAX as usize,
                }
                .build()
            })?,
            payload_len: u32::try_from(payload.len()).map_err(|_| {
                FramingOverflowSnafu {
                    field: "payload",
                    len:   payload.len(),
                    max:   u32::MAX as usize,
                }
                .build()
            })?,
        }
        .to_bytes();
        let crc = calculate_frame_crc(&header, name, payload);

        let mut frame = Vec::with_capacity(frame_size(name.len(), payload.len()));
        frame.extend_from_slice(&header);
        frame.extend_from_slice(name);
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Decode a complete frame held in `buf`.
///
/// Used when the whole frame is already in memory; shard reads go through
/// [`FrameHeader`] to learn the body length first.
pub fn decode(position: u64, buf: &[u8]) -> Result<Frame> {
    ensure!(
        buf.len() >= FRAME_HEADER_SIZE,
        CorruptRecordSnafu {
            position,
            reason: format!("frame shorter than header: {} bytes", buf.len()),
        }
    );
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
    FrameHeader::parse(&header).decode_body(position, &buf[FRAME_HEADER_SIZE..])
}
