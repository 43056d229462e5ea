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

//! CRC32 checksum utilities for frame integrity verification.
//!
//! Uses CRC-32 (IEEE polynomial) via crc32fast. The checksum covers the frame
//! header as well as the name and payload, so a torn length field is caught
//! the same way as a torn payload.

use crc32fast::Hasher;

/// Calculates the CRC32 checksum of a frame from its header and body parts.
#[inline]
pub(crate) fn calculate_frame_crc(header: &[u8], name: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(name);
    hasher.update(payload);
    hasher.finalize()
}

/// Verifies a frame checksum against the stored value.
#[inline]
pub(crate) fn verify_frame_crc(header: &[u8], name: &[u8], payload: &[u8], expected: u32) -> bool {
    calculate_frame_crc(header, name, payload) == expected
}

/// CRC32 of an arbitrary byte slice, used by the manifest codec.
#[inline]
pub(crate) fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
