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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Store operation errors.
///
/// An unknown queue is not represented here: reads from a queue that was
/// never written to produce an empty result.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(context(false), display("IO error: {source}"))]
    Io { source: io::Error },

    /// Queue name or payload is longer than the configured maximum.
    ///
    /// Raised before any lock is taken; queue state is unchanged.
    #[snafu(display("{field} length {len} exceeds maximum encodable length {max}"))]
    FramingOverflow {
        field: &'static str,
        len:   usize,
        max:   usize,
    },

    /// A shard or index could not grow to fit the next write.
    #[snafu(display("Capacity exhausted for {target}: {reason}"))]
    CapacityExhausted { target: String, reason: String },

    /// A frame header or checksum did not decode.
    #[snafu(display("Corrupt record at position {position}: {reason}"))]
    CorruptRecord { position: u64, reason: String },

    /// Memory mapping operation failed.
    #[snafu(display("Mmap operation failed: {message}"))]
    MmapFailed { message: String },

    /// Manifest failed magic, checksum or structural validation.
    #[snafu(display("Manifest corrupted: {reason}"))]
    ManifestCorrupted { reason: String },

    #[snafu(display("Unsupported manifest version: {version}"))]
    UnsupportedManifestVersion { version: u32 },

    /// Configuration rejected by validation or inconsistent with data on
    /// disk.
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    /// Invalid or inaccessible file path.
    #[snafu(display("Invalid file path: {}", path.display()))]
    InvalidPath { path: PathBuf },

    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, QueueError>;
