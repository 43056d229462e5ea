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

//! Memory-mapped segment files using mmap-io.
//!
//! Both shard segments and index segments are fixed-size files mapped
//! read-write for their whole length. They never grow in place: running out
//! of room means creating the next segment, so bytes already written are
//! never moved or remapped.

use std::path::{Path, PathBuf};

use mmap_io::MemoryMappedFile;
use snafu::ensure;

use crate::{
    Result,
    error::{CapacityExhaustedSnafu, CorruptRecordSnafu, MmapFailedSnafu},
};

/// A fixed-size, memory-mapped file.
///
/// All access goes through `&self`; mmap-io serialises the underlying
/// mapping, so concurrent readers and a single appender can share one
/// `DataFile` behind an `Arc`.
pub struct DataFile {
    mmap: MemoryMappedFile,
    path: PathBuf,
    size: u64,
}

impl DataFile {
    /// Create a new zero-filled file of `size` bytes and map it.
    ///
    /// Failure here means the store cannot grow, so it is reported as
    /// capacity exhaustion rather than a generic mapping error.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CapacityExhaustedSnafu {
                    target: parent.display().to_string(),
                    reason: e.to_string(),
                }
                .build()
            })?;
        }

        let mmap = MemoryMappedFile::create_rw(&path, size).map_err(|e| {
            CapacityExhaustedSnafu {
                target: path.display().to_string(),
                reason: e.to_string(),
            }
            .build()
        })?;

        Ok(Self { mmap, path, size })
    }

    /// Open and map an existing file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mmap = MemoryMappedFile::open_rw(&path).map_err(|e| {
            MmapFailedSnafu {
                message: format!("{}: {e}", path.display()),
            }
            .build()
        })?;

        let size = mmap.len();

        Ok(Self { mmap, path, size })
    }

    /// Write data at the specified offset.
    #[inline]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        ensure!(
            offset + data.len() as u64 <= self.size,
            CapacityExhaustedSnafu {
                target: self.path.display().to_string(),
                reason: format!("write of {} bytes at {offset} past end", data.len()),
            }
        );
        self.mmap
            .update_region(offset, data)
            .map_err(|e| MmapFailedSnafu { message: e.to_string() }.build())
    }

    /// Read data from the specified offset into the provided buffer.
    ///
    /// Reading past the end of the file is reported as a corrupt record: it
    /// only happens when a length field points outside the segment.
    #[inline]
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            offset + buf.len() as u64 <= self.size,
            CorruptRecordSnafu {
                position: offset,
                reason:   format!("read of {} bytes runs past {}", buf.len(), self.size),
            }
        );
        self.mmap
            .read_into(offset, buf)
            .map_err(|e| MmapFailedSnafu { message: e.to_string() }.build())
    }

    /// Get file size.
    pub const fn size(&self) -> u64 { self.size }

    /// Get file path.
    pub fn path(&self) -> &Path { &self.path }

    /// Write every dirty page of the mapping back to the file.
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| MmapFailedSnafu { message: e.to_string() }.build())
    }

    /// Flush a specific range to disk.
    pub fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.mmap
            .flush_range(offset, len)
            .map_err(|e| MmapFailedSnafu { message: e.to_string() }.build())
    }
}
