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

//! Per-queue position index.
//!
//! Entry `i` of a queue's index holds the shard position of the queue's
//! `i`-th message, so reads by offset never scan the shard.
//!
//! ## Index Segment Format
//!
//! ```text
//! ┌──────────────────┬──────────────────┬─────┬──────────────────┐
//! │ entry 0 (8B LE)  │ entry 1 (8B LE)  │ ... │ entry n-1 (8B LE)│
//! └──────────────────┴──────────────────┴─────┴──────────────────┘
//! ```
//!
//! Each entry stores `position + 1`; a zero entry is unwritten. Segments are
//! fixed-size, zero-filled on creation and created on demand, so an index
//! that is never appended to owns no files.
//!
//! Appends happen only inside the owning shard's append section, which gives
//! the index a single writer. `len` is published with release ordering after
//! the entry bytes are written; readers bound themselves by an acquire load.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    Result,
    error::{CapacityExhaustedSnafu, InternalSnafu},
    file::DataFile,
    path::{INDEX_SEGMENT_EXT, scan_segments, segment_path},
};

/// Size of one index entry in bytes.
pub const INDEX_ENTRY_SIZE: u64 = 8;

/// Cap on the up-front allocation in `read_range`.
const MAX_PREALLOCATED_ENTRIES: u64 = 4096;

pub struct QueueIndex {
    queue_id:            u64,
    dir:                 PathBuf,
    segment_size:        u64,
    entries_per_segment: u64,
    segments:            RwLock<Vec<Arc<DataFile>>>,
    /// Number of valid entries.
    len:                 AtomicU64,
    /// Number of entries known to be flushed.
    flushed:             AtomicU64,
}

impl QueueIndex {
    /// Create an empty index rooted at `dir`. Nothing touches disk until the
    /// first append.
    pub fn new(queue_id: u64, dir: PathBuf, segment_size: u64) -> Self {
        Self {
            queue_id,
            dir,
            segment_size,
            entries_per_segment: segment_size / INDEX_ENTRY_SIZE,
            segments: RwLock::new(Vec::new()),
            len: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
        }
    }

    /// Open an index from disk.
    ///
    /// The valid length is the longest prefix of written entries whose
    /// positions are below `shard_end`. Entries past that prefix are zeroed
    /// so later appends start from a clean slate.
    pub fn open(queue_id: u64, dir: PathBuf, segment_size: u64, shard_end: u64) -> Result<Self> {
        let index = Self::new(queue_id, dir, segment_size);

        let files = scan_segments(&index.dir, INDEX_SEGMENT_EXT)?;
        {
            let mut segments = index.segments.write();
            for (expected, (segment, path)) in files.iter().enumerate() {
                ensure!(
                    *segment == expected as u64,
                    InternalSnafu {
                        message: format!("index for queue {queue_id} is missing segment {expected}"),
                    }
                );
                let file = DataFile::open(path)?;
                ensure!(
                    file.size() == segment_size,
                    InternalSnafu {
                        message: format!(
                            "index segment {} has size {}, expected {segment_size}",
                            path.display(),
                            file.size()
                        ),
                    }
                );
                segments.push(Arc::new(file));
            }
        }

        let capacity = index.capacity();
        let mut len = 0;
        while len < capacity {
            match index.entry(len)? {
                Some(position) if position < shard_end => len += 1,
                _ => break,
            }
        }

        let mut stale = 0u64;
        for i in len..capacity {
            if index.raw_entry(i)? != 0 {
                index.write_raw(i, 0)?;
                stale += 1;
            }
        }
        if stale > 0 {
            warn!(queue_id, len, stale, "Discarded index entries past recovered log end");
        }

        index.len.store(len, Ordering::Release);
        index.flushed.store(len, Ordering::Release);

        debug!(queue_id, len, segments = files.len(), "Opened queue index");
        Ok(index)
    }

    pub const fn queue_id(&self) -> u64 { self.queue_id }

    /// Number of messages recorded for the queue.
    pub fn len(&self) -> u64 { self.len.load(Ordering::Acquire) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Position of the most recent entry.
    pub fn last(&self) -> Result<Option<u64>> {
        match self.len() {
            0 => Ok(None),
            len => self.entry(len - 1),
        }
    }

    /// Make sure the slot for the next entry is backed by a segment.
    ///
    /// Called inside the shard's append section before the frame is written,
    /// so that a frame is never committed without room for its index entry.
    pub(crate) fn reserve(&self) -> Result<()> {
        let next = self.len.load(Ordering::Relaxed);
        self.segment_for_write(next / self.entries_per_segment)
            .map(|_| ())
    }

    /// Record the position of the queue's next message.
    ///
    /// Must be called from inside the owning shard's append section.
    pub(crate) fn append(&self, position: u64) -> Result<()> {
        let next = self.len.load(Ordering::Relaxed);
        ensure!(
            position < u64::MAX,
            CapacityExhaustedSnafu {
                target: format!("index of queue {}", self.queue_id),
                reason: "position cannot be encoded",
            }
        );
        self.write_raw(next, position + 1)?;
        self.len.store(next + 1, Ordering::Release);
        Ok(())
    }

    /// Positions of up to `count` consecutive messages starting at `offset`.
    ///
    /// The range is clipped to the current length; an offset at or past the
    /// end produces an empty vector.
    pub fn read_range(&self, offset: u64, count: u64) -> Result<Vec<u64>> {
        let len = self.len();
        if offset >= len || count == 0 {
            return Ok(Vec::new());
        }

        let end = offset + count.min(len - offset);
        let mut positions =
            Vec::with_capacity((end - offset).min(MAX_PREALLOCATED_ENTRIES) as usize);

        let segments = self.segments.read().clone();
        let mut i = offset;
        while i < end {
            let segment = i / self.entries_per_segment;
            let first = i % self.entries_per_segment;
            let take = (self.entries_per_segment - first).min(end - i);

            let Some(file) = segments.get(segment as usize) else {
                break;
            };
            let mut buf = vec![0u8; (take * INDEX_ENTRY_SIZE) as usize];
            file.read_at(first * INDEX_ENTRY_SIZE, &mut buf)?;

            for chunk in buf.chunks_exact(INDEX_ENTRY_SIZE as usize) {
                let mut raw = [0u8; INDEX_ENTRY_SIZE as usize];
                raw.copy_from_slice(chunk);
                match u64::from_le_bytes(raw) {
                    0 => return Ok(positions),
                    stored => positions.push(stored - 1),
                }
            }
            i += take;
        }

        Ok(positions)
    }

    /// Flush entries appended since the last flush, up to `upto`.
    pub fn flush(&self, upto: u64) -> Result<()> {
        let from = self.flushed.load(Ordering::Acquire);
        if upto <= from {
            return Ok(());
        }

        let segments = self.segments.read().clone();
        let first = from / self.entries_per_segment;
        let last = (upto - 1) / self.entries_per_segment;
        for segment in first..=last {
            let Some(file) = segments.get(segment as usize) else {
                break;
            };
            let start = if segment == first {
                from % self.entries_per_segment
            } else {
                0
            };
            let end = if segment == last {
                (upto - 1) % self.entries_per_segment + 1
            } else {
                self.entries_per_segment
            };
            file.flush_range(start * INDEX_ENTRY_SIZE, (end - start) * INDEX_ENTRY_SIZE)?;
        }

        self.flushed.fetch_max(upto, Ordering::AcqRel);
        Ok(())
    }

    fn capacity(&self) -> u64 { self.segments.read().len() as u64 * self.entries_per_segment }

    fn entry(&self, i: u64) -> Result<Option<u64>> {
        Ok(self.raw_entry(i)?.checked_sub(1))
    }

    fn raw_entry(&self, i: u64) -> Result<u64> {
        let Some(file) = self
            .segments
            .read()
            .get((i / self.entries_per_segment) as usize)
            .cloned()
        else {
            return Ok(0);
        };
        let mut raw = [0u8; INDEX_ENTRY_SIZE as usize];
        file.read_at((i % self.entries_per_segment) * INDEX_ENTRY_SIZE, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    fn write_raw(&self, i: u64, value: u64) -> Result<()> {
        let file = self.segment_for_write(i / self.entries_per_segment)?;
        file.write_at(
            (i % self.entries_per_segment) * INDEX_ENTRY_SIZE,
            &value.to_le_bytes(),
        )
    }

    fn segment_for_write(&self, segment: u64) -> Result<Arc<DataFile>> {
        if let Some(file) = self.segments.read().get(segment as usize) {
            return Ok(file.clone());
        }

        let mut segments = self.segments.write();
        if let Some(file) = segments.get(segment as usize) {
            return Ok(file.clone());
        }
        ensure!(
            segment == segments.len() as u64,
            InternalSnafu {
                message: format!(
                    "index of queue {} cannot skip to segment {segment}",
                    self.queue_id
                ),
            }
        );

        let path = segment_path(&self.dir, segment, INDEX_SEGMENT_EXT);
        let file = Arc::new(DataFile::create(&path, self.segment_size)?);
        segments.push(file.clone());

        debug!(queue_id = self.queue_id, segment, "Created index segment");
        Ok(file)
    }
}
