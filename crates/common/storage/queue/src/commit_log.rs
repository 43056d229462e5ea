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

//! Commit log shard: one append-only, segmented, memory-mapped byte log.
//!
//! A shard is shared by every queue whose identity maps to it. Records from
//! different queues interleave in write order, and each frame can be decoded
//! from its start position alone.
//!
//! ## Positions
//!
//! A physical position is a shard-wide byte offset. Segments are fixed-size
//! files, so position `p` lives in segment `p / segment_size` at offset
//! `p % segment_size`. A frame never straddles two segments: when it does not
//! fit in the space left, the write cursor skips to the start of the next
//! segment and the tail of the previous one stays zero-filled.
//!
//! ## Concurrency
//!
//! Appends go through [`CommitLog::lock`], which returns an [`AppendSection`]
//! holding the shard's writer mutex. Readers never take that mutex: they
//! bound themselves by the `committed` cursor, which the writer publishes
//! with release ordering only after a frame's bytes are in the mapping.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, MutexGuard, RwLock};
use snafu::ensure;
use tracing::{debug, warn};

use crate::{
    Result,
    error::{CapacityExhaustedSnafu, CorruptRecordSnafu, InternalSnafu},
    file::DataFile,
    frame::{FRAME_HEADER_SIZE, Frame, FrameHeader, frame_size},
    path::{SHARD_SEGMENT_EXT, segment_path},
};

/// A single commit log shard.
pub struct CommitLog {
    shard_id:     u32,
    /// Directory holding this shard's segment files.
    dir:          PathBuf,
    segment_size: u64,
    /// Mapped segments; the vector index is the segment number.
    segments:     RwLock<Vec<Arc<DataFile>>>,
    /// First byte not yet written. Published after each append.
    committed:    AtomicU64,
    /// Highest position known to be flushed to stable storage.
    flushed:      AtomicU64,
    /// Writer-side cursor; holding this lock is the append section.
    writer:       Mutex<u64>,
}

impl CommitLog {
    /// Create an empty shard. No file is created until the first append.
    pub fn new(shard_id: u32, dir: PathBuf, segment_size: u64) -> Self {
        Self {
            shard_id,
            dir,
            segment_size,
            segments: RwLock::new(Vec::new()),
            committed: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            writer: Mutex::new(0),
        }
    }

    /// Map existing segment files, numbered contiguously from zero.
    ///
    /// The write cursor starts at zero; call [`CommitLog::replay_from`] and
    /// [`CommitLog::restore_cursor`] to position it.
    pub fn open(
        shard_id: u32,
        dir: PathBuf,
        segment_size: u64,
        segment_files: &[(u64, PathBuf)],
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(segment_files.len());
        for (expected, (segment, path)) in segment_files.iter().enumerate() {
            ensure!(
                *segment == expected as u64,
                InternalSnafu {
                    message: format!("shard {shard_id} is missing segment {expected}"),
                }
            );
            let file = DataFile::open(path)?;
            ensure!(
                file.size() == segment_size,
                InternalSnafu {
                    message: format!(
                        "segment {} has size {}, expected {segment_size}",
                        path.display(),
                        file.size()
                    ),
                }
            );
            segments.push(Arc::new(file));
        }

        debug!(shard_id, segments = segments.len(), "Opened shard segments");

        Ok(Self {
            segments: RwLock::new(segments),
            ..Self::new(shard_id, dir, segment_size)
        })
    }

    pub const fn shard_id(&self) -> u32 { self.shard_id }

    pub const fn segment_size(&self) -> u64 { self.segment_size }

    /// Number of segment files currently mapped.
    pub fn segment_count(&self) -> usize { self.segments.read().len() }

    /// Position one past the last fully written frame.
    pub fn committed(&self) -> u64 { self.committed.load(Ordering::Acquire) }

    /// Enter the shard's exclusive append section.
    ///
    /// Every queue assigned to this shard serialises through this lock; the
    /// caller also performs the matching index append before dropping it.
    pub fn lock(&self) -> AppendSection<'_> {
        AppendSection {
            log:    self,
            cursor: self.writer.lock(),
        }
    }

    /// Decode the frame that starts at `position`.
    ///
    /// Safe to call concurrently with appends and other reads. Positions at
    /// or past the committed cursor are reported as corrupt, never read.
    pub fn read(&self, position: u64) -> Result<Frame> {
        let committed = self.committed();
        self.decode_at(position, committed)
    }

    /// Iterate committed frames starting at `position`, which must be a
    /// frame boundary.
    pub fn scan_from(&self, position: u64) -> FrameScanner<'_> {
        FrameScanner {
            log: self,
            position,
            limit: Some(self.committed()),
        }
    }

    /// Iterate every decodable frame from `position` regardless of the
    /// committed cursor. Used on startup to find the real end of the log.
    pub(crate) fn replay_from(&self, position: u64) -> FrameScanner<'_> {
        let end = self.segment_count() as u64 * self.segment_size;
        FrameScanner {
            log:      self,
            position: position.min(end),
            limit:    None,
        }
    }

    /// Set the write cursor after replay.
    pub(crate) fn restore_cursor(&self, position: u64) {
        let mut cursor = self.writer.lock();
        *cursor = position;
        self.committed.store(position, Ordering::Release);
        self.flushed.store(position, Ordering::Release);
    }

    /// Flush every segment touched between the last flush and `upto`.
    pub fn flush(&self, upto: u64) -> Result<()> {
        let from = self.flushed.load(Ordering::Acquire);
        if upto <= from {
            return Ok(());
        }

        let segments: Vec<Arc<DataFile>> = self.segments.read().clone();
        let first = from / self.segment_size;
        let last = (upto - 1) / self.segment_size;
        for segment in first..=last {
            let Some(file) = segments.get(segment as usize) else {
                break;
            };
            let start = if segment == first {
                from % self.segment_size
            } else {
                0
            };
            let end = if segment == last {
                (upto - 1) % self.segment_size + 1
            } else {
                self.segment_size
            };
            file.flush_range(start, end - start)?;
        }

        self.flushed.fetch_max(upto, Ordering::AcqRel);
        Ok(())
    }

    fn segment(&self, segment: u64) -> Option<Arc<DataFile>> {
        self.segments.read().get(segment as usize).cloned()
    }

    /// Segment for writing, creating it when the cursor has just moved past
    /// the last mapped one. Only called from inside the append section.
    fn segment_for_write(&self, segment: u64) -> Result<Arc<DataFile>> {
        if let Some(file) = self.segment(segment) {
            return Ok(file);
        }

        let mut segments = self.segments.write();
        ensure!(
            segment == segments.len() as u64,
            InternalSnafu {
                message: format!(
                    "shard {} cannot skip from {} to segment {segment}",
                    self.shard_id,
                    segments.len()
                ),
            }
        );

        let path = segment_path(&self.dir, segment, SHARD_SEGMENT_EXT);
        let file = Arc::new(DataFile::create(&path, self.segment_size)?);
        segments.push(file.clone());

        debug!(shard_id = self.shard_id, segment, path = ?path, "Created shard segment");
        Ok(file)
    }

    /// Decode a frame, refusing to read at or beyond `limit`.
    fn decode_at(&self, position: u64, limit: u64) -> Result<Frame> {
        ensure!(
            position + FRAME_HEADER_SIZE as u64 <= limit,
            CorruptRecordSnafu {
                position,
                reason: format!("header runs past end of log at {limit}"),
            }
        );

        let offset = position % self.segment_size;
        let file = self.segment(position / self.segment_size).ok_or_else(|| {
            CorruptRecordSnafu {
                position,
                reason: "segment not mapped",
            }
            .build()
        })?;

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        file.read_at(offset, &mut raw)?;
        let header = FrameHeader::parse(&raw);

        ensure!(
            position + header.frame_len() <= limit
                && offset + header.frame_len() <= self.segment_size,
            CorruptRecordSnafu {
                position,
                reason: format!("frame length {} out of bounds", header.frame_len()),
            }
        );

        let mut body = vec![0u8; header.body_len() as usize];
        file.read_at(offset + FRAME_HEADER_SIZE as u64, &mut body)?;
        header.decode_body(position, &body)
    }

    /// Start of the segment after the one holding `position`.
    const fn next_segment_start(&self, position: u64) -> u64 {
        (position / self.segment_size + 1) * self.segment_size
    }
}

/// Exclusive append access to one shard.
///
/// Dropping the section releases the shard for the next writer.
pub struct AppendSection<'a> {
    log:    &'a CommitLog,
    cursor: MutexGuard<'a, u64>,
}

impl AppendSection<'_> {
    /// Current write cursor.
    pub fn cursor(&self) -> u64 { *self.cursor }

    /// Append one encoded frame and return the position of its first byte.
    ///
    /// On error the cursor is left unchanged, so any bytes that did reach
    /// the mapping stay invisible and are overwritten by the next append.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let len = frame.len() as u64;
        let segment_size = self.log.segment_size;
        ensure!(
            len <= segment_size,
            CapacityExhaustedSnafu {
                target: format!("shard {}", self.log.shard_id),
                reason: format!("frame of {len} bytes exceeds segment size {segment_size}"),
            }
        );

        let mut position = *self.cursor;
        if position % segment_size + len > segment_size {
            position = self.log.next_segment_start(position);
        }
        let end = position.checked_add(len).ok_or_else(|| {
            CapacityExhaustedSnafu {
                target: format!("shard {}", self.log.shard_id),
                reason: "position space exhausted",
            }
            .build()
        })?;

        let file = self.log.segment_for_write(position / segment_size)?;
        file.write_at(position % segment_size, frame)?;

        *self.cursor = end;
        self.log.committed.store(end, Ordering::Release);
        Ok(position)
    }
}

/// Ordered iterator over `(position, frame)` pairs in a shard.
///
/// A frame that fails to decode ends the current segment: if a later segment
/// exists, scanning resumes at its start, otherwise iteration stops and
/// [`FrameScanner::position`] is the end of the valid log.
pub struct FrameScanner<'a> {
    log:      &'a CommitLog,
    position: u64,
    /// Committed cursor for live scans, `None` during startup replay.
    limit:    Option<u64>,
}

impl FrameScanner<'_> {
    /// Position of the next frame to be decoded.
    pub const fn position(&self) -> u64 { self.position }
}

impl Iterator for FrameScanner<'_> {
    type Item = (u64, Frame);

    fn next(&mut self) -> Option<Self::Item> {
        let log = self.log;
        loop {
            if let Some(limit) = self.limit
                && self.position >= limit
            {
                return None;
            }

            let segment = self.position / log.segment_size;
            let segment_count = log.segment_count() as u64;
            if segment >= segment_count {
                return None;
            }

            let segment_end = (segment + 1) * log.segment_size;
            if self.position + FRAME_HEADER_SIZE as u64 > segment_end {
                self.position = segment_end;
                continue;
            }

            let limit = self.limit.unwrap_or(segment_end).min(segment_end);
            match log.decode_at(self.position, limit) {
                Ok(frame) => {
                    let position = self.position;
                    self.position += frame_size(frame.name.len(), frame.payload.len()) as u64;
                    return Some((position, frame));
                }
                Err(e) if segment + 1 < segment_count => {
                    debug!(
                        shard_id = log.shard_id,
                        position = self.position,
                        error = %e,
                        "End of segment reached during scan"
                    );
                    self.position = segment_end;
                }
                Err(e) => {
                    if self.limit.is_some() {
                        warn!(
                            shard_id = log.shard_id,
                            position = self.position,
                            error = %e,
                            "Scan stopped at undecodable frame"
                        );
                    }
                    return None;
                }
            }
        }
    }
}
