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

//! The queue store engine.
//!
//! [`QueueStore`] maps many named queues onto a fixed set of commit log
//! shards. `put` appends a frame to the queue's shard and records its
//! position in the queue's index inside one append section; `get` resolves
//! positions through the index and decodes frames without taking any shard
//! lock.
//!
//! ## Usage
//!
//! ```ignore
//! let store = StoreBuilder::new("/path/to/store").shard_count(16).build()?;
//!
//! store.put("orders", b"first")?;
//! store.put("orders", b"second")?;
//!
//! let page = store.get("orders", 0, 10);
//! assert_eq!(page.len(), 2);
//!
//! store.shutdown()?;
//! ```

use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    Result, StoreConfig,
    directory::{QueueDirectory, QueueHandle},
    flusher::Flusher,
    frame::Framer,
    manifest::{MANIFEST_VERSION, Manifest, QueueCheckpoint, ShardCheckpoint},
    manifest_writer::ManifestWriter,
    pool::CommitLogPool,
    recovery::{RecoveredState, recover},
};

/// State shared between the store handle and the flusher thread.
pub(crate) struct StoreInner {
    config:          StoreConfig,
    framer:          Framer,
    directory:       QueueDirectory,
    pool:            CommitLogPool,
    /// Held for the whole checkpoint, which serialises checkpoints.
    manifest_writer: Mutex<ManifestWriter>,
    /// Frame bytes appended since the last successful checkpoint.
    pending_bytes:   AtomicU64,
}

impl StoreInner {
    pub(crate) const fn config(&self) -> &StoreConfig { &self.config }

    pub(crate) fn pending_bytes(&self) -> u64 { self.pending_bytes.load(Ordering::Acquire) }

    /// Flush shards and indexes and record a manifest.
    ///
    /// Shard cursors are captured before index lengths, so every frame below
    /// a recorded cursor has its index entry below the recorded length.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        let mut manifest_writer = self.manifest_writer.lock();
        let pending = self.pending_bytes();

        let shards: Vec<ShardCheckpoint> = self
            .pool
            .live_shards()
            .map(|shard| ShardCheckpoint {
                shard_id:     shard.shard_id(),
                write_cursor: shard.lock().cursor(),
            })
            .collect();
        let queues = self.directory.snapshot();
        let next_identity = self.directory.next_id();

        for checkpoint in &shards {
            if let Some(shard) = self.pool.get(checkpoint.shard_id) {
                shard.flush(checkpoint.write_cursor)?;
            }
        }

        let mut queue_checkpoints = Vec::with_capacity(queues.len());
        for queue in &queues {
            let index_len = queue.index().len();
            queue.index().flush(index_len)?;
            queue_checkpoints.push(QueueCheckpoint {
                queue_id: queue.id(),
                index_len,
                name: queue.name().clone(),
            });
        }

        manifest_writer.write(&Manifest {
            version: MANIFEST_VERSION,
            next_identity,
            shard_count: self.config.shard_count,
            shards,
            queues: queue_checkpoints,
        })?;

        self.pending_bytes.fetch_sub(pending, Ordering::AcqRel);
        debug!(bytes = pending, queues = queues.len(), "Checkpoint complete");
        Ok(())
    }
}

/// A persistent store of many append-only queues.
///
/// All methods take `&self`; the store can be shared across threads behind
/// an `Arc`. Writers to queues on different shards proceed in parallel,
/// readers never block writers.
pub struct QueueStore {
    inner:   Arc<StoreInner>,
    /// Background checkpoint thread. `None` in async mode or after shutdown.
    flusher: Option<Flusher>,
}

impl QueueStore {
    /// Open the store in `config.data_dir`, recovering any existing data.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the shard count
    /// differs from the one the directory was created with, or existing
    /// files cannot be mapped.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let RecoveredState {
            directory,
            pool,
            manifest_writer,
        } = recover(&config)?;

        info!(
            path = ?config.data_dir,
            shards = config.shard_count,
            queues = directory.len(),
            "Queue store opened"
        );

        let inner = Arc::new(StoreInner {
            framer: Framer::new(config.max_name_len, config.max_payload_len),
            config,
            directory,
            pool,
            manifest_writer: Mutex::new(manifest_writer),
            pending_bytes: AtomicU64::new(0),
        });
        let flusher = Flusher::spawn(inner.clone())?;

        Ok(Self { inner, flusher })
    }

    /// Append `payload` to the queue called `name`, creating the queue on
    /// first use. The queue becomes visible only once this first append
    /// succeeds.
    ///
    /// Returns once the frame is in the shared mapping and indexed; it is
    /// immediately visible to [`QueueStore::get`]. Durability follows the
    /// configured [`FlushMode`](crate::FlushMode).
    ///
    /// # Errors
    ///
    /// [`QueueError::FramingOverflow`](crate::QueueError::FramingOverflow)
    /// when the name or payload exceeds its configured maximum, in which
    /// case no queue is created. Capacity and I/O errors leave the queue's
    /// visible contents unchanged, and a queue whose first append fails stays
    /// unknown.
    pub fn put(&self, name: impl AsRef<[u8]>, payload: impl AsRef<[u8]>) -> Result<()> {
        let (name, payload) = (name.as_ref(), payload.as_ref());
        let inner = &*self.inner;

        inner.framer.check(name, payload)?;
        let queue = inner.directory.resolve_or_create(name);
        let frame = inner.framer.encode(queue.id(), name, payload)?;
        let shard = inner.pool.shard(queue.shard_id());

        {
            let mut section = shard.lock();
            queue.index().reserve()?;
            let position = section.append(&frame)?;
            queue.index().append(position)?;
        }
        queue.activate();

        let written = frame.len() as u64;
        let pending = inner.pending_bytes.fetch_add(written, Ordering::AcqRel) + written;
        if let Some(flusher) = &self.flusher {
            flusher.notify(pending);
        }
        Ok(())
    }

    /// Up to `count` payloads of queue `name`, starting at its `offset`-th
    /// message, in append order.
    ///
    /// Unknown queues and offsets past the end produce an empty vector. If a
    /// record cannot be decoded the payloads before it are returned and the
    /// failure is logged.
    pub fn get(&self, name: impl AsRef<[u8]>, offset: u64, count: u64) -> Vec<Bytes> {
        let Some(queue) = self.inner.directory.lookup(name.as_ref()) else {
            return Vec::new();
        };
        self.read_queue(&queue, offset, count)
    }

    /// Number of messages in the queue, zero for unknown queues.
    pub fn len(&self, name: impl AsRef<[u8]>) -> u64 {
        self.inner
            .directory
            .lookup(name.as_ref())
            .map_or(0, |queue| queue.index().len())
    }

    /// Number of queues that have been created.
    pub fn queue_count(&self) -> usize { self.inner.directory.len() }

    /// Checkpoint now: flush every shard and index and write the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush or the manifest write fails.
    pub fn flush(&self) -> Result<()> { self.inner.checkpoint() }

    /// Stop the flusher and take a final checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the final checkpoint fails or the flusher thread
    /// panicked.
    pub fn shutdown(mut self) -> Result<()> {
        info!("Shutting down queue store");
        match self.flusher.take() {
            Some(flusher) => flusher.stop()?,
            None => self.inner.checkpoint()?,
        }
        info!("Queue store shutdown complete");
        Ok(())
    }

    pub fn config(&self) -> &StoreConfig { &self.inner.config }

    pub fn directory(&self) -> &QueueDirectory { &self.inner.directory }

    pub fn pool(&self) -> &CommitLogPool { &self.inner.pool }

    fn read_queue(&self, queue: &QueueHandle, offset: u64, count: u64) -> Vec<Bytes> {
        let positions = match queue.index().read_range(offset, count) {
            Ok(positions) => positions,
            Err(e) => {
                warn!(queue_id = queue.id(), offset, error = %e, "Index read failed");
                return Vec::new();
            }
        };
        let Some(shard) = self.inner.pool.get(queue.shard_id()) else {
            return Vec::new();
        };

        let mut payloads = Vec::with_capacity(positions.len());
        for position in positions {
            match shard.read(position) {
                Ok(frame) if frame.queue_id == queue.id() => payloads.push(frame.payload),
                Ok(frame) => {
                    warn!(
                        queue_id = queue.id(),
                        found = frame.queue_id,
                        position,
                        "Index entry points at another queue's frame"
                    );
                    break;
                }
                Err(e) => {
                    warn!(queue_id = queue.id(), position, error = %e, "Record read failed");
                    break;
                }
            }
        }
        payloads
    }
}

impl Drop for QueueStore {
    fn drop(&mut self) {
        if self.flusher.is_none()
            && self.inner.pending_bytes() > 0
            && let Err(e) = self.inner.checkpoint()
        {
            warn!(error = ?e, "Checkpoint on drop failed");
        }
    }
}
