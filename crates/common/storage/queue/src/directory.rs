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

//! Queue directory: queue name to identity, shard and index.
//!
//! Lookups of existing queues take only the read lock. Creation is a single
//! insert-if-absent under the write lock, so two racing first writers to the
//! same name agree on one identity and the identity counter advances once
//! per queue.
//!
//! A registered queue stays hidden from readers until its first append
//! succeeds. A failed first `put` therefore leaves the name unknown, while a
//! retry reuses the identity already reserved for it.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{index::QueueIndex, path::index_dir};

/// Everything the engine needs to serve one queue.
pub struct QueueHandle {
    id:       u64,
    name:     Bytes,
    shard_id: u32,
    index:    QueueIndex,
    /// Set once the first record has been appended and indexed.
    active:   AtomicBool,
}

impl QueueHandle {
    pub(crate) const fn new(id: u64, name: Bytes, shard_id: u32, index: QueueIndex) -> Self {
        Self {
            id,
            name,
            shard_id,
            index,
            active: AtomicBool::new(false),
        }
    }

    pub const fn id(&self) -> u64 { self.id }

    pub const fn name(&self) -> &Bytes { &self.name }

    pub const fn shard_id(&self) -> u32 { self.shard_id }

    pub const fn index(&self) -> &QueueIndex { &self.index }

    /// Whether the queue has received a successful append.
    pub fn is_active(&self) -> bool { self.active.load(Ordering::Acquire) }

    /// Make the queue visible to readers. Called after its first record is
    /// indexed.
    pub(crate) fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            debug!(queue_id = self.id, shard_id = self.shard_id, "Queue activated");
        }
    }
}

pub struct QueueDirectory {
    queues:             RwLock<HashMap<Bytes, Arc<QueueHandle>>>,
    /// Next identity; only advanced under the write lock.
    next_id:            AtomicU64,
    data_dir:           PathBuf,
    shard_count:        u32,
    index_segment_size: u64,
}

impl QueueDirectory {
    pub fn new(data_dir: PathBuf, shard_count: u32, index_segment_size: u64) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            data_dir,
            shard_count,
            index_segment_size,
        }
    }

    /// Rebuild a directory from recovered queues.
    pub(crate) fn restore(
        data_dir: PathBuf,
        shard_count: u32,
        index_segment_size: u64,
        queues: impl IntoIterator<Item = Arc<QueueHandle>>,
        next_id: u64,
    ) -> Self {
        let directory = Self::new(data_dir, shard_count, index_segment_size);
        directory.next_id.store(next_id, Ordering::Relaxed);
        directory
            .queues
            .write()
            .extend(queues.into_iter().map(|queue| {
                queue.activate();
                (queue.name.clone(), queue)
            }));
        directory
    }

    /// Active queue with this name.
    pub fn lookup(&self, name: &[u8]) -> Option<Arc<QueueHandle>> {
        self.queues
            .read()
            .get(name)
            .filter(|queue| queue.is_active())
            .cloned()
    }

    /// Queue with this name, registering it if the name is unseen.
    ///
    /// A new queue gets the next identity and is assigned to shard
    /// `identity % shard_count`. It stays invisible to [`Self::lookup`]
    /// until [`QueueHandle::activate`] runs. Its index owns no files until
    /// the first append, so registration does no I/O while holding the lock.
    pub fn resolve_or_create(&self, name: &[u8]) -> Arc<QueueHandle> {
        if let Some(queue) = self.queues.read().get(name) {
            return queue.clone();
        }

        self.queues
            .write()
            .entry(Bytes::copy_from_slice(name))
            .or_insert_with_key(|name| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let queue = self.new_handle(id, name.clone());
                debug!(queue_id = id, shard_id = queue.shard_id, "Registered queue");
                Arc::new(queue)
            })
            .clone()
    }

    pub(crate) fn new_handle(&self, id: u64, name: Bytes) -> QueueHandle {
        let shard_id = (id % u64::from(self.shard_count)) as u32;
        QueueHandle::new(
            id,
            name,
            shard_id,
            QueueIndex::new(id, index_dir(&self.data_dir, id), self.index_segment_size),
        )
    }

    /// Number of active queues.
    pub fn len(&self) -> usize {
        self.queues
            .read()
            .values()
            .filter(|queue| queue.is_active())
            .count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn next_id(&self) -> u64 { self.next_id.load(Ordering::Relaxed) }

    /// All active queues ordered by identity.
    pub fn snapshot(&self) -> Vec<Arc<QueueHandle>> {
        let mut queues: Vec<_> = self
            .queues
            .read()
            .values()
            .filter(|queue| queue.is_active())
            .cloned()
            .collect();
        queues.sort_unstable_by_key(|q| q.id);
        queues
    }
}
