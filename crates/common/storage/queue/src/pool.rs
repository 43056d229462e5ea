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

//! Fixed-size table of commit log shards.
//!
//! Slots are filled on first use, so a store with many shards but few queues
//! only maps the shards it actually writes to. Each slot is initialised at
//! most once even when several writers race for it.

use std::{path::PathBuf, sync::OnceLock};

use tracing::{debug, warn};

use crate::{commit_log::CommitLog, path::shard_dir};

pub struct CommitLogPool {
    shards:       Vec<OnceLock<CommitLog>>,
    data_dir:     PathBuf,
    segment_size: u64,
}

impl CommitLogPool {
    pub fn new(data_dir: PathBuf, shard_count: u32, segment_size: u64) -> Self {
        Self {
            shards: (0..shard_count).map(|_| OnceLock::new()).collect(),
            data_dir,
            segment_size,
        }
    }

    /// Seed a slot with a shard recovered from disk.
    pub(crate) fn install(&self, shard: CommitLog) {
        let shard_id = shard.shard_id() as usize;
        match self.shards.get(shard_id) {
            Some(slot) => {
                if slot.set(shard).is_err() {
                    warn!(shard_id, "Shard already installed, keeping the existing one");
                }
            }
            None => warn!(shard_id, "Recovered shard id out of range, ignoring"),
        }
    }

    /// Shard `shard_id`, creating it on first use.
    ///
    /// # Panics
    ///
    /// If `shard_id` is not below the shard count. Shard ids come from the
    /// queue directory, which always reduces identities modulo that count.
    pub fn shard(&self, shard_id: u32) -> &CommitLog {
        self.shards[shard_id as usize].get_or_init(|| {
            debug!(shard_id, "Initialising shard");
            CommitLog::new(
                shard_id,
                shard_dir(&self.data_dir, shard_id),
                self.segment_size,
            )
        })
    }

    /// Shard if it has already been created.
    pub fn get(&self, shard_id: u32) -> Option<&CommitLog> {
        self.shards.get(shard_id as usize).and_then(OnceLock::get)
    }

    pub fn shard_count(&self) -> u32 { self.shards.len() as u32 }

    /// Shards created so far, in id order.
    pub fn live_shards(&self) -> impl Iterator<Item = &CommitLog> {
        self.shards.iter().filter_map(OnceLock::get)
    }
}
