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

//! Store configuration.
//!
//! `shard_count` is the main tuning knob: it bounds the number of open
//! shard mappings regardless of how many queues exist, and it is also the
//! maximum write parallelism, since every queue hashed to the same shard
//! shares that shard's append section.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;

use crate::{Result, error::InvalidConfigSnafu, frame::frame_size};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for shard segments, index segments and the manifest.
    #[default(_code = "PathBuf::from(\"./queue_data\")")]
    pub data_dir:           PathBuf,
    /// Number of commit log shards. Fixed for the lifetime of a data
    /// directory.
    #[default = 16]
    pub shard_count:        u32,
    /// Size in bytes of one shard segment file.
    #[default(_code = "64 * 1024 * 1024")]
    pub segment_size:       u64,
    /// Size in bytes of one index segment file. Must be a multiple of 8.
    #[default(_code = "64 * 1024")]
    pub index_segment_size: u64,
    #[default = 1024]
    pub max_name_len:       usize,
    #[default(_code = "64 * 1024")]
    pub max_payload_len:    usize,
    pub flush_mode:         FlushMode,
}

impl StoreConfig {
    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.shard_count > 0,
            InvalidConfigSnafu {
                reason: "shard_count must be greater than zero",
            }
        );
        ensure!(
            self.index_segment_size >= 8 && self.index_segment_size % 8 == 0,
            InvalidConfigSnafu {
                reason: format!(
                    "index_segment_size must be a positive multiple of 8, got {}",
                    self.index_segment_size
                ),
            }
        );
        ensure!(
            u32::try_from(self.max_name_len).is_ok() && u32::try_from(self.max_payload_len).is_ok(),
            InvalidConfigSnafu {
                reason: "max_name_len and max_payload_len must fit in 32 bits",
            }
        );

        let largest = frame_size(self.max_name_len, self.max_payload_len) as u64;
        ensure!(
            largest <= self.segment_size,
            InvalidConfigSnafu {
                reason: format!(
                    "segment_size {} cannot hold a maximal frame of {largest} bytes",
                    self.segment_size
                ),
            }
        );

        if let FlushMode::Batch { bytes, interval } = &self.flush_mode {
            ensure!(
                *bytes > 0 && !interval.is_zero(),
                InvalidConfigSnafu {
                    reason: "batch flush thresholds must be non-zero",
                }
            );
        }

        Ok(())
    }

    /// Shard that stores every record of the queue with this identity.
    #[must_use]
    pub fn shard_for(&self, queue_id: u64) -> u32 {
        (queue_id % u64::from(self.shard_count)) as u32
    }
}

/// When mapped regions are written back to stable storage.
///
/// Neither mode flushes on every `put`. Data written since the last
/// checkpoint may be lost on a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
pub enum FlushMode {
    /// Leave write-back to the OS; checkpoint only on explicit
    /// [`QueueStore::flush`](crate::QueueStore::flush) and shutdown.
    Async,
    /// Checkpoint once `bytes` have been appended or `interval` has elapsed
    /// with pending data, whichever comes first.
    #[default]
    Batch {
        #[default(_code = "4 * 1024 * 1024")]
        bytes:    u64,
        #[default(_code = "Duration::from_secs(1)")]
        interval: Duration,
    },
}
