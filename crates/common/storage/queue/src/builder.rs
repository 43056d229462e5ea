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

use std::path::PathBuf;

use crate::{FlushMode, QueueStore, Result, StoreConfig};

pub struct StoreBuilder {
    config: StoreConfig,
}

impl StoreBuilder {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            config: StoreConfig {
                data_dir: data_dir.into(),
                ..Default::default()
            },
        }
    }

    pub fn shard_count(mut self, count: u32) -> Self {
        self.config.shard_count = count;
        self
    }

    pub fn segment_size(mut self, size: u64) -> Self {
        self.config.segment_size = size;
        self
    }

    pub fn index_segment_size(mut self, size: u64) -> Self {
        self.config.index_segment_size = size;
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.config.max_name_len = len;
        self
    }

    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.config.max_payload_len = len;
        self
    }

    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    pub fn config(&self) -> &StoreConfig { &self.config }

    pub fn build(self) -> Result<QueueStore> { QueueStore::open(self.config) }
}
