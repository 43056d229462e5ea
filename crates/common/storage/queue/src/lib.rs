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

//! Sharded, memory-mapped store for many named append-only queues.
//!
//! Queues are assigned to a fixed number of commit log shards by identity.
//! Each shard is a segmented, append-only log of self-describing frames;
//! each queue keeps a compact index of its frames' positions.

pub mod builder;
pub mod commit_log;
pub mod config;
mod crc;
pub mod directory;
pub mod error;
pub mod file;
mod flusher;
pub mod frame;
pub mod index;
pub mod manifest;
mod manifest_writer;
pub mod path;
pub mod pool;
mod recovery;
pub mod store;

pub use builder::StoreBuilder;
pub use commit_log::{AppendSection, CommitLog, FrameScanner};
pub use config::{FlushMode, StoreConfig};
pub use directory::{QueueDirectory, QueueHandle};
pub use error::{QueueError, Result};
pub use frame::{Frame, Framer};
pub use index::QueueIndex;
pub use pool::CommitLogPool;
pub use store::QueueStore;
