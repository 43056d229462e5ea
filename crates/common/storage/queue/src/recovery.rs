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

//! Startup recovery.
//!
//! 1. Load the newest valid manifest, if any
//! 2. Replay every shard from its checkpointed cursor to find the true end of
//!    the log and collect the frames written after the checkpoint
//! 3. Open each known queue's index, dropping entries that point past its
//!    shard's recovered end
//! 4. Re-index replayed frames that the index does not already cover
//!
//! Without a manifest every shard is replayed from position zero, which
//! rebuilds the directory purely from the queue identities embedded in the
//! frames.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bytes::Bytes;
use snafu::ensure;
use tracing::{info, warn};

use crate::{
    Result, StoreConfig,
    commit_log::CommitLog,
    directory::{QueueDirectory, QueueHandle},
    error::InvalidConfigSnafu,
    index::QueueIndex,
    manifest::Manifest,
    manifest_writer::ManifestWriter,
    path::{SHARD_SEGMENT_EXT, index_dir, scan_segments, shard_dir},
    pool::CommitLogPool,
};

/// State handed to the store once recovery completes.
pub(crate) struct RecoveredState {
    pub directory:       QueueDirectory,
    pub pool:            CommitLogPool,
    pub manifest_writer: ManifestWriter,
}

/// Frames found past a shard's checkpoint.
struct ShardReplay {
    end:    u64,
    frames: Vec<(u64, u64)>,
}

pub(crate) fn recover(config: &StoreConfig) -> Result<RecoveredState> {
    info!(path = ?config.data_dir, shards = config.shard_count, "Starting store recovery");

    let manifest_writer = ManifestWriter::new(&config.data_dir)?;
    let manifest = match manifest_writer.read_latest()? {
        Some(manifest) => {
            ensure!(
                manifest.shard_count == config.shard_count,
                InvalidConfigSnafu {
                    reason: format!(
                        "data directory was created with {} shards, configured with {}",
                        manifest.shard_count, config.shard_count
                    ),
                }
            );
            manifest
        }
        None => {
            info!("No usable manifest, replaying shards from the beginning");
            Manifest::new(config.shard_count)
        }
    };

    let mut names: BTreeMap<u64, Bytes> = manifest
        .queues
        .iter()
        .map(|q| (q.queue_id, q.name.clone()))
        .collect();

    let pool = CommitLogPool::new(
        config.data_dir.clone(),
        config.shard_count,
        config.segment_size,
    );
    let mut replays: HashMap<u32, ShardReplay> = HashMap::new();

    for shard_id in 0..config.shard_count {
        let dir = shard_dir(&config.data_dir, shard_id);
        let files = scan_segments(&dir, SHARD_SEGMENT_EXT)?;
        let checkpoint = manifest.shard_cursor(shard_id);
        if files.is_empty() {
            if checkpoint > 0 {
                warn!(shard_id, checkpoint, "Checkpointed shard has no segment files");
            }
            continue;
        }

        let log = CommitLog::open(shard_id, dir, config.segment_size, &files)?;
        let replay = replay_shard(config, &log, checkpoint, &mut names);
        if replay.end < checkpoint {
            warn!(
                shard_id,
                checkpoint,
                end = replay.end,
                "Shard ends before its checkpoint"
            );
        }
        info!(
            shard_id,
            from = checkpoint,
            end = replay.end,
            frames = replay.frames.len(),
            "Replayed shard"
        );

        log.restore_cursor(replay.end);
        pool.install(log);
        replays.insert(shard_id, replay);
    }

    let mut queues: HashMap<u64, Arc<QueueHandle>> = HashMap::with_capacity(names.len());
    let mut seen_names: HashMap<Bytes, u64> = HashMap::with_capacity(names.len());
    for (queue_id, name) in names {
        if let Some(existing) = seen_names.get(&name) {
            warn!(queue_id, existing, "Duplicate queue name, ignoring later identity");
            continue;
        }
        let shard_id = config.shard_for(queue_id);
        let shard_end = replays.get(&shard_id).map_or(0, |r| r.end);
        let index = QueueIndex::open(
            queue_id,
            index_dir(&config.data_dir, queue_id),
            config.index_segment_size,
            shard_end,
        )?;
        seen_names.insert(name.clone(), queue_id);
        queues.insert(
            queue_id,
            Arc::new(QueueHandle::new(queue_id, name, shard_id, index)),
        );
    }

    let mut reindexed = 0u64;
    for replay in replays.values() {
        for &(position, queue_id) in &replay.frames {
            let Some(queue) = queues.get(&queue_id) else {
                continue;
            };
            if queue
                .index()
                .last()?
                .is_none_or(|last| position > last)
            {
                queue.index().append(position)?;
                reindexed += 1;
            }
        }
    }

    let next_id = queues
        .keys()
        .max()
        .map_or(0, |max| max + 1)
        .max(manifest.next_identity);

    info!(
        queues = queues.len(),
        reindexed, next_id, "Store recovery complete"
    );

    Ok(RecoveredState {
        directory: QueueDirectory::restore(
            config.data_dir.clone(),
            config.shard_count,
            config.index_segment_size,
            queues.into_values(),
            next_id,
        ),
        pool,
        manifest_writer,
    })
}

/// Scan one shard from `checkpoint`, recording every frame that belongs on
/// this shard and learning queue names along the way.
fn replay_shard(
    config: &StoreConfig,
    log: &CommitLog,
    checkpoint: u64,
    names: &mut BTreeMap<u64, Bytes>,
) -> ShardReplay {
    let shard_id = log.shard_id();
    let mut scanner = log.replay_from(checkpoint);
    let mut frames = Vec::new();

    for (position, frame) in scanner.by_ref() {
        if config.shard_for(frame.queue_id) != shard_id {
            warn!(
                shard_id,
                position,
                queue_id = frame.queue_id,
                "Skipping frame stored on the wrong shard"
            );
            continue;
        }
        let name = names
            .entry(frame.queue_id)
            .or_insert_with(|| frame.name.clone());
        if *name != frame.name {
            warn!(
                shard_id,
                position,
                queue_id = frame.queue_id,
                "Skipping frame whose name disagrees with its queue identity"
            );
            continue;
        }
        frames.push((position, frame.queue_id));
    }

    ShardReplay {
        end: scanner.position(),
        frames,
    }
}
