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

//! Crash-safe manifest persistence using two alternating slots.
//!
//! Each checkpoint writes the slot that is *not* current, syncs it, and only
//! then flips `manifest.current`. A crash at any point leaves at least one
//! complete manifest behind; reading falls back to the other slot when the
//! current one fails validation.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{Result, error::QueueError, manifest::Manifest};

const MANIFEST_1: &str = "manifest.1";
const MANIFEST_2: &str = "manifest.2";
const MANIFEST_CURRENT: &str = "manifest.current";

pub(crate) struct ManifestWriter {
    base_path:    PathBuf,
    current_slot: u8,
}

impl ManifestWriter {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let current_slot = match read_optional(&base_path.join(MANIFEST_CURRENT))? {
            Some(buf) if matches!(buf.first(), Some(1 | 2)) => buf[0],
            _ => 0,
        };

        Ok(Self {
            base_path,
            current_slot,
        })
    }

    pub fn write(&mut self, manifest: &Manifest) -> Result<()> {
        let next_slot = if self.current_slot == 1 { 2 } else { 1 };
        let manifest_path = self.slot_path(next_slot);

        write_synced(&manifest_path, &manifest.serialize())?;
        write_synced(&self.base_path.join(MANIFEST_CURRENT), &[next_slot])?;

        self.current_slot = next_slot;

        debug!(
            slot = next_slot,
            shards = manifest.shards.len(),
            queues = manifest.queues.len(),
            "Manifest written"
        );
        Ok(())
    }

    /// Load the newest valid manifest.
    ///
    /// Returns `None` when no manifest exists or neither slot validates, in
    /// which case the caller rebuilds state by replaying the shards from the
    /// beginning. A manifest written by an unknown format version is an
    /// error rather than a reason to replay.
    pub fn read_latest(&self) -> Result<Option<Manifest>> {
        let preferred = if self.current_slot == 2 { [2, 1] } else { [1, 2] };

        for slot in preferred {
            let Some(data) = read_optional(&self.slot_path(slot))? else {
                continue;
            };
            match Manifest::deserialize(&data) {
                Ok(manifest) => {
                    if slot != self.current_slot {
                        warn!(slot, "Using fallback manifest slot");
                    }
                    return Ok(Some(manifest));
                }
                Err(e @ QueueError::UnsupportedManifestVersion { .. }) => return Err(e),
                Err(e) => warn!(slot, error = %e, "Ignoring invalid manifest"),
            }
        }

        Ok(None)
    }

    fn slot_path(&self, slot: u8) -> PathBuf {
        match slot {
            1 => self.base_path.join(MANIFEST_1),
            _ => self.base_path.join(MANIFEST_2),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
