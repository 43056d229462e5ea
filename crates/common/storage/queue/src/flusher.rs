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

//! Background checkpoint thread for [`FlushMode::Batch`].
//!
//! ```text
//! ┌──────────────┐  nudge (bounded)  ┌──────────────┐  checkpoint  ┌──────────────┐
//! │  put caller  │ ────────────────► │   Flusher    │ ───────────► │ shards/index │
//! │              │                   │ (bg thread)  │              │   manifest   │
//! └──────────────┘                   └──────────────┘              └──────────────┘
//! ```
//!
//! Writers never wait for the flusher. A nudge is sent once pending bytes
//! cross the threshold; if one is already queued the new one is dropped.
//! Dropping the sender makes the thread take a final checkpoint and exit.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info};

use crate::{FlushMode, Result, error::InternalSnafu, store::StoreInner};

pub(crate) struct Flusher {
    tx:        Option<Sender<()>>,
    handle:    Option<JoinHandle<Result<()>>>,
    threshold: u64,
}

impl Flusher {
    /// Start the flusher thread, or return `None` when the flush mode leaves
    /// write-back to explicit calls.
    pub fn spawn(inner: Arc<StoreInner>) -> Result<Option<Self>> {
        let FlushMode::Batch { bytes, interval } = inner.config().flush_mode else {
            return Ok(None);
        };

        let (tx, rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("queue-store-flusher".into())
            .spawn(move || run(&inner, &rx, bytes, interval))?;

        Ok(Some(Self {
            tx: Some(tx),
            handle: Some(handle),
            threshold: bytes,
        }))
    }

    /// Wake the thread if `pending` bytes reached the batch threshold.
    pub fn notify(&self, pending: u64) {
        if pending >= self.threshold
            && let Some(tx) = &self.tx
        {
            let _ = tx.try_send(());
        }
    }

    /// Stop the thread and wait for its final checkpoint.
    pub fn stop(mut self) -> Result<()> {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                InternalSnafu {
                    message: "flusher thread panicked".to_string(),
                }
                .build()
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) { self.tx.take(); }
}

fn run(inner: &StoreInner, rx: &Receiver<()>, bytes: u64, interval: Duration) -> Result<()> {
    info!(bytes, ?interval, "Flusher starting");
    let mut last_checkpoint = Instant::now();

    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                let pending = inner.pending_bytes();
                if pending == 0 {
                    continue;
                }
                if pending >= bytes || last_checkpoint.elapsed() >= interval {
                    debug!(pending, "Batch checkpoint triggered");
                    if let Err(e) = inner.checkpoint() {
                        error!(error = ?e, "Checkpoint failed");
                    }
                    last_checkpoint = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("Flusher channel disconnected");
                break;
            }
        }
    }

    let result = inner.checkpoint();
    info!("Flusher stopped");
    result
}
