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

//! Boot-time root verification and the background expiration sweeper.

use std::{
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Sender, bounded};
use tracing::{debug, error};

use crate::{QueueCollection, Result, error::InaccessibleQueuePathSnafu};

/// Verifies the queue root is a writable directory, creating it if
/// missing. Runtime loss of permission surfaces later as per-queue journal
/// errors; this check only gates startup.
pub fn verify_queue_path(path: &Path) -> Result<()> {
    if !path.exists() && std::fs::create_dir_all(path).is_err() {
        return InaccessibleQueuePathSnafu { path }.fail();
    }
    if !path.is_dir() {
        return InaccessibleQueuePathSnafu { path }.fail();
    }

    // Permission bits lie often enough that an actual write is the check.
    let probe = path.join(".writable");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => InaccessibleQueuePathSnafu { path }.fail(),
    }
}

/// Periodic sweep over a collection: discards expired entries and deletes
/// queues that reached their max age. The thread stops on [`stop`]
/// (or drop) and goes quiet on its own once the collection shuts down.
///
/// [`stop`]: ExpirationSweeper::stop
pub struct ExpirationSweeper {
    stop_tx: Sender<()>,
    worker:  Option<JoinHandle<()>>,
}

impl ExpirationSweeper {
    /// Spawns the sweeper thread, ticking every `interval`.
    pub fn start(collection: Arc<QueueCollection>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let worker = thread::Builder::new()
            .name("hopper-sweeper".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                            let discarded = collection.flush_all_expired();
                            let deleted = collection.delete_expired_queues();
                            if discarded > 0 || deleted > 0 {
                                debug!(discarded, deleted, "Expiration sweep");
                            }
                        }
                        _ => return,
                    }
                }
            })?;

        Ok(Self {
            stop_tx,
            worker: Some(worker),
        })
    }

    /// Stops the sweeper thread and waits for it to exit. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if worker.join().is_err() {
            error!("Sweeper thread panicked");
        }
    }
}

impl Drop for ExpirationSweeper {
    fn drop(&mut self) { self.stop(); }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::BrokerConfig;

    #[test]
    fn test_verify_creates_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("spool");

        verify_queue_path(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_verify_rejects_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("occupied");
        std::fs::write(&root, b"not a dir").unwrap();

        assert!(verify_queue_path(&root).is_err());
    }

    #[test]
    fn test_sweeper_discards_expired_entries() {
        let temp_dir = TempDir::new().unwrap();
        let collection =
            Arc::new(QueueCollection::new(temp_dir.path(), BrokerConfig::default()).unwrap());

        let now = Utc::now();
        collection
            .add(
                "work",
                Bytes::from_static(b"stale"),
                Some(now - chrono::Duration::seconds(1)),
                now,
            )
            .unwrap();

        let mut sweeper =
            ExpirationSweeper::start(collection.clone(), Duration::from_millis(10)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if collection.queue("work").is_some_and(|queue| queue.is_empty()) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(collection.queue("work").is_some_and(|queue| queue.is_empty()));
        sweeper.stop();
        collection.shutdown();
    }
}
