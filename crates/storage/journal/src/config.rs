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

//! Per-queue configuration.
//!
//! Every queue carries a [`QueueConfig`]; the collection layer resolves the
//! effective config per queue name and may swap it on a live queue at any
//! time via `set_config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single persistent queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued entries before the queue counts as full.
    pub max_items: usize,

    /// Maximum total payload bytes before the queue counts as full.
    pub max_size_bytes: u64,

    /// Entries larger than this are refused outright.
    pub max_item_size_bytes: u64,

    /// Default per-entry lifetime applied when an add carries no expiry.
    pub max_age: Option<Duration>,

    /// Journal size past which an empty queue's journal is rewritten.
    pub max_journal_size: u64,

    /// Multiplier on `max_journal_size`; past it the journal is packed even
    /// while entries remain, provided they would fit in a fresh journal.
    pub max_journal_overflow: u64,

    /// Advisory in-memory budget, reported through stats.
    pub max_memory_bytes: u64,

    /// When full, discard the oldest entries instead of refusing the add.
    pub discard_old_when_full: bool,

    /// Disable to run the queue memory-only, with no on-disk journal.
    pub keep_journal: bool,

    /// Durability policy for journal writes.
    pub flush_mode: FlushMode,

    /// An empty queue idle for longer than this is eligible for deletion.
    pub max_queue_age: Option<Duration>,

    /// Upper bound on entries discarded by a single expiration sweep.
    pub max_expire_sweep: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_items:             usize::MAX,
            max_size_bytes:        u64::MAX,
            max_item_size_bytes:   u64::MAX,
            max_age:               None,
            max_journal_size:      16 * 1024 * 1024,
            max_journal_overflow:  10,
            max_memory_bytes:      128 * 1024 * 1024,
            discard_old_when_full: false,
            keep_journal:          true,
            flush_mode:            FlushMode::Sync,
            max_queue_age:         None,
            max_expire_sweep:      usize::MAX,
        }
    }
}

/// Durability policy for journal writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// fsync before every add returns. The default: a `true` from add means
    /// the entry survived a crash.
    Sync,
    /// fsync once either threshold trips; the interval is enforced by the
    /// shared timer even when the queue goes idle.
    Batch { bytes: usize, interval: Duration },
    /// Leave syncing to the OS page cache.
    Async,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sync_journaled() {
        let config = QueueConfig::default();
        assert_eq!(config.flush_mode, FlushMode::Sync);
        assert!(config.keep_journal);
        assert!(config.max_age.is_none());
    }

    #[test]
    fn test_serde_round_trip_keeps_flush_mode() {
        let config = QueueConfig {
            flush_mode: FlushMode::Batch {
                bytes:    4096,
                interval: Duration::from_millis(50),
            },
            max_items: 10,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
