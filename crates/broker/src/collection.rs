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

//! The queue collection: naming, fanout, aliases, and lifecycle over a
//! directory of journaled queues.
//!
//! One [`QueueCollection`] serves many independent named queues from a
//! single root directory. Writes resolve through three layers:
//!
//! 1. **Alias**: a name bound to an alias forwards the write to every
//!    destination queue and reads back nothing.
//! 2. **Fanout**: a write to `master` is re-dispatched to every registered
//!    `master+tag` child, then falls through to the master's own queue.
//! 3. **Queue**: the write lands in a [`PersistentQueue`], created lazily
//!    on first use.
//!
//! All registry state (queue map, fanout index, alias map, config,
//! shutting-down flag) lives behind one mutex. The lock is held only to
//! look up or create handles, never across per-queue I/O, so a slow
//! journal write on one queue cannot serialize the others. Shutdown flips
//! the flag under the lock, making it a total barrier: operations that
//! sequence after it observe shutdown, operations already holding a handle
//! run to completion.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hopper_storage_journal::{Item, ItemFuture, PersistentQueue, Timer, path as journal_path};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::{
    BrokerConfig, Result,
    alias::{AliasRegistry, AliasedQueue},
    lifecycle::verify_queue_path,
    name::QueueName,
    registry::QueueRegistry,
};

/// The result of a [`QueueCollection::remove`] call.
///
/// Resolves to `Some(item)` or `None` exactly like the underlying
/// [`ItemFuture`]; hit/miss counters update when the future resolves.
pub struct RemoveFuture {
    inner:    ItemFuture,
    counters: Arc<Counters>,
}

impl RemoveFuture {
    fn new(inner: ItemFuture, counters: Arc<Counters>) -> Self { Self { inner, counters } }

    /// Blocks until the read resolves.
    #[must_use]
    pub fn wait(self) -> Option<Item> {
        let item = self.inner.wait();
        if item.is_some() {
            self.counters.get_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.get_misses.fetch_add(1, Ordering::Relaxed);
        }
        item
    }
}

#[derive(Default)]
struct Counters {
    total_added: AtomicU64,
    get_hits:    AtomicU64,
    get_misses:  AtomicU64,
}

struct CollectionState {
    registry: QueueRegistry,
    aliases:  AliasRegistry,
    config:   BrokerConfig,
}

impl CollectionState {
    fn reconcile_aliases(&mut self) {
        self.aliases
            .reconcile(&self.config.aliases, self.config.queues.keys());
    }
}

/// A collection of named journaled queues under one root directory.
pub struct QueueCollection {
    root:     PathBuf,
    timer:    Timer,
    state:    Mutex<CollectionState>,
    counters: Arc<Counters>,
}

impl QueueCollection {
    /// Creates a collection over `root`, creating the directory if needed.
    ///
    /// Fails with `InaccessibleQueuePath` when the root is not a writable
    /// directory. Aliases from the config are reconciled immediately; disk
    /// state is only picked up by [`load_queues`](Self::load_queues).
    pub fn new(root: impl Into<PathBuf>, config: BrokerConfig) -> Result<Self> {
        let root = root.into();
        verify_queue_path(&root)?;

        let mut state = CollectionState {
            registry: QueueRegistry::default(),
            aliases: AliasRegistry::default(),
            config,
        };
        state.reconcile_aliases();

        Ok(Self {
            root,
            timer: Timer::new()?,
            state: Mutex::new(state),
            counters: Arc::new(Counters::default()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path { &self.root }

    /// Materializes every queue with recoverable state on disk, then
    /// reconciles aliases. Called once at boot.
    pub fn load_queues(&self) -> Result<()> {
        let names = journal_path::scan_queue_names(&self.root)?;
        let timer = self.timer.handle();

        let mut state = self.state.lock();
        for name in &names {
            let config = state.config.effective_queue_config(name);
            state.registry.get_or_create(name, &self.root, config, &timer)?;
        }
        state.reconcile_aliases();

        info!(count = names.len(), root = ?self.root, "Queues loaded");
        Ok(())
    }

    /// Adds an entry to a named target: an alias, a fanout master, or a
    /// plain queue.
    ///
    /// Returns `Ok(false)` while shutting down or when the target queue
    /// refuses the entry. Journal failures on the addressed queue
    /// propagate; failures on fanout siblings are logged and do not abort
    /// the others.
    pub fn add(
        &self,
        name: &str,
        data: Bytes,
        expiry: Option<DateTime<Utc>>,
        add_time: DateTime<Utc>,
    ) -> Result<bool> {
        QueueName::parse(name)?;

        let alias = {
            let state = self.state.lock();
            if state.registry.is_shutting_down() {
                return Ok(false);
            }
            state.aliases.lookup(name)
        };
        if let Some(alias) = alias {
            return Ok(self.add_via_alias(&alias, &data, expiry, add_time));
        }

        // Fanout broadcast: children get their own copies, then the write
        // falls through to the master's own queue unconditionally.
        let children = { self.state.lock().registry.fanout_children(name) };
        for child in children {
            if let Err(cause) = self.add(&child, data.clone(), expiry, add_time) {
                error!(queue = %child, error = ?cause, "Fanout delivery failed");
            }
        }

        let queue = {
            let mut state = self.state.lock();
            let config = state.config.effective_queue_config(name);
            state
                .registry
                .get_or_create(name, &self.root, config, &self.timer.handle())?
        };
        let Some(queue) = queue else {
            return Ok(false);
        };

        let added = queue.add(data, expiry, add_time)?;
        if added {
            self.counters.total_added.fetch_add(1, Ordering::Relaxed);
        }
        Ok(added)
    }

    fn add_via_alias(
        &self,
        alias: &AliasedQueue,
        data: &Bytes,
        expiry: Option<DateTime<Utc>>,
        add_time: DateTime<Utc>,
    ) -> bool {
        for destination in alias.destinations() {
            if let Err(cause) = self.add(&destination, data.clone(), expiry, add_time) {
                error!(
                    alias = alias.name(),
                    queue = %destination,
                    error = ?cause,
                    "Alias delivery failed"
                );
            }
        }
        alias.record_add();
        true
    }

    /// Removes (or peeks) the head entry of a queue, waiting until
    /// `deadline` when one is not immediately available.
    ///
    /// Alias names and absent queues resolve to `None`; a queue is never
    /// created by a read.
    #[must_use]
    pub fn remove(
        &self,
        name: &str,
        deadline: Option<Instant>,
        transactional: bool,
        peek: bool,
    ) -> RemoveFuture {
        let queue = {
            let state = self.state.lock();
            if state.registry.is_shutting_down() || state.aliases.lookup(name).is_some() {
                None
            } else {
                state.registry.lookup(name)
            }
        };

        let future = match queue {
            None => ItemFuture::ready(None),
            Some(queue) if peek => queue.wait_peek(deadline),
            Some(queue) => queue.wait_remove(deadline, transactional),
        };
        RemoveFuture::new(future, self.counters.clone())
    }

    /// Returns a reserved entry to the head of its queue. A no-op on
    /// absent queues or unknown xids.
    pub fn unremove(&self, name: &str, xid: u64) {
        if let Some(queue) = self.queue(name)
            && let Err(cause) = queue.unremove(xid)
        {
            error!(queue = name, xid, error = ?cause, "Unremove failed");
        }
    }

    /// Discards a reserved entry permanently. A no-op on absent queues or
    /// unknown xids.
    pub fn confirm_remove(&self, name: &str, xid: u64) {
        if let Some(queue) = self.queue(name)
            && let Err(cause) = queue.confirm_remove(xid)
        {
            error!(queue = name, xid, error = ?cause, "Confirm failed");
        }
    }

    /// Drops every queued entry of a queue. A no-op on absent queues.
    pub fn flush(&self, name: &str) {
        if let Some(queue) = self.queue(name)
            && let Err(cause) = queue.flush()
        {
            error!(queue = name, error = ?cause, "Flush failed");
        }
    }

    /// Closes a queue, removes its journal from disk, and forgets it. A
    /// no-op on absent queues and after shutdown.
    pub fn delete(&self, name: &str) -> Result<()> {
        let queue = { self.state.lock().registry.remove(name) };
        if let Some(queue) = queue {
            queue.destroy_journal()?;
            info!(queue = name, "Deleted queue");
        }
        Ok(())
    }

    /// Discards expired entries from one queue. Returns the discard count.
    pub fn flush_expired(&self, name: &str) -> usize {
        self.queue(name).map_or(0, |queue| {
            queue.discard_expired(None).unwrap_or_else(|cause| {
                error!(queue = name, error = ?cause, "Expiration sweep failed");
                0
            })
        })
    }

    /// Discards expired entries across all live queues. Returns the total
    /// discard count. A no-op while shutting down.
    pub fn flush_all_expired(&self) -> usize {
        let handles = {
            let state = self.state.lock();
            if state.registry.is_shutting_down() {
                return 0;
            }
            state.registry.handles()
        };

        handles
            .iter()
            .map(|queue| {
                queue.discard_expired(None).unwrap_or_else(|cause| {
                    error!(queue = queue.name(), error = ?cause, "Expiration sweep failed");
                    0
                })
            })
            .sum()
    }

    /// Deletes the queue if it reports itself ready for expiration (empty
    /// and idle past its configured max age).
    pub fn expire_queue(&self, name: &str) -> Result<()> {
        if self.queue(name).is_some_and(|queue| queue.is_ready_for_expiration()) {
            info!(queue = name, "Expiring idle queue");
            self.delete(name)?;
        }
        Ok(())
    }

    /// Sweeps every live queue through [`expire_queue`](Self::expire_queue).
    /// Returns the number of queues deleted.
    pub fn delete_expired_queues(&self) -> usize {
        let names = { self.state.lock().registry.names() };
        let mut deleted = 0;

        for name in names {
            let ready = self
                .queue(&name)
                .is_some_and(|queue| queue.is_ready_for_expiration());
            if !ready {
                continue;
            }
            info!(queue = %name, "Expiring idle queue");
            match self.delete(&name) {
                Ok(()) => deleted += 1,
                Err(cause) => error!(queue = %name, error = ?cause, "Queue expiration failed"),
            }
        }
        deleted
    }

    /// Looks up a live queue handle. Absent after shutdown.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<Arc<PersistentQueue>> {
        let state = self.state.lock();
        if state.registry.is_shutting_down() {
            return None;
        }
        state.registry.lookup(name)
    }

    /// Looks up a live alias. Absent after shutdown.
    #[must_use]
    pub fn alias(&self, name: &str) -> Option<Arc<AliasedQueue>> {
        let state = self.state.lock();
        if state.registry.is_shutting_down() {
            return None;
        }
        state.aliases.lookup(name)
    }

    /// Swaps in a new configuration: the three config maps are replaced,
    /// every live queue gets its effective config re-applied in place, and
    /// aliases are reconciled. No queue is created or destroyed.
    pub fn reload(&self, config: BrokerConfig) {
        let mut state = self.state.lock();
        state.config = config;

        for (name, queue) in state.registry.entries() {
            queue.set_config(state.config.effective_queue_config(name));
        }
        state.reconcile_aliases();

        info!("Configuration reloaded");
    }

    /// Shuts the collection down: flips the barrier, then closes every
    /// queue in turn, returning only after the last journal is synced.
    /// Idempotent; on-disk state is left intact.
    pub fn shutdown(&self) {
        let queues = { self.state.lock().registry.begin_shutdown() };
        let Some(queues) = queues else {
            return;
        };

        for queue in &queues {
            if let Err(cause) = queue.close() {
                error!(queue = queue.name(), error = ?cause, "Close failed during shutdown");
            }
        }
        if let Err(cause) = self.timer.shutdown() {
            error!(error = ?cause, "Timer shutdown failed");
        }

        info!(count = queues.len(), "Queue collection shut down");
    }

    /// Names of all live queues.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names = self.state.lock().registry.names();
        names.sort();
        names
    }

    /// Total entries across live queues. A snapshot; not consistent across
    /// queues.
    #[must_use]
    pub fn current_items(&self) -> usize {
        let handles = { self.state.lock().registry.handles() };
        handles.iter().map(|queue| queue.len()).sum()
    }

    /// Total payload bytes across live queues.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        let handles = { self.state.lock().registry.handles() };
        handles.iter().map(|queue| queue.bytes()).sum()
    }

    /// Fraction of the configured memory budget currently occupied.
    #[must_use]
    pub fn reserved_memory_ratio(&self) -> f64 {
        let handles = { self.state.lock().registry.handles() };
        let budget: u64 = handles.iter().map(|queue| queue.max_memory_bytes()).sum();
        if budget == 0 {
            return 0.0;
        }
        let used: u64 = handles.iter().map(|queue| queue.bytes()).sum();
        used as f64 / budget as f64
    }

    /// Per-queue (or per-alias) stats as key/value strings.
    #[must_use]
    pub fn dump_stats(&self, name: &str) -> Option<Vec<(String, String)>> {
        let state = self.state.lock();
        if state.registry.is_shutting_down() {
            return None;
        }
        state
            .registry
            .lookup(name)
            .map(|queue| queue.dump_stats())
            .or_else(|| state.aliases.dump_stats(name))
    }

    /// Resets a queue's counters. A no-op on absent queues.
    pub fn reset_stats(&self, name: &str) {
        if let Some(queue) = self.queue(name) {
            queue.reset_stats();
        }
    }

    #[must_use]
    pub fn total_added(&self) -> u64 { self.counters.total_added.load(Ordering::Relaxed) }

    #[must_use]
    pub fn get_hits(&self) -> u64 { self.counters.get_hits.load(Ordering::Relaxed) }

    #[must_use]
    pub fn get_misses(&self) -> u64 { self.counters.get_misses.load(Ordering::Relaxed) }
}

impl Drop for QueueCollection {
    fn drop(&mut self) { self.shutdown(); }
}
