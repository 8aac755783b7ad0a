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

//! The authoritative name → queue mapping and fanout index.
//!
//! The registry is plain data behind the collection's single lock; it
//! never performs queue I/O itself except the one-time `setup` during
//! creation, which must complete before the handle is published. Per-queue
//! operations run on handles after the lock is released.
//!
//! Invariant: for every registered name containing `+`, the master segment
//! is a key in the fanout index and the name is in its child set.

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::Arc,
};

use hopper_storage_journal::{PersistentQueue, QueueConfig, TimerHandle};
use tracing::info;

use crate::{Result, name::master_of};

#[derive(Default)]
pub(crate) struct QueueRegistry {
    queues:        HashMap<String, Arc<PersistentQueue>>,
    fanout:        HashMap<String, BTreeSet<String>>,
    shutting_down: bool,
}

impl QueueRegistry {
    pub fn is_shutting_down(&self) -> bool { self.shutting_down }

    pub fn lookup(&self, name: &str) -> Option<Arc<PersistentQueue>> {
        self.queues.get(name).cloned()
    }

    /// Returns the existing handle or creates, sets up, and publishes a new
    /// one. `None` while shutting down.
    ///
    /// The caller holds the collection lock, which is what serializes two
    /// concurrent creations of the same name into one construction.
    pub fn get_or_create(
        &mut self,
        name: &str,
        root: &Path,
        config: QueueConfig,
        timer: &TimerHandle,
    ) -> Result<Option<Arc<PersistentQueue>>> {
        if self.shutting_down {
            return Ok(None);
        }
        if let Some(queue) = self.queues.get(name) {
            return Ok(Some(queue.clone()));
        }

        let queue = Arc::new(PersistentQueue::new(name, root, config, timer.clone()));
        queue.setup()?;

        if let Some(master) = master_of(name) {
            self.fanout
                .entry(master.to_string())
                .or_default()
                .insert(name.to_string());
        }

        info!(queue = name, "Created queue");
        self.queues.insert(name.to_string(), queue.clone());
        Ok(Some(queue))
    }

    /// Unregisters a queue, dropping it from its master's child set. The
    /// returned handle is still open; the caller closes and destroys it
    /// outside the lock. A no-op after shutdown.
    pub fn remove(&mut self, name: &str) -> Option<Arc<PersistentQueue>> {
        if self.shutting_down {
            return None;
        }
        let queue = self.queues.remove(name)?;

        if let Some(master) = master_of(name)
            && let Some(children) = self.fanout.get_mut(master)
        {
            children.remove(name);
        }
        Some(queue)
    }

    /// Child names registered under a master, in name order.
    pub fn fanout_children(&self, master: &str) -> Vec<String> {
        self.fanout
            .get(master)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> { self.queues.keys().cloned().collect() }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Arc<PersistentQueue>)> {
        self.queues.iter()
    }

    pub fn handles(&self) -> Vec<Arc<PersistentQueue>> { self.queues.values().cloned().collect() }

    /// Flips the shutting-down flag and drains every handle. `None` when
    /// shutdown has already begun, which is what makes collection shutdown
    /// idempotent.
    pub fn begin_shutdown(&mut self) -> Option<Vec<Arc<PersistentQueue>>> {
        if self.shutting_down {
            return None;
        }
        self.shutting_down = true;
        self.fanout.clear();

        let mut handles: Vec<_> = self.queues.drain().collect();
        handles.sort_by(|(a, _), (b, _)| a.cmp(b));
        Some(handles.into_iter().map(|(_, queue)| queue).collect())
    }
}
