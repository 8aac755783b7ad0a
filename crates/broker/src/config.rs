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

//! Collection-wide configuration: the default queue config, named
//! per-queue overrides, and alias definitions.
//!
//! The whole structure is swapped atomically on hot reload; resolution of
//! the effective per-queue config happens against whichever snapshot is
//! current.

use std::collections::HashMap;

use hopper_storage_journal::QueueConfig;
use serde::{Deserialize, Serialize};

use crate::name::master_of;

/// A named write target forwarding to one or more queues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    /// Queue names every write to the alias is delivered to.
    pub destinations: Vec<String>,
}

/// Configuration for a whole queue collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Fallback config for queues without a named entry.
    pub default_queue: QueueConfig,
    /// Per-queue overrides by name.
    pub queues:        HashMap<String, QueueConfig>,
    /// Alias definitions by name.
    pub aliases:       HashMap<String, AliasConfig>,
}

impl BrokerConfig {
    /// Resolves the effective config for a queue name.
    ///
    /// Exact name first, then the master segment (so fanout children
    /// inherit their master's config), then the default.
    #[must_use]
    pub fn effective_queue_config(&self, name: &str) -> QueueConfig {
        if let Some(config) = self.queues.get(name) {
            return config.clone();
        }
        if let Some(master) = master_of(name)
            && let Some(config) = self.queues.get(master)
        {
            return config.clone();
        }
        self.default_queue.clone()
    }
}
