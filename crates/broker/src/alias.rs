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

//! Aliases: named write-only targets forwarding to real queues.
//!
//! Aliases share the queue namespace. When a name is bound to both, writes
//! go to the alias and a warning is logged at reconcile time. Reads from
//! an alias always come back empty.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::AliasConfig;

/// A live alias. Owns nothing but its config and counters; the collection
/// performs the actual fan-out to destination queues.
pub struct AliasedQueue {
    name:        String,
    config:      Mutex<AliasConfig>,
    total_items: AtomicU64,
}

impl AliasedQueue {
    pub(crate) fn new(name: &str, config: AliasConfig) -> Self {
        Self {
            name:        name.to_string(),
            config:      Mutex::new(config),
            total_items: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Snapshot of the destination queue names.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> { self.config.lock().destinations.clone() }

    pub(crate) fn set_config(&self, config: AliasConfig) { *self.config.lock() = config; }

    pub(crate) fn record_add(&self) { self.total_items.fetch_add(1, Ordering::Relaxed); }

    #[must_use]
    pub fn dump_stats(&self) -> Vec<(String, String)> {
        vec![
            (
                "total_items".into(),
                self.total_items.load(Ordering::Relaxed).to_string(),
            ),
            (
                "destinations".into(),
                self.config.lock().destinations.join(","),
            ),
        ]
    }
}

/// The authoritative name → alias mapping, reconciled against config.
#[derive(Default)]
pub(crate) struct AliasRegistry {
    aliases: HashMap<String, Arc<AliasedQueue>>,
}

impl AliasRegistry {
    pub fn lookup(&self, name: &str) -> Option<Arc<AliasedQueue>> {
        self.aliases.get(name).cloned()
    }

    /// Applies a new alias config set: existing aliases are updated in
    /// place, new ones created. Aliases absent from the config are left
    /// alone; alias deletion is out of band.
    pub fn reconcile<I, S>(&mut self, alias_configs: &HashMap<String, AliasConfig>, queue_config_names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in queue_config_names {
            let name = name.as_ref();
            if alias_configs.contains_key(name) {
                warn!(
                    name,
                    "Name is configured as both a queue and an alias; writes will go to the alias"
                );
            }
        }

        for (name, config) in alias_configs {
            if let Some(alias) = self.aliases.get(name) {
                alias.set_config(config.clone());
            } else {
                debug!(alias = %name, "Created alias");
                self.aliases
                    .insert(name.clone(), Arc::new(AliasedQueue::new(name, config.clone())));
            }
        }
    }

    pub fn dump_stats(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.aliases.get(name).map(|alias| alias.dump_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias_config(destinations: &[&str]) -> AliasConfig {
        AliasConfig {
            destinations: destinations.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    #[test]
    fn test_reconcile_creates_and_updates() {
        let mut registry = AliasRegistry::default();

        let configs = HashMap::from([("in".to_string(), alias_config(&["a"]))]);
        registry.reconcile(&configs, std::iter::empty::<&str>());

        let alias = registry.lookup("in").unwrap();
        assert_eq!(alias.destinations(), vec!["a"]);

        let configs = HashMap::from([("in".to_string(), alias_config(&["a", "b"]))]);
        registry.reconcile(&configs, std::iter::empty::<&str>());

        // Same alias object, new destinations.
        assert!(Arc::ptr_eq(&alias, &registry.lookup("in").unwrap()));
        assert_eq!(alias.destinations(), vec!["a", "b"]);
    }

    #[test]
    fn test_reconcile_never_removes() {
        let mut registry = AliasRegistry::default();

        let configs = HashMap::from([("in".to_string(), alias_config(&["a"]))]);
        registry.reconcile(&configs, std::iter::empty::<&str>());
        registry.reconcile(&HashMap::new(), std::iter::empty::<&str>());

        assert!(registry.lookup("in").is_some());
    }

    #[test]
    fn test_add_counter() {
        let alias = AliasedQueue::new("in", alias_config(&["a"]));
        alias.record_add();
        alias.record_add();

        let stats: HashMap<_, _> = alias.dump_stats().into_iter().collect();
        assert_eq!(stats["total_items"], "2");
    }
}
