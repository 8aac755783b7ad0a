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

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::Utc;
use hopper_broker::{AliasConfig, BrokerConfig, Error, QueueCollection, QueueConfig};
use tempfile::TempDir;

fn collection(temp_dir: &TempDir) -> QueueCollection {
    QueueCollection::new(temp_dir.path(), BrokerConfig::default()).unwrap()
}

fn add(collection: &QueueCollection, name: &str, payload: &'static [u8]) -> bool {
    collection
        .add(name, Bytes::from_static(payload), None, Utc::now())
        .unwrap()
}

fn remove_now(collection: &QueueCollection, name: &str) -> Option<Bytes> {
    collection
        .remove(name, None, false, false)
        .wait()
        .map(|item| item.payload)
}

#[test]
fn test_add_remove_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    assert!(add(&collection, "work", b"one"));
    assert!(add(&collection, "work", b"two"));

    assert_eq!(remove_now(&collection, "work"), Some(Bytes::from_static(b"one")));
    assert_eq!(remove_now(&collection, "work"), Some(Bytes::from_static(b"two")));
    assert_eq!(remove_now(&collection, "work"), None);

    assert_eq!(collection.total_added(), 2);
    assert_eq!(collection.get_hits(), 2);
    assert_eq!(collection.get_misses(), 1);
}

#[test]
fn test_fanout_basic() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    assert!(add(&collection, "feed+a", b"x"));
    assert!(add(&collection, "feed+b", b"y"));
    assert!(add(&collection, "feed", b"z"));

    assert_eq!(remove_now(&collection, "feed+a"), Some(Bytes::from_static(b"x")));
    assert_eq!(remove_now(&collection, "feed+a"), Some(Bytes::from_static(b"z")));
    assert_eq!(remove_now(&collection, "feed+b"), Some(Bytes::from_static(b"y")));
    assert_eq!(remove_now(&collection, "feed+b"), Some(Bytes::from_static(b"z")));

    // The master's own queue is materialized by the add path and receives
    // its copy too.
    assert_eq!(remove_now(&collection, "feed"), Some(Bytes::from_static(b"z")));
}

#[test]
fn test_illegal_name_leaves_registry_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    let result = collection.add("bad.name", Bytes::from_static(b"x"), None, Utc::now());
    assert!(matches!(result, Err(Error::IllegalName { .. })));
    assert!(collection.queue_names().is_empty());
}

#[test]
fn test_shutdown_race_resolves_blocked_reader() {
    let temp_dir = TempDir::new().unwrap();
    let collection = Arc::new(collection(&temp_dir));

    // Materialize the queue, then leave it empty.
    assert!(add(&collection, "q", b"seed"));
    assert_eq!(remove_now(&collection, "q"), Some(Bytes::from_static(b"seed")));

    let reader = {
        let collection = collection.clone();
        std::thread::spawn(move || {
            collection
                .remove("q", Some(Instant::now() + Duration::from_secs(30)), false, false)
                .wait()
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    collection.shutdown();

    assert!(reader.join().unwrap().is_none());
    assert!(started.elapsed() < Duration::from_secs(30));

    assert!(
        !collection
            .add("q", Bytes::from_static(b"x"), None, Utc::now())
            .unwrap()
    );
}

#[test]
fn test_shutdown_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);
    add(&collection, "q", b"x");

    collection.shutdown();
    collection.shutdown();
    assert!(collection.queue("q").is_none());
}

#[test]
fn test_reservation_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);
    add(&collection, "q", b"x");

    let held = collection.remove("q", None, true, false).wait().unwrap();
    assert_eq!(held.payload, Bytes::from_static(b"x"));

    // Invisible while reserved.
    let miss = collection
        .remove("q", Some(Instant::now() + Duration::from_millis(10)), false, false)
        .wait();
    assert!(miss.is_none());

    collection.unremove("q", held.xid);
    assert_eq!(remove_now(&collection, "q"), Some(Bytes::from_static(b"x")));
}

#[test]
fn test_confirm_remove_consumes_permanently() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);
    add(&collection, "q", b"x");

    let held = collection.remove("q", None, true, false).wait().unwrap();
    collection.confirm_remove("q", held.xid);

    assert_eq!(remove_now(&collection, "q"), None);
    assert_eq!(collection.queue("q").unwrap().open_reservations(), 0);
}

#[test]
fn test_peek_leaves_queue_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);
    add(&collection, "q", b"x");

    let peeked = collection.remove("q", None, false, true).wait().unwrap();
    assert_eq!(peeked.payload, Bytes::from_static(b"x"));
    assert_eq!(remove_now(&collection, "q"), Some(Bytes::from_static(b"x")));
}

#[test]
fn test_expired_entry_flush() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    let now = Utc::now();
    collection
        .add(
            "q",
            Bytes::from_static(b"x"),
            Some(now - chrono::Duration::seconds(1)),
            now - chrono::Duration::seconds(2),
        )
        .unwrap();

    assert_eq!(collection.flush_expired("q"), 1);
    assert_eq!(remove_now(&collection, "q"), None);
}

#[test]
fn test_alias_masks_queue_of_same_name() {
    let temp_dir = TempDir::new().unwrap();

    let config = BrokerConfig {
        queues:  HashMap::from([("m".to_string(), QueueConfig::default())]),
        aliases: HashMap::from([(
            "m".to_string(),
            AliasConfig {
                destinations: vec!["t1".to_string()],
            },
        )]),
        ..Default::default()
    };
    let collection = QueueCollection::new(temp_dir.path(), config).unwrap();

    assert!(add(&collection, "m", b"x"));
    assert_eq!(remove_now(&collection, "t1"), Some(Bytes::from_static(b"x")));
    assert_eq!(remove_now(&collection, "m"), None);
}

#[test]
fn test_alias_fanout_expansion() {
    let temp_dir = TempDir::new().unwrap();

    let config = BrokerConfig {
        aliases: HashMap::from([(
            "in".to_string(),
            AliasConfig {
                destinations: vec!["t1".to_string(), "t2".to_string()],
            },
        )]),
        ..Default::default()
    };
    let collection = QueueCollection::new(temp_dir.path(), config).unwrap();

    assert!(add(&collection, "in", b"broadcast"));
    assert_eq!(remove_now(&collection, "t1"), Some(Bytes::from_static(b"broadcast")));
    assert_eq!(remove_now(&collection, "t2"), Some(Bytes::from_static(b"broadcast")));

    let stats: HashMap<_, _> = collection.dump_stats("in").unwrap().into_iter().collect();
    assert_eq!(stats["total_items"], "1");
}

#[test]
fn test_reload_preserves_queue_identity() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);
    add(&collection, "q", b"x");

    let before = collection.queue("q").unwrap();
    assert_eq!(before.config().max_items, usize::MAX);

    let config = BrokerConfig {
        queues: HashMap::from([(
            "q".to_string(),
            QueueConfig {
                max_items: 9,
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    collection.reload(config);

    let after = collection.queue("q").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.config().max_items, 9);

    // Reload does not create queues.
    assert_eq!(collection.queue_names(), vec!["q".to_string()]);
}

#[test]
fn test_boot_discovers_queues_on_disk() {
    let temp_dir = TempDir::new().unwrap();

    {
        let collection = collection(&temp_dir);
        add(&collection, "orders", b"pending");
        add(&collection, "feed+audit", b"logged");
        collection.shutdown();
    }

    let collection = collection(&temp_dir);
    collection.load_queues().unwrap();

    assert_eq!(
        collection.queue_names(),
        vec!["feed+audit".to_string(), "orders".to_string()]
    );

    // Discovered fanout children resume receiving master writes.
    assert!(add(&collection, "feed", b"fresh"));
    assert_eq!(remove_now(&collection, "feed+audit"), Some(Bytes::from_static(b"logged")));
    assert_eq!(remove_now(&collection, "feed+audit"), Some(Bytes::from_static(b"fresh")));
    assert_eq!(remove_now(&collection, "orders"), Some(Bytes::from_static(b"pending")));
}

#[test]
fn test_delete_removes_queue_and_journal() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    add(&collection, "doomed", b"x");
    assert!(temp_dir.path().join("doomed").exists());

    collection.delete("doomed").unwrap();
    assert!(collection.queue("doomed").is_none());
    assert!(!temp_dir.path().join("doomed").exists());

    // Deleted fanout children stop receiving master writes.
    add(&collection, "feed+a", b"x");
    collection.delete("feed+a").unwrap();
    add(&collection, "feed", b"y");
    assert_eq!(remove_now(&collection, "feed+a"), None);
}

#[test]
fn test_queue_expiration_deletes_idle_queue() {
    let temp_dir = TempDir::new().unwrap();

    let config = BrokerConfig {
        queues: HashMap::from([(
            "brief".to_string(),
            QueueConfig {
                max_queue_age: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        )]),
        ..Default::default()
    };
    let collection = QueueCollection::new(temp_dir.path(), config).unwrap();

    add(&collection, "brief", b"x");
    add(&collection, "lasting", b"y");
    remove_now(&collection, "brief");

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(collection.delete_expired_queues(), 1);
    assert!(collection.queue("brief").is_none());
    assert!(collection.queue("lasting").is_some());
}

#[test]
fn test_concurrent_creation_yields_one_queue() {
    let temp_dir = TempDir::new().unwrap();
    let collection = Arc::new(collection(&temp_dir));

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let collection = collection.clone();
            std::thread::spawn(move || {
                collection
                    .add("shared", Bytes::from(format!("w{i}")), None, Utc::now())
                    .unwrap()
            })
        })
        .collect();

    for writer in writers {
        assert!(writer.join().unwrap());
    }

    assert_eq!(collection.queue_names(), vec!["shared".to_string()]);
    assert_eq!(collection.queue("shared").unwrap().len(), 8);
}

#[test]
fn test_remove_on_absent_queue_is_a_miss() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    assert_eq!(remove_now(&collection, "nowhere"), None);
    assert_eq!(collection.get_misses(), 1);

    // Forwarded no-ops on absent queues never fail.
    collection.unremove("nowhere", 1);
    collection.confirm_remove("nowhere", 1);
    collection.flush("nowhere");
}

#[test]
fn test_collection_stats_snapshots() {
    let temp_dir = TempDir::new().unwrap();
    let collection = collection(&temp_dir);

    add(&collection, "a", b"12345");
    add(&collection, "b", b"123");

    assert_eq!(collection.current_items(), 2);
    assert_eq!(collection.current_bytes(), 8);
    assert!(collection.reserved_memory_ratio() > 0.0);

    let stats: HashMap<_, _> = collection.dump_stats("a").unwrap().into_iter().collect();
    assert_eq!(stats["items"], "1");
    assert_eq!(stats["bytes"], "5");
}
