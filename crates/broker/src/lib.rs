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

//! Queue collection registry over journaled persistent queues.
//!
//! A [`QueueCollection`] serves many independent named queues from one
//! directory. On top of the per-queue engine it implements the naming
//! layer: fanout (`master+tag` children receive every write to `master`),
//! write-only aliases, lazy creation, hot config reload, boot-time
//! discovery, and a shutdown barrier.
//!
//! ```no_run
//! use bytes::Bytes;
//! use chrono::Utc;
//! use hopper_broker::{BrokerConfig, QueueCollection};
//!
//! let collection = QueueCollection::new("/var/spool/hopper", BrokerConfig::default())?;
//! collection.load_queues()?;
//!
//! collection.add("work", Bytes::from("job"), None, Utc::now())?;
//! let item = collection.remove("work", None, false, false).wait();
//! assert_eq!(item.map(|i| i.payload), Some(Bytes::from("job")));
//!
//! collection.shutdown();
//! # Ok::<(), hopper_broker::Error>(())
//! ```

mod registry;

pub mod alias;
pub mod collection;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod name;

pub use alias::AliasedQueue;
pub use collection::{QueueCollection, RemoveFuture};
pub use config::{AliasConfig, BrokerConfig};
pub use error::{Error, Result};
pub use hopper_storage_journal::{FlushMode, Item, ItemFuture, PersistentQueue, QueueConfig};
pub use lifecycle::ExpirationSweeper;
pub use name::QueueName;
