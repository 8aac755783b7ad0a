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

//! Journaled FIFO queue engine with reservation semantics.
//!
//! Each [`PersistentQueue`] is a single durable FIFO backed by an
//! append-only journal under a root directory. The engine provides:
//! - Synchronous, journal-durable adds (fsync policy per [`FlushMode`])
//! - Blocking removes and peeks with deadlines, resolved through
//!   [`ItemFuture`] completion handles
//! - Transactional removes (reservations) that survive restarts
//! - Per-entry expiration and journal compaction
//!
//! The collection layer that names, fans out, and aliases queues lives in
//! the `hopper-broker` crate; this crate knows nothing about other queues.

mod journal;

pub mod config;
pub mod error;
pub mod future;
pub mod item;
pub mod path;
pub mod queue;
pub mod timer;

pub use config::{FlushMode, QueueConfig};
pub use error::{Error, Result};
pub use future::ItemFuture;
pub use item::Item;
pub use queue::PersistentQueue;
pub use timer::{Timer, TimerHandle, TimerToken};
