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

//! Completion handle for blocking reads.
//!
//! A `wait_remove`/`wait_peek` call returns an [`ItemFuture`] immediately;
//! the queue fulfills it from whichever side wins: a matching entry, the
//! deadline timer, a flush, or shutdown. The fulfillment side never blocks
//! and fulfills at most once.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::Item;

/// A pending read result.
///
/// Resolves to `Some(item)` when an entry was delivered, or `None` on
/// deadline, flush, queue absence, or shutdown. Dropping the future without
/// waiting is equivalent to receiving `None`.
pub struct ItemFuture {
    rx: Receiver<Option<Item>>,
}

impl ItemFuture {
    /// A future that is already resolved.
    #[must_use]
    pub fn ready(value: Option<Item>) -> Self {
        let (slot, future) = pending();
        slot.fulfill(value);
        future
    }

    /// Blocks until the read resolves.
    #[must_use]
    pub fn wait(self) -> Option<Item> { self.rx.recv().unwrap_or(None) }

    /// Returns the result if the read has already resolved.
    #[must_use]
    pub fn try_wait(&self) -> Option<Option<Item>> { self.rx.try_recv().ok() }
}

/// Fulfillment side of an [`ItemFuture`]; shared between the waiter table
/// and the deadline timer.
pub(crate) struct ItemSlot {
    tx: Mutex<Option<Sender<Option<Item>>>>,
}

impl ItemSlot {
    /// Resolves the future. Only the first call delivers; later calls are
    /// ignored.
    pub fn fulfill(&self, value: Option<Item>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(value);
        }
    }
}

/// Creates an unresolved future and its fulfillment slot.
pub(crate) fn pending() -> (Arc<ItemSlot>, ItemFuture) {
    let (tx, rx) = bounded(1);
    let slot = Arc::new(ItemSlot {
        tx: Mutex::new(Some(tx)),
    });
    (slot, ItemFuture { rx })
}
