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

//! The durable FIFO queue.
//!
//! A [`PersistentQueue`] keeps its live entries in memory and every
//! mutation in an append-only journal, so contents survive a restart.
//! On top of plain add/remove it supports:
//!
//! - **Reservations**: a transactional remove hands out an entry plus an
//!   xid; the entry stays invisible to other readers until it is confirmed
//!   (consumed) or un-removed (returned to the head).
//! - **Blocking reads**: removes and peeks with a deadline return an
//!   [`ItemFuture`] fulfilled by the next add, the deadline timer, a
//!   flush, or shutdown.
//! - **Expiration**: entries carry an optional expiry and are discarded on
//!   read or by sweeps; an empty queue idle past `max_queue_age` reports
//!   itself ready for deletion.
//!
//! All state sits behind one mutex per queue. Nothing here blocks while
//! holding another queue's lock; the owning collection looks a handle up
//! under its own lock and operates on the queue after releasing it.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
    FlushMode, Item, ItemFuture, QueueConfig, Result,
    future::{self, ItemSlot},
    journal::Journal,
    path::{journal_path, remove_stale_rewrites},
    timer::{TimerHandle, TimerToken},
};

/// A single durable FIFO with reservation semantics.
///
/// Handles are shared behind `Arc` by the owning collection; all methods
/// take `&self` and synchronize internally.
pub struct PersistentQueue {
    name:  String,
    root:  PathBuf,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    name:           String,
    root:           PathBuf,
    config:         QueueConfig,
    timer:          TimerHandle,
    journal:        Option<Journal>,
    items:          VecDeque<Item>,
    queue_bytes:    u64,
    reservations:   HashMap<u64, Item>,
    waiters:        VecDeque<Waiter>,
    next_item_id:   u64,
    next_xid:       u64,
    next_waiter_id: u64,
    closed:         bool,
    flush_tick:     bool,
    last_activity:  Instant,
    stats:          QueueStats,
}

struct Waiter {
    id:    u64,
    kind:  WaiterKind,
    slot:  Arc<ItemSlot>,
    token: Option<TimerToken>,
}

#[derive(Clone, Copy)]
enum WaiterKind {
    Remove { transactional: bool },
    Peek,
}

#[derive(Debug, Default)]
struct QueueStats {
    total_items:     u64,
    expired_items:   u64,
    discarded_items: u64,
    total_flushes:   u64,
}

impl PersistentQueue {
    /// Creates a queue handle. No I/O happens until [`setup`](Self::setup).
    #[must_use]
    pub fn new(name: &str, root: &std::path::Path, config: QueueConfig, timer: TimerHandle) -> Self {
        Self {
            name:  name.to_string(),
            root:  root.to_path_buf(),
            inner: Arc::new(Mutex::new(Inner {
                name: name.to_string(),
                root: root.to_path_buf(),
                config,
                timer,
                journal: None,
                items: VecDeque::new(),
                queue_bytes: 0,
                reservations: HashMap::new(),
                waiters: VecDeque::new(),
                next_item_id: 1,
                next_xid: 1,
                next_waiter_id: 1,
                closed: false,
                flush_tick: false,
                last_activity: Instant::now(),
                stats: QueueStats::default(),
            })),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Opens and replays the journal. Must run before the first operation;
    /// the collection calls this before publishing the handle.
    pub fn setup(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.config.keep_journal && inner.journal.is_none() {
            let mut journal = Journal::open(inner.root.clone(), &inner.name)?;
            let log = journal.replay()?;

            info!(
                queue = %inner.name,
                items = log.items.len(),
                reservations = log.reservations.len(),
                bytes = log.queue_bytes,
                "Queue loaded"
            );

            inner.items = log.items;
            inner.queue_bytes = log.queue_bytes;
            inner.reservations = log.reservations;
            inner.next_item_id = log.last_item_id + 1;
            inner.next_xid = log.last_xid + 1;
            inner.journal = Some(journal);
        }

        if let FlushMode::Batch { interval, .. } = inner.config.flush_mode
            && !inner.flush_tick
        {
            inner.flush_tick = true;
            arm_flush_tick(Arc::downgrade(&self.inner), inner.timer.clone(), interval);
        }

        Ok(())
    }

    /// Appends an entry, durable per the configured flush mode before
    /// `Ok(true)` is returned.
    ///
    /// Returns `Ok(false)` when the queue is closed, the payload is over
    /// the item size limit, or the queue is full and not configured to
    /// discard old entries. Journal failures propagate.
    pub fn add(
        &self,
        payload: Bytes,
        expiry: Option<DateTime<Utc>>,
        add_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Ok(false);
        }

        let size = payload.len() as u64;
        if size > inner.config.max_item_size_bytes || size > inner.config.max_size_bytes {
            debug!(queue = %inner.name, size, "Refused oversize entry");
            return Ok(false);
        }

        loop {
            let full = inner.items.len() >= inner.config.max_items
                || inner.queue_bytes + size > inner.config.max_size_bytes;
            if !full {
                break;
            }
            if !inner.config.discard_old_when_full {
                return Ok(false);
            }
            if inner.pop_oldest()?.is_none() {
                break;
            }
            inner.stats.discarded_items += 1;
        }

        let expiry = expiry.or_else(|| {
            inner
                .config
                .max_age
                .and_then(|age| chrono::Duration::from_std(age).ok())
                .map(|age| add_time + age)
        });

        let item = Item {
            id: inner.next_item_id,
            add_time,
            expiry,
            payload,
            xid: 0,
        };
        inner.next_item_id += 1;

        let mode = inner.config.flush_mode.clone();
        if let Some(journal) = inner.journal.as_mut() {
            journal.append_add(&item)?;
            journal.after_write(&mode)?;
        }

        inner.queue_bytes += size;
        inner.items.push_back(item);
        inner.stats.total_items += 1;
        inner.last_activity = Instant::now();

        inner.service_waiters()?;
        Ok(true)
    }

    /// Removes the head entry, or waits for one until `deadline`.
    ///
    /// Without a deadline the future resolves immediately, with `None` when
    /// the queue is empty. A transactional remove opens a reservation; the
    /// returned entry carries the xid to confirm or un-remove it.
    pub fn wait_remove(&self, deadline: Option<Instant>, transactional: bool) -> ItemFuture {
        self.wait_op(WaiterKind::Remove { transactional }, deadline)
    }

    /// Like [`wait_remove`](Self::wait_remove) but leaves the queue
    /// untouched.
    pub fn wait_peek(&self, deadline: Option<Instant>) -> ItemFuture {
        self.wait_op(WaiterKind::Peek, deadline)
    }

    /// Returns a reserved entry to the head of the queue. Unknown xids are
    /// ignored.
    pub fn unremove(&self, xid: u64) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Ok(());
        }
        let Some(mut item) = inner.reservations.remove(&xid) else {
            return Ok(());
        };

        let mode = inner.config.flush_mode.clone();
        if let Some(journal) = inner.journal.as_mut() {
            journal.append_unremove(xid)?;
            journal.after_write(&mode)?;
        }

        item.xid = 0;
        inner.queue_bytes += item.payload.len() as u64;
        inner.items.push_front(item);
        inner.service_waiters()
    }

    /// Discards a reserved entry permanently. Unknown xids are ignored.
    pub fn confirm_remove(&self, xid: u64) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.closed || inner.reservations.remove(&xid).is_none() {
            return Ok(());
        }

        let mode = inner.config.flush_mode.clone();
        if let Some(journal) = inner.journal.as_mut() {
            journal.append_confirm_remove(xid)?;
            journal.after_write(&mode)?;
        }
        inner.maybe_compact()
    }

    /// Drops every queued entry. Open reservations survive; pending reads
    /// resolve to `None`.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Ok(());
        }

        let mode = inner.config.flush_mode.clone();
        if let Some(journal) = inner.journal.as_mut() {
            journal.append_flush()?;
            journal.after_write(&mode)?;
        }

        let dropped = inner.items.len();
        inner.items.clear();
        inner.queue_bytes = 0;
        inner.stats.total_flushes += 1;
        inner.resolve_all_waiters();
        inner.maybe_compact()?;

        debug!(queue = %inner.name, dropped, "Queue flushed");
        Ok(())
    }

    /// Discards expired entries from the head, up to `limit` (defaulting
    /// to the configured sweep bound). Returns the discard count.
    pub fn discard_expired(&self, limit: Option<usize>) -> Result<usize> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Ok(0);
        }
        let limit = limit.unwrap_or(inner.config.max_expire_sweep);
        inner.discard_expired_heads(Utc::now(), limit)
    }

    /// Syncs and releases the journal; pending reads resolve to `None` and
    /// every later operation is refused. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.resolve_all_waiters();

        if let Some(mut journal) = inner.journal.take() {
            journal.sync()?;
        }

        info!(queue = %inner.name, "Queue closed");
        Ok(())
    }

    /// Closes the queue and removes its on-disk state. Files are closed
    /// before anything is unlinked.
    pub fn destroy_journal(&self) -> Result<()> {
        let journal = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.resolve_all_waiters();
            inner.journal.take()
        };

        if let Some(journal) = journal {
            journal.erase()?;
        } else {
            // Closed earlier, or a memory-only queue; sweep by path.
            let path = journal_path(&self.root, &self.name);
            if let Err(error) = std::fs::remove_file(&path)
                && error.kind() != std::io::ErrorKind::NotFound
            {
                return Err(error.into());
            }
            remove_stale_rewrites(&self.root, &self.name)?;
        }

        info!(queue = %self.name, "Journal destroyed");
        Ok(())
    }

    /// True once the queue is empty, holds no reservations, and has been
    /// idle past its configured `max_queue_age`.
    #[must_use]
    pub fn is_ready_for_expiration(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed
            && inner.items.is_empty()
            && inner.reservations.is_empty()
            && inner
                .config
                .max_queue_age
                .is_some_and(|age| inner.last_activity.elapsed() >= age)
    }

    #[must_use]
    pub fn len(&self) -> usize { self.inner.lock().items.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Total payload bytes currently queued.
    #[must_use]
    pub fn bytes(&self) -> u64 { self.inner.lock().queue_bytes }

    #[must_use]
    pub fn journal_size(&self) -> u64 {
        self.inner.lock().journal.as_ref().map_or(0, Journal::size)
    }

    #[must_use]
    pub fn open_reservations(&self) -> usize { self.inner.lock().reservations.len() }

    #[must_use]
    pub fn waiter_count(&self) -> usize { self.inner.lock().waiters.len() }

    #[must_use]
    pub fn config(&self) -> QueueConfig { self.inner.lock().config.clone() }

    #[must_use]
    pub fn max_memory_bytes(&self) -> u64 { self.inner.lock().config.max_memory_bytes }

    /// Swaps the configuration in place on a live queue.
    pub fn set_config(&self, config: QueueConfig) {
        let mut inner = self.inner.lock();

        if let FlushMode::Batch { interval, .. } = config.flush_mode
            && !inner.flush_tick
            && !inner.closed
        {
            inner.flush_tick = true;
            arm_flush_tick(Arc::downgrade(&self.inner), inner.timer.clone(), interval);
        }
        inner.config = config;
    }

    /// Snapshot of counters and gauges as key/value strings.
    #[must_use]
    pub fn dump_stats(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        vec![
            ("items".into(), inner.items.len().to_string()),
            ("bytes".into(), inner.queue_bytes.to_string()),
            ("total_items".into(), inner.stats.total_items.to_string()),
            ("expired_items".into(), inner.stats.expired_items.to_string()),
            (
                "discarded_items".into(),
                inner.stats.discarded_items.to_string(),
            ),
            ("total_flushes".into(), inner.stats.total_flushes.to_string()),
            (
                "open_transactions".into(),
                inner.reservations.len().to_string(),
            ),
            ("waiters".into(), inner.waiters.len().to_string()),
            (
                "journal_size".into(),
                inner.journal.as_ref().map_or(0, Journal::size).to_string(),
            ),
        ]
    }

    pub fn reset_stats(&self) { self.inner.lock().stats = QueueStats::default(); }

    fn wait_op(&self, kind: WaiterKind, deadline: Option<Instant>) -> ItemFuture {
        let mut inner = self.inner.lock();

        if inner.closed {
            return ItemFuture::ready(None);
        }

        if let Err(error) = inner.discard_expired_heads(Utc::now(), usize::MAX) {
            error!(queue = %inner.name, error = ?error, "Journal failure during read");
            return ItemFuture::ready(None);
        }

        if !inner.items.is_empty() {
            return match kind {
                WaiterKind::Peek => ItemFuture::ready(inner.items.front().cloned()),
                WaiterKind::Remove { transactional } => match inner.take_head(transactional) {
                    Ok(item) => ItemFuture::ready(item),
                    Err(error) => {
                        error!(queue = %inner.name, error = ?error, "Journal failure during read");
                        ItemFuture::ready(None)
                    }
                },
            };
        }

        let Some(at) = deadline else {
            return ItemFuture::ready(None);
        };

        let (slot, future) = future::pending();
        let waiter_id = inner.next_waiter_id;
        inner.next_waiter_id += 1;

        // The callback only fulfills a waiter it actually removed, so a
        // racing add or shutdown cannot double-resolve the future.
        let weak = Arc::downgrade(&self.inner);
        let token = inner.timer.schedule_at(at, move || expire_waiter(&weak, waiter_id));

        inner.waiters.push_back(Waiter {
            id: waiter_id,
            kind,
            slot,
            token: Some(token),
        });
        future
    }
}

impl Drop for PersistentQueue {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            error!(queue = %self.name, error = ?error, "Close failed during drop");
        }
    }
}

fn expire_waiter(inner: &Weak<Mutex<Inner>>, waiter_id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let waiter = inner.lock().remove_waiter(waiter_id);
    if let Some(waiter) = waiter {
        waiter.slot.fulfill(None);
    }
}

/// Re-arming sync tick for batch flush mode. Stops rearming once the queue
/// closes or leaves batch mode.
fn arm_flush_tick(weak: Weak<Mutex<Inner>>, timer: TimerHandle, interval: Duration) {
    let rearm_timer = timer.clone();
    timer.schedule_after(interval, move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let next = {
            let mut guard = inner.lock();
            if guard.closed {
                guard.flush_tick = false;
                None
            } else {
                if let Some(journal) = guard.journal.as_mut()
                    && let Err(error) = journal.sync_if_dirty()
                {
                    error!(queue = %guard.name, error = ?error, "Periodic journal sync failed");
                }
                match guard.config.flush_mode {
                    FlushMode::Batch { interval, .. } => Some(interval),
                    _ => {
                        guard.flush_tick = false;
                        None
                    }
                }
            }
        };

        if let Some(interval) = next {
            arm_flush_tick(Arc::downgrade(&inner), rearm_timer, interval);
        }
    });
}

impl Inner {
    /// Hands queued entries to pending waiters, oldest first. Peek waiters
    /// see the head without consuming it; remove waiters consume.
    fn service_waiters(&mut self) -> Result<()> {
        loop {
            if self.waiters.is_empty() {
                return Ok(());
            }
            self.discard_expired_heads(Utc::now(), usize::MAX)?;
            if self.items.is_empty() {
                return Ok(());
            }
            let Some(waiter) = self.waiters.pop_front() else {
                return Ok(());
            };
            if let Some(token) = waiter.token {
                self.timer.cancel(token);
            }

            match waiter.kind {
                WaiterKind::Peek => waiter.slot.fulfill(self.items.front().cloned()),
                WaiterKind::Remove { transactional } => match self.take_head(transactional) {
                    Ok(item) => waiter.slot.fulfill(item),
                    Err(error) => {
                        waiter.slot.fulfill(None);
                        return Err(error);
                    }
                },
            }
        }
    }

    /// Pops and journals the head entry; transactional pops open a
    /// reservation.
    fn take_head(&mut self, transactional: bool) -> Result<Option<Item>> {
        let Some(mut item) = self.items.pop_front() else {
            return Ok(None);
        };
        self.queue_bytes -= item.payload.len() as u64;

        let mode = self.config.flush_mode.clone();
        if transactional {
            let xid = self.next_xid;
            self.next_xid += 1;
            item.xid = xid;
            if let Some(journal) = self.journal.as_mut() {
                journal.append_remove_tentative(xid)?;
                journal.after_write(&mode)?;
            }
            self.reservations.insert(xid, item.clone());
        } else if let Some(journal) = self.journal.as_mut() {
            journal.append_remove()?;
            journal.after_write(&mode)?;
        }

        self.last_activity = Instant::now();
        self.maybe_compact()?;
        Ok(Some(item))
    }

    /// Journals and drops an entry without touching counters; callers
    /// account for the reason (discard vs expiry).
    fn pop_oldest(&mut self) -> Result<Option<Item>> {
        let Some(item) = self.items.pop_front() else {
            return Ok(None);
        };
        self.queue_bytes -= item.payload.len() as u64;

        let mode = self.config.flush_mode.clone();
        if let Some(journal) = self.journal.as_mut() {
            journal.append_remove()?;
            journal.after_write(&mode)?;
        }
        Ok(Some(item))
    }

    fn discard_expired_heads(&mut self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let mut count = 0;
        while count < limit {
            if !self.items.front().is_some_and(|item| item.is_expired(now)) {
                break;
            }
            if self.pop_oldest()?.is_none() {
                break;
            }
            self.stats.expired_items += 1;
            count += 1;
        }

        if count > 0 {
            debug!(queue = %self.name, count, "Discarded expired entries");
            self.maybe_compact()?;
        }
        Ok(count)
    }

    /// Packs the journal when it has grown far past the live contents.
    fn maybe_compact(&mut self) -> Result<()> {
        let Some(journal) = self.journal.as_ref() else {
            return Ok(());
        };
        let size = journal.size();

        let empty_rewrite = self.items.is_empty() && size > self.config.max_journal_size;
        let overflow = size
            > self
                .config
                .max_journal_size
                .saturating_mul(self.config.max_journal_overflow)
            && self.queue_bytes < self.config.max_journal_size;

        if empty_rewrite || overflow {
            if let Some(journal) = self.journal.as_mut() {
                journal.rewrite(&self.reservations, self.items.iter())?;
            }
            info!(queue = %self.name, old_size = size, "Compacted journal");
        }
        Ok(())
    }

    fn resolve_all_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            if let Some(token) = waiter.token {
                self.timer.cancel(token);
            }
            waiter.slot.fulfill(None);
        }
    }

    fn remove_waiter(&mut self, waiter_id: u64) -> Option<Waiter> {
        let position = self.waiters.iter().position(|waiter| waiter.id == waiter_id)?;
        self.waiters.remove(position)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tempfile::TempDir;

    use super::*;
    use crate::Timer;

    struct Fixture {
        _temp_dir: TempDir,
        timer:     Timer,
        root:      PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().to_path_buf();
            Self {
                _temp_dir: temp_dir,
                timer: Timer::new().unwrap(),
                root,
            }
        }

        fn queue(&self, name: &str, config: QueueConfig) -> PersistentQueue {
            let queue = PersistentQueue::new(name, &self.root, config, self.timer.handle());
            queue.setup().unwrap();
            queue
        }
    }

    fn add(queue: &PersistentQueue, payload: &'static [u8]) -> bool {
        queue
            .add(Bytes::from_static(payload), None, Utc::now())
            .unwrap()
    }

    fn remove_now(queue: &PersistentQueue) -> Option<Item> {
        queue.wait_remove(None, false).wait()
    }

    #[test]
    fn test_fifo_order() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());

        assert!(add(&queue, b"one"));
        assert!(add(&queue, b"two"));
        assert!(add(&queue, b"three"));

        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"one");
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"two");
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"three");
        assert!(remove_now(&queue).is_none());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());
        add(&queue, b"only");

        let peeked = queue.wait_peek(None).wait().unwrap();
        assert_eq!(peeked.payload.as_ref(), b"only");
        assert_eq!(queue.len(), 1);

        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"only");
    }

    #[test]
    fn test_reservation_confirm_consumes() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());
        add(&queue, b"held");

        let item = queue.wait_remove(None, true).wait().unwrap();
        assert_ne!(item.xid, 0);
        assert!(remove_now(&queue).is_none());

        queue.confirm_remove(item.xid).unwrap();
        assert!(remove_now(&queue).is_none());
        assert_eq!(queue.open_reservations(), 0);
    }

    #[test]
    fn test_reservation_unremove_restores_head() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());
        add(&queue, b"first");
        add(&queue, b"second");

        let item = queue.wait_remove(None, true).wait().unwrap();
        assert_eq!(item.payload.as_ref(), b"first");

        queue.unremove(item.xid).unwrap();
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"first");
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"second");
    }

    #[test]
    fn test_blocked_remove_fulfilled_by_add() {
        let fixture = Fixture::new();
        let queue = Arc::new(fixture.queue("q", QueueConfig::default()));

        let future = queue.wait_remove(Some(Instant::now() + Duration::from_secs(5)), false);
        assert_eq!(queue.waiter_count(), 1);

        let writer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                add(&queue, b"late");
            })
        };

        assert_eq!(future.wait().unwrap().payload.as_ref(), b"late");
        writer.join().unwrap();
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn test_blocked_remove_expires_at_deadline() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());

        let started = Instant::now();
        let future = queue.wait_remove(Some(Instant::now() + Duration::from_millis(30)), false);
        assert!(future.wait().is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(queue.waiter_count(), 0);
    }

    #[test]
    fn test_close_resolves_waiters() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());

        let future = queue.wait_remove(Some(Instant::now() + Duration::from_secs(30)), false);
        queue.close().unwrap();

        assert!(future.wait().is_none());
        assert!(!queue.add(Bytes::from_static(b"x"), None, Utc::now()).unwrap());
    }

    #[test]
    fn test_contents_survive_reopen() {
        let fixture = Fixture::new();

        {
            let queue = fixture.queue("q", QueueConfig::default());
            add(&queue, b"persisted");
            queue.close().unwrap();
        }

        let queue = fixture.queue("q", QueueConfig::default());
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"persisted");
    }

    #[test]
    fn test_reservation_survives_reopen() {
        let fixture = Fixture::new();
        let xid;

        {
            let queue = fixture.queue("q", QueueConfig::default());
            add(&queue, b"held");
            xid = queue.wait_remove(None, true).wait().unwrap().xid;
            queue.close().unwrap();
        }

        let queue = fixture.queue("q", QueueConfig::default());
        assert_eq!(queue.open_reservations(), 1);
        assert!(remove_now(&queue).is_none());

        queue.unremove(xid).unwrap();
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"held");
    }

    #[test]
    fn test_expired_entry_discarded_on_read() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());

        let now = Utc::now();
        queue
            .add(
                Bytes::from_static(b"stale"),
                Some(now - chrono::Duration::seconds(1)),
                now - chrono::Duration::seconds(2),
            )
            .unwrap();

        assert!(remove_now(&queue).is_none());
        let stats: HashMap<_, _> = queue.dump_stats().into_iter().collect();
        assert_eq!(stats["expired_items"], "1");
    }

    #[test]
    fn test_discard_expired_sweep() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());

        let now = Utc::now();
        for _ in 0..3 {
            queue
                .add(
                    Bytes::from_static(b"stale"),
                    Some(now - chrono::Duration::seconds(1)),
                    now,
                )
                .unwrap();
        }
        add(&queue, b"live");

        assert_eq!(queue.discard_expired(None).unwrap(), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.discard_expired(None).unwrap(), 0);
    }

    #[test]
    fn test_default_expiry_from_max_age() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            max_age: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let queue = fixture.queue("q", config);

        add(&queue, b"short-lived");
        thread::sleep(Duration::from_millis(30));
        assert!(remove_now(&queue).is_none());
    }

    #[test]
    fn test_full_queue_refuses_add() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            max_items: 2,
            ..Default::default()
        };
        let queue = fixture.queue("q", config);

        assert!(add(&queue, b"a"));
        assert!(add(&queue, b"b"));
        assert!(!add(&queue, b"c"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_full_queue_discards_oldest_when_configured() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            max_items: 2,
            discard_old_when_full: true,
            ..Default::default()
        };
        let queue = fixture.queue("q", config);

        assert!(add(&queue, b"a"));
        assert!(add(&queue, b"b"));
        assert!(add(&queue, b"c"));

        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"b");
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"c");
    }

    #[test]
    fn test_flush_empties_queue_and_waiters() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());
        add(&queue, b"a");
        add(&queue, b"b");

        queue.flush().unwrap();
        assert_eq!(queue.len(), 0);
        assert!(remove_now(&queue).is_none());
    }

    #[test]
    fn test_journal_compaction_after_churn() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            max_journal_size: 256,
            ..Default::default()
        };
        let queue = fixture.queue("q", config);

        for _ in 0..50 {
            add(&queue, b"churned-payload-churned-payload");
            remove_now(&queue).unwrap();
        }

        assert!(queue.journal_size() <= 256);
    }

    #[test]
    fn test_destroy_journal_removes_file() {
        let fixture = Fixture::new();
        let queue = fixture.queue("q", QueueConfig::default());
        add(&queue, b"x");

        queue.destroy_journal().unwrap();
        assert!(!fixture.root.join("q").exists());
    }

    #[test]
    fn test_queue_age_expiration_readiness() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            max_queue_age: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let queue = fixture.queue("q", config);

        add(&queue, b"x");
        assert!(!queue.is_ready_for_expiration());

        remove_now(&queue).unwrap();
        assert!(!queue.is_ready_for_expiration());
        thread::sleep(Duration::from_millis(40));
        assert!(queue.is_ready_for_expiration());
    }

    #[test]
    fn test_memory_only_queue_leaves_no_journal() {
        let fixture = Fixture::new();
        let config = QueueConfig {
            keep_journal: false,
            ..Default::default()
        };
        let queue = fixture.queue("ephemeral", config);

        add(&queue, b"volatile");
        assert_eq!(remove_now(&queue).unwrap().payload.as_ref(), b"volatile");
        assert!(!fixture.root.join("ephemeral").exists());
    }
}
