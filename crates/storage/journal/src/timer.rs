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

//! Shared deadline timer.
//!
//! One timer thread serves a whole queue collection: read-deadline
//! expirations and batch-flush ticks are callbacks scheduled against it.
//! The thread keeps a min-heap of deadlines and blocks on its command
//! channel until the nearest one is due.
//!
//! Callbacks run on the timer thread and must not block for long; the
//! queue callbacks only take a queue lock briefly.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use crate::{Result, error::InternalSnafu};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule { id: u64, at: Instant, task: Task },
    Cancel { id: u64 },
    Shutdown,
}

/// Token identifying a scheduled callback, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

/// Cheap cloneable scheduling handle.
#[derive(Clone)]
pub struct TimerHandle {
    tx:      Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl TimerHandle {
    /// Schedules `task` to run at `at`. Sends are best-effort: after
    /// shutdown the task is silently dropped.
    pub fn schedule_at(&self, at: Instant, task: impl FnOnce() + Send + 'static) -> TimerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(Command::Schedule {
            id,
            at,
            task: Box::new(task),
        });
        TimerToken(id)
    }

    /// Schedules `task` to run after `delay`.
    pub fn schedule_after(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> TimerToken {
        self.schedule_at(Instant::now() + delay, task)
    }

    /// Drops a scheduled callback. A no-op when the callback already ran.
    pub fn cancel(&self, token: TimerToken) {
        let _ = self.tx.send(Command::Cancel { id: token.0 });
    }
}

/// Owner of the timer thread.
pub struct Timer {
    tx:      Sender<Command>,
    next_id: Arc<AtomicU64>,
    worker:  Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Spawns the timer thread.
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();

        let worker = thread::Builder::new()
            .name("hopper-timer".into())
            .spawn(move || run(&rx))?;

        Ok(Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            worker: Mutex::new(Some(worker)),
        })
    }

    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            tx:      self.tx.clone(),
            next_id: self.next_id.clone(),
        }
    }

    /// Stops the timer thread, dropping callbacks that have not fired.
    /// Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        let _ = self.tx.send(Command::Shutdown);
        worker.join().map_err(|_| {
            InternalSnafu {
                message: "Timer thread panicked".to_string(),
            }
            .build()
        })
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct Scheduled {
    at:   Instant,
    id:   u64,
    task: Task,
}

// Min-heap on deadline; BinaryHeap is a max-heap, so the ordering is
// reversed.
impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool { self.at == other.at && self.id == other.id }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> { Some(self.cmp(other)) }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at).then(other.id.cmp(&self.id))
    }
}

fn run(rx: &Receiver<Command>) {
    let mut heap: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut cancelled: HashSet<u64> = HashSet::new();

    loop {
        let command = match heap.peek() {
            Some(next) => {
                let timeout = next.at.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            Some(Command::Schedule { id, at, task }) => heap.push(Scheduled { id, at, task }),
            Some(Command::Cancel { id }) => {
                cancelled.insert(id);
            }
            Some(Command::Shutdown) => return,
            None => {}
        }

        let now = Instant::now();
        while let Some(next) = heap.peek() {
            if next.at > now {
                break;
            }
            if let Some(due) = heap.pop() {
                if !cancelled.remove(&due.id) {
                    (due.task)();
                }
            }
        }
    }
}
