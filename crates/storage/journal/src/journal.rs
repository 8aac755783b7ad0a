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

//! Append-only journal codec, replay, and pack-rewrite.
//!
//! Every mutation of a queue is one record in its journal. Records are
//! framed as:
//!
//! ```text
//! ┌─────────────┬──────────────────┬─────────────────┐
//! │ opcode (1B) │ body (variable)  │ crc32 (4B, LE)  │
//! └─────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! The CRC covers the opcode and body. Replay applies records in order to
//! rebuild the in-memory state; a truncated or corrupt tail (the common
//! crash artifact) is cut off at the last good record and logged, never
//! fatal.
//!
//! When a journal grows far past the live contents it is packed: the
//! current state is written to a `<name>~~<nanos>` temp file, synced, and
//! renamed over the live journal.

use std::{
    collections::{HashMap, VecDeque},
    fs::{File, OpenOptions},
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::{
    FlushMode, Item, Result,
    path::{journal_path, remove_stale_rewrites, rewrite_path},
};

/// Entry appended to the queue tail.
const OP_ADD: u8 = 1;
/// Head entry removed and committed.
const OP_REMOVE: u8 = 2;
/// Head entry moved into the open-reservation table under an xid.
const OP_REMOVE_TENTATIVE: u8 = 3;
/// Reservation discarded permanently.
const OP_CONFIRM_REMOVE: u8 = 4;
/// Reservation returned to the head of the queue.
const OP_UNREMOVE: u8 = 5;
/// All queued entries dropped (reservations survive).
const OP_FLUSH: u8 = 6;

const CRC_SIZE: usize = 4;
const ADD_HEADER_SIZE: usize = 8 + 8 + 4;

/// In-memory state rebuilt by [`Journal::replay`].
#[derive(Debug, Default)]
pub(crate) struct ReplayLog {
    pub items:        VecDeque<Item>,
    pub reservations: HashMap<u64, Item>,
    pub queue_bytes:  u64,
    /// Highest item id assigned during replay.
    pub last_item_id: u64,
    /// Highest xid seen during replay.
    pub last_xid:     u64,
}

/// One queue's append-only journal file.
pub(crate) struct Journal {
    root:          PathBuf,
    name:          String,
    path:          PathBuf,
    file:          File,
    size:          u64,
    pending_bytes: usize,
}

impl Journal {
    /// Open (or create) the journal for `name` under `root`.
    ///
    /// Stale rewrite temp files from an interrupted pack are removed first;
    /// the live journal is always the authoritative copy.
    pub fn open(root: PathBuf, name: &str) -> Result<Self> {
        remove_stale_rewrites(&root, name)?;

        let path = journal_path(&root, name);
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            root,
            name: name.to_string(),
            path,
            file,
            size,
            pending_bytes: 0,
        })
    }

    pub fn size(&self) -> u64 { self.size }

    pub fn is_dirty(&self) -> bool { self.pending_bytes > 0 }

    /// Replays the journal from the start, rebuilding queue state.
    ///
    /// Stops at the first unreadable record and truncates the file there so
    /// subsequent appends continue from a clean tail.
    pub fn replay(&mut self) -> Result<ReplayLog> {
        let file_len = self.size;
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut log = ReplayLog::default();
        let mut offset = 0u64;

        loop {
            match read_record(&mut reader, file_len - offset)? {
                RecordOutcome::Record(record, consumed) => {
                    apply_record(&mut log, record);
                    offset += consumed;
                }
                RecordOutcome::End => break,
                RecordOutcome::Corrupt => {
                    warn!(
                        path = ?self.path,
                        offset,
                        trailing = file_len - offset,
                        "Truncating corrupt journal tail"
                    );
                    self.file.set_len(offset)?;
                    self.size = offset;
                    break;
                }
            }
        }

        debug!(
            path = ?self.path,
            items = log.items.len(),
            reservations = log.reservations.len(),
            "Journal replayed"
        );
        Ok(log)
    }

    pub fn append_add(&mut self, item: &Item) -> Result<()> {
        self.append(&encode_add(item))
    }

    pub fn append_remove(&mut self) -> Result<()> { self.append(&encode_record(OP_REMOVE, &[])) }

    pub fn append_remove_tentative(&mut self, xid: u64) -> Result<()> {
        self.append(&encode_record(OP_REMOVE_TENTATIVE, &xid.to_le_bytes()))
    }

    pub fn append_confirm_remove(&mut self, xid: u64) -> Result<()> {
        self.append(&encode_record(OP_CONFIRM_REMOVE, &xid.to_le_bytes()))
    }

    pub fn append_unremove(&mut self, xid: u64) -> Result<()> {
        self.append(&encode_record(OP_UNREMOVE, &xid.to_le_bytes()))
    }

    pub fn append_flush(&mut self) -> Result<()> { self.append(&encode_record(OP_FLUSH, &[])) }

    /// fsync pending writes.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.pending_bytes = 0;
        Ok(())
    }

    pub fn sync_if_dirty(&mut self) -> Result<()> {
        if self.is_dirty() { self.sync() } else { Ok(()) }
    }

    /// Applies the write-side of a flush mode after an append.
    ///
    /// `Sync` syncs immediately; `Batch` syncs once the byte threshold
    /// trips (the interval is driven by the shared timer); `Async` leaves
    /// it to the OS.
    pub fn after_write(&mut self, mode: &FlushMode) -> Result<()> {
        match mode {
            FlushMode::Sync => self.sync(),
            FlushMode::Batch { bytes, .. } if self.pending_bytes >= *bytes => self.sync(),
            FlushMode::Batch { .. } | FlushMode::Async => Ok(()),
        }
    }

    /// Packs the journal down to the live state.
    ///
    /// Open reservations are written as `ADD` + `REMOVE_TENTATIVE` pairs so
    /// they survive a restart, followed by one `ADD` per queued entry. The
    /// rewrite goes to a temp file that replaces the live journal only
    /// after a sync.
    pub fn rewrite<'a, I>(&mut self, reservations: &HashMap<u64, Item>, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let old_size = self.size;
        let temp_path = rewrite_path(&self.root, &self.name, Utc::now());

        let mut temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut reserved: Vec<&Item> = reservations.values().collect();
        reserved.sort_by_key(|item| item.xid);
        for item in reserved {
            temp.write_all(&encode_add(item))?;
            temp.write_all(&encode_record(OP_REMOVE_TENTATIVE, &item.xid.to_le_bytes()))?;
        }
        for item in items {
            temp.write_all(&encode_add(item))?;
        }
        temp.sync_data()?;
        drop(temp);

        std::fs::rename(&temp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.size = self.file.metadata()?.len();
        self.pending_bytes = 0;

        debug!(path = ?self.path, old_size, new_size = self.size, "Journal rewritten");
        Ok(())
    }

    /// Removes all on-disk state for this journal.
    pub fn erase(self) -> Result<()> {
        let Self {
            root, name, path, file, ..
        } = self;
        drop(file);

        if let Err(error) = std::fs::remove_file(&path)
            && error.kind() != ErrorKind::NotFound
        {
            return Err(error.into());
        }
        remove_stale_rewrites(&root, &name)
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        self.file.write_all(record)?;
        self.size += record.len() as u64;
        self.pending_bytes += record.len();
        Ok(())
    }
}

#[derive(Debug)]
enum Record {
    Add {
        add_time: DateTime<Utc>,
        expiry:   Option<DateTime<Utc>>,
        payload:  Bytes,
    },
    Remove,
    RemoveTentative { xid: u64 },
    ConfirmRemove { xid: u64 },
    Unremove { xid: u64 },
    Flush,
}

enum RecordOutcome {
    /// A record and the number of bytes it consumed.
    Record(Record, u64),
    /// Clean end of journal.
    End,
    /// Unreadable data from here on; the caller truncates.
    Corrupt,
}

fn encode_record(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + body.len() + CRC_SIZE);
    buf.push(opcode);
    buf.extend_from_slice(body);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

fn encode_add(item: &Item) -> Vec<u8> {
    let mut body = Vec::with_capacity(ADD_HEADER_SIZE + item.payload.len());
    body.extend_from_slice(&item.add_time.timestamp_millis().to_le_bytes());
    let expiry_ms = item.expiry.map_or(0, |expiry| expiry.timestamp_millis());
    body.extend_from_slice(&expiry_ms.to_le_bytes());
    body.extend_from_slice(&(item.payload.len() as u32).to_le_bytes());
    body.extend_from_slice(&item.payload);
    encode_record(OP_ADD, &body)
}

fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> { Utc.timestamp_millis_opt(millis).single() }

fn read_record(reader: &mut impl Read, remaining: u64) -> Result<RecordOutcome> {
    let mut opcode = [0u8; 1];
    match reader.read_exact(&mut opcode) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(RecordOutcome::End),
        Err(error) => return Err(error.into()),
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&opcode);

    let (record, body_len) = match opcode[0] {
        OP_ADD => {
            let mut header = [0u8; ADD_HEADER_SIZE];
            if read_body(reader, &mut header)?.is_none() {
                return Ok(RecordOutcome::Corrupt);
            }
            hasher.update(&header);

            let add_millis = i64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
            let expiry_millis = i64::from_le_bytes(header[8..16].try_into().unwrap_or_default());
            let payload_len = u32::from_le_bytes(header[16..20].try_into().unwrap_or_default());

            // A length pointing past the end of the file is a torn write.
            let frame = 1 + ADD_HEADER_SIZE as u64 + u64::from(payload_len) + CRC_SIZE as u64;
            if frame > remaining {
                return Ok(RecordOutcome::Corrupt);
            }

            let mut payload = vec![0u8; payload_len as usize];
            if read_body(reader, &mut payload)?.is_none() {
                return Ok(RecordOutcome::Corrupt);
            }
            hasher.update(&payload);

            let Some(add_time) = millis_to_time(add_millis) else {
                return Ok(RecordOutcome::Corrupt);
            };
            let expiry = if expiry_millis == 0 {
                None
            } else {
                millis_to_time(expiry_millis)
            };

            let record = Record::Add {
                add_time,
                expiry,
                payload: Bytes::from(payload),
            };
            (record, ADD_HEADER_SIZE + payload_len as usize)
        }
        OP_REMOVE => (Record::Remove, 0),
        OP_REMOVE_TENTATIVE | OP_CONFIRM_REMOVE | OP_UNREMOVE => {
            let mut body = [0u8; 8];
            if read_body(reader, &mut body)?.is_none() {
                return Ok(RecordOutcome::Corrupt);
            }
            hasher.update(&body);
            let xid = u64::from_le_bytes(body);
            let record = match opcode[0] {
                OP_REMOVE_TENTATIVE => Record::RemoveTentative { xid },
                OP_CONFIRM_REMOVE => Record::ConfirmRemove { xid },
                _ => Record::Unremove { xid },
            };
            (record, 8)
        }
        OP_FLUSH => (Record::Flush, 0),
        _ => return Ok(RecordOutcome::Corrupt),
    };

    let mut crc_buf = [0u8; CRC_SIZE];
    if read_body(reader, &mut crc_buf)?.is_none() {
        return Ok(RecordOutcome::Corrupt);
    }
    if hasher.finalize() != u32::from_le_bytes(crc_buf) {
        return Ok(RecordOutcome::Corrupt);
    }

    let consumed = 1 + body_len as u64 + CRC_SIZE as u64;
    Ok(RecordOutcome::Record(record, consumed))
}

/// `Some(())` on a full read, `None` on EOF; real I/O errors propagate.
fn read_body(reader: &mut impl Read, buf: &mut [u8]) -> Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn apply_record(log: &mut ReplayLog, record: Record) {
    match record {
        Record::Add {
            add_time,
            expiry,
            payload,
        } => {
            log.last_item_id += 1;
            log.queue_bytes += payload.len() as u64;
            log.items.push_back(Item {
                id: log.last_item_id,
                add_time,
                expiry,
                payload,
                xid: 0,
            });
        }
        Record::Remove => {
            if let Some(item) = log.items.pop_front() {
                log.queue_bytes -= item.payload.len() as u64;
            }
        }
        Record::RemoveTentative { xid } => {
            if let Some(mut item) = log.items.pop_front() {
                log.queue_bytes -= item.payload.len() as u64;
                item.xid = xid;
                log.last_xid = log.last_xid.max(xid);
                log.reservations.insert(xid, item);
            }
        }
        Record::ConfirmRemove { xid } => {
            log.reservations.remove(&xid);
        }
        Record::Unremove { xid } => {
            if let Some(mut item) = log.reservations.remove(&xid) {
                item.xid = 0;
                log.queue_bytes += item.payload.len() as u64;
                log.items.push_front(item);
            }
        }
        Record::Flush => {
            log.items.clear();
            log.queue_bytes = 0;
        }
    }
}
