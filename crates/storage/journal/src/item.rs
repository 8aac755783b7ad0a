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

//! The queue entry type handed to readers.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A single queue entry.
///
/// Returned by removes and peeks. While an entry is held by an open
/// reservation its `xid` is nonzero; readers pass that xid back to
/// confirm or un-remove the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Per-queue monotonic id assigned at add (or replay) time.
    pub id:       u64,
    /// Wall-clock time the entry was added.
    pub add_time: DateTime<Utc>,
    /// Optional expiration; expired entries are discarded on read or sweep.
    pub expiry:   Option<DateTime<Utc>>,
    /// The opaque payload.
    pub payload:  Bytes,
    /// Reservation id; zero unless the entry is held by an open reservation.
    pub xid:      u64,
}

impl Item {
    /// An entry is expired once its expiry time is no longer in the future.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn item(expiry: Option<DateTime<Utc>>) -> Item {
        Item {
            id: 1,
            add_time: Utc::now(),
            expiry,
            payload: Bytes::from_static(b"x"),
            xid: 0,
        }
    }

    #[test]
    fn test_no_expiry_never_expires() {
        assert!(!item(None).is_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let now = Utc::now();
        assert!(item(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(item(Some(now)).is_expired(now));
    }

    #[test]
    fn test_future_expiry_is_live() {
        let now = Utc::now();
        assert!(!item(Some(now + Duration::seconds(1))).is_expired(now));
    }
}
