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

//! Queue name parsing and validation.
//!
//! Names double as journal file names, so `.`, `/`, and `~` are forbidden.
//! A single `+` marks a fanout child: `master+tag` receives every write
//! addressed to `master`. An empty tag is allowed and denotes the master's
//! own reader slot.

use snafu::ensure;

use crate::{Result, error::IllegalNameSnafu};

/// The character separating a fanout master from its child tag.
pub const FANOUT_SEPARATOR: char = '+';

/// Characters that would collide with journal file naming.
const FORBIDDEN: [char; 3] = ['.', '/', '~'];

/// A validated client-supplied queue name.
///
/// Parsing is pure; whether the name refers to an alias or a live queue is
/// decided by the collection against its registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName<'a> {
    Plain(&'a str),
    FanoutChild { master: &'a str, tag: &'a str },
}

impl<'a> QueueName<'a> {
    /// Parses and validates a raw name.
    ///
    /// Rejects empty names, forbidden characters anywhere, more than one
    /// `+`, and an empty master segment.
    pub fn parse(raw: &'a str) -> Result<Self> {
        ensure!(
            !raw.is_empty() && !raw.chars().any(|c| FORBIDDEN.contains(&c)),
            IllegalNameSnafu { name: raw }
        );

        match raw.split_once(FANOUT_SEPARATOR) {
            Some((master, tag)) => {
                ensure!(
                    !master.is_empty() && !tag.contains(FANOUT_SEPARATOR),
                    IllegalNameSnafu { name: raw }
                );
                Ok(Self::FanoutChild { master, tag })
            }
            None => Ok(Self::Plain(raw)),
        }
    }

    /// The master segment: the whole name for plain names.
    #[must_use]
    pub fn master(&self) -> &'a str {
        match self {
            Self::Plain(name) => name,
            Self::FanoutChild { master, .. } => master,
        }
    }
}

/// Returns the master part of a composite name, if the name has one.
#[must_use]
pub fn master_of(name: &str) -> Option<&str> {
    name.split_once(FANOUT_SEPARATOR).map(|(master, _)| master)
}
