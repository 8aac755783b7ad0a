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

//! Journal file naming and root-directory scanning.
//!
//! Each queue keeps one journal file at `root/<name>`. Rewrites land in a
//! sibling temp file `root/<name>~~<nanos>` that is renamed over the live
//! journal once synced; the `~~` marker is why `~` is forbidden in queue
//! names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::Result;

/// Separator between a queue name and a rewrite temp suffix.
pub const REWRITE_MARKER: &str = "~~";

/// Returns the live journal path for a queue: `root/<name>`.
pub fn journal_path<P: AsRef<Path>>(root: P, name: &str) -> PathBuf { root.as_ref().join(name) }

/// Returns a rewrite temp path for a queue: `root/<name>~~<nanos>`.
pub fn rewrite_path<P: AsRef<Path>>(root: P, name: &str, time: DateTime<Utc>) -> PathBuf {
    let nanos = time.timestamp_nanos_opt().unwrap_or_default();
    root.as_ref().join(format!("{name}{REWRITE_MARKER}{nanos}"))
}

/// Scans the root directory for queue names with recoverable on-disk state.
///
/// Every plain file is a journal named after its queue. Rewrite temp files
/// and dotfiles are skipped.
pub fn scan_queue_names<P: AsRef<Path>>(root: P) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in std::fs::read_dir(root.as_ref())? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || name.contains(REWRITE_MARKER) {
            continue;
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// Removes any leftover rewrite temp files for a queue.
pub fn remove_stale_rewrites<P: AsRef<Path>>(root: P, name: &str) -> Result<()> {
    let prefix = format!("{name}{REWRITE_MARKER}");

    for entry in std::fs::read_dir(root.as_ref())? {
        let entry = entry?;
        if let Ok(file_name) = entry.file_name().into_string()
            && file_name.starts_with(&prefix)
        {
            std::fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}
