// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-log reader.
//!
//! The upstream tree carries a `deltaLog.json`: one JSON array of fetch
//! entries, newest first, that the upstream publisher rewrites while we may
//! be reading it.
//!
//! ```json
//! [
//!   {
//!     "fetchTime": "2024-09-04T16:10:39.061Z",
//!     "numberOfChanges": 2,
//!     "new": [{"cveId": "CVE-2024-1234", "githubLink": "..."}],
//!     "updated": [{"cveId": "CVE-2023-0042", "githubLink": "..."}]
//!   },
//!   ...
//! ]
//! ```
//!
//! Entries are streamed off disk one at a time. The scan stops at the first
//! entry that is not strictly newer than the checkpoint, so a steady-state
//! cycle only touches the head of the file. A tail cut short by a concurrent
//! writer ends the scan with the complete entries read so far.

use serde::de::{self, Deserializer as _, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::timestamp::{parse_timestamp, Timestamp};

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Change log not found at {0}")]
    NotFound(PathBuf),
    #[error("Change log {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("Change log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the orchestrator should do with an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeIntent {
    /// Listed under `new`: insert, duplicate key means already applied
    Insert,
    /// Listed under `updated`: update by id, missing row means stale entry
    Update,
}

impl ChangeIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeIntent::Insert => "insert",
            ChangeIntent::Update => "update",
        }
    }
}

/// One fetch announcement from the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub fetch_time: Timestamp,
    pub new_ids: Vec<String>,
    pub updated_ids: Vec<String>,
}

impl ChangeLogEntry {
    /// Identifiers in apply order: every `new` id, then every `updated` id,
    /// each list in the order the log gives it.
    pub fn changes(&self) -> impl Iterator<Item = (ChangeIntent, &str)> + '_ {
        self.new_ids
            .iter()
            .map(|id| (ChangeIntent::Insert, id.as_str()))
            .chain(self.updated_ids.iter().map(|id| (ChangeIntent::Update, id.as_str())))
    }

    #[must_use]
    pub fn change_count(&self) -> usize {
        self.new_ids.len() + self.updated_ids.len()
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "fetchTime")]
    fetch_time: String,
    #[serde(default)]
    new: Vec<RawChange>,
    #[serde(default)]
    updated: Vec<RawChange>,
}

#[derive(Deserialize)]
struct RawChange {
    #[serde(rename = "cveId")]
    cve_id: String,
}

/// How a scan ended, besides the entries it produced.
#[derive(Default)]
struct ScanState {
    checkpoint: Option<Timestamp>,
    limit: Option<usize>,
    entries: Vec<ChangeLogEntry>,
    opened: bool,
    stopped_early: bool,
}

struct ScanVisitor<'a> {
    state: &'a mut ScanState,
}

impl<'de> Visitor<'de> for ScanVisitor<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of change-log entries")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        self.state.opened = true;
        while let Some(raw) = seq.next_element::<RawEntry>()? {
            let fetch_time = parse_timestamp(&raw.fetch_time).map_err(|e| {
                de::Error::custom(format!("bad fetchTime '{}': {}", raw.fetch_time, e))
            })?;

            if self.state.checkpoint.is_some_and(|cp| fetch_time <= cp) {
                self.state.stopped_early = true;
                return Ok(());
            }

            self.state.entries.push(ChangeLogEntry {
                fetch_time,
                new_ids: raw.new.into_iter().map(|c| c.cve_id).collect(),
                updated_ids: raw.updated.into_iter().map(|c| c.cve_id).collect(),
            });

            if self.state.limit.is_some_and(|limit| self.state.entries.len() >= limit) {
                self.state.stopped_early = true;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Reads the change log at a fixed path.
#[derive(Debug, Clone)]
pub struct DeltaLogReader {
    path: PathBuf,
}

impl DeltaLogReader {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries strictly newer than `checkpoint` (all entries when `None`),
    /// sorted by fetch time ascending.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn entries_since(&self, checkpoint: Option<Timestamp>) -> Result<Vec<ChangeLogEntry>, LogError> {
        let state = ScanState { checkpoint, ..Default::default() };
        let mut entries = self.scan(state).await?;
        entries.sort_by_key(|e| e.fetch_time);
        debug!(count = entries.len(), "Change log entries past checkpoint");
        Ok(entries)
    }

    /// Fetch time of the head (newest) entry, `None` for an empty log.
    pub async fn latest_fetch_time(&self) -> Result<Option<Timestamp>, LogError> {
        let state = ScanState { limit: Some(1), ..Default::default() };
        let entries = self.scan(state).await?;
        Ok(entries.first().map(|e| e.fetch_time))
    }

    async fn scan(&self, state: ScanState) -> Result<Vec<ChangeLogEntry>, LogError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || scan_file(&path, state))
            .await
            .map_err(|e| LogError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }
}

fn scan_file(path: &Path, mut state: ScanState) -> Result<Vec<ChangeLogEntry>, LogError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LogError::NotFound(path.to_path_buf()));
        }
        Err(source) => return Err(LogError::Io { path: path.to_path_buf(), source }),
    };

    let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
    let result = (&mut deserializer).deserialize_seq(ScanVisitor { state: &mut state });

    if state.stopped_early {
        // The rest of the array is deliberately left unread.
        return Ok(state.entries);
    }

    match result.and_then(|()| deserializer.end()) {
        Ok(()) => Ok(state.entries),
        Err(e) if e.is_eof() && state.opened => {
            warn!(
                path = %path.display(),
                kept = state.entries.len(),
                line = e.line(),
                "Change log ends mid-entry (concurrent write?), using complete entries only"
            );
            Ok(state.entries)
        }
        Err(e) if e.is_io() => Err(LogError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        }),
        Err(e) => Err(LogError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}
