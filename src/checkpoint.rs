// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence of the last fully processed change-log fetch time.
//!
//! The file holds a single JSON document:
//!
//! ```json
//! {"lastFetchTime": "2024-09-04T16:10:39.061+00:00"}
//! ```
//!
//! Writes go to a sibling `.tmp` file that is then renamed over the
//! checkpoint, so readers see either the old or the new value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::timestamp::{format_timestamp, parse_timestamp, Timestamp};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checkpoint file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` until the first successful cycle.
    async fn read(&self) -> Result<Option<Timestamp>, CheckpointError>;
    async fn write(&self, fetch_time: Timestamp) -> Result<(), CheckpointError>;
}

#[derive(Serialize, Deserialize)]
struct CheckpointDocument {
    #[serde(rename = "lastFetchTime")]
    last_fetch_time: String,
}

pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io { path: self.path.clone(), source }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self) -> Result<Option<Timestamp>, CheckpointError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint file yet");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let doc: CheckpointDocument = serde_json::from_str(&content).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let ts = parse_timestamp(&doc.last_fetch_time).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            message: format!("bad lastFetchTime '{}': {}", doc.last_fetch_time, e),
        })?;
        Ok(Some(ts))
    }

    async fn write(&self, fetch_time: Timestamp) -> Result<(), CheckpointError> {
        let doc = CheckpointDocument { last_fetch_time: format_timestamp(&fetch_time) };
        let body = serde_json::to_string(&doc).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, body.as_bytes()).await.map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io_error(e))?;

        info!(path = %self.path.display(), last_fetch_time = %doc.last_fetch_time, "Checkpoint advanced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        let ts = parse_timestamp("2024-09-04T16:10:39.061Z").unwrap();

        store.write(ts).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(ts));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, r#"{"lastFetchTime":"2024-09-04T16:10:39.061+00:00"}"#);
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state").join("checkpoint.json"));

        store.write(parse_timestamp("2024-01-01T00:00:00Z").unwrap()).await.unwrap();
        store.write(parse_timestamp("2024-02-01T00:00:00Z").unwrap()).await.unwrap();

        assert_eq!(
            store.read().await.unwrap(),
            Some(parse_timestamp("2024-02-01T00:00:00Z").unwrap())
        );
    }

    #[tokio::test]
    async fn test_reads_z_suffixed_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"lastFetchTime": "2024-09-01T00:00:00Z"}"#).unwrap();

        let store = FileCheckpointStore::new(&path);
        assert_eq!(
            store.read().await.unwrap(),
            Some(parse_timestamp("2024-09-01T00:00:00+00:00").unwrap())
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        std::fs::write(&path, "{not json").unwrap();
        let store = FileCheckpointStore::new(&path);
        assert!(matches!(store.read().await, Err(CheckpointError::Corrupt { .. })));

        std::fs::write(&path, r#"{"lastFetchTime": "soon"}"#).unwrap();
        assert!(matches!(store.read().await, Err(CheckpointError::Corrupt { .. })));
    }
}
