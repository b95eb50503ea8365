// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record file lookup in the year/bucket partitioned tree.
//!
//! ```text
//! <root>/
//!   2024/
//!     0xxx/CVE-2024-0001.json
//!     1xxx/CVE-2024-1234.json
//!     21xxx/CVE-2024-21345.json
//! ```
//!
//! Only the bucket directory derived from the identifier is searched: the
//! bucket itself plus each subdirectory actually present in it, one lookup
//! task per candidate. Bucket listings and file checks share one semaphore,
//! so at most `concurrency` of them touch the filesystem at a time.
//!
//! A missing file or directory is a miss (`Ok(None)`). Any other I/O error
//! is returned, since the file may well exist.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::record::CveId;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Failed to search {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Lookup task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct RecordLocator {
    root: PathBuf,
    id_prefix: String,
    bucket_width: u64,
    permits: Arc<Semaphore>,
}

type Candidate = Result<(usize, Option<PathBuf>), LocateError>;

impl RecordLocator {
    pub fn new(root: impl AsRef<Path>, id_prefix: impl Into<String>, bucket_width: u64, concurrency: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            id_prefix: id_prefix.into(),
            bucket_width: bucket_width.max(1),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bucket directory for an identifier, whether or not it exists.
    #[must_use]
    pub fn bucket_dir(&self, id: &CveId) -> PathBuf {
        self.root.join(id.year.to_string()).join(id.bucket(self.bucket_width))
    }

    /// Find the backing file for `record_id`.
    ///
    /// `Ok(None)` is a normal outcome (unknown or withdrawn record).
    pub async fn locate(&self, record_id: &str) -> Result<Option<PathBuf>, LocateError> {
        let Some(id) = CveId::parse(record_id, &self.id_prefix) else {
            debug!(record_id, "Not a catalog identifier, cannot locate");
            return Ok(None);
        };

        let bucket = self.bucket_dir(&id);
        let candidates = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| LocateError::Task(e.to_string()))?;
            match candidate_dirs(&bucket).await {
                Ok(candidates) => candidates,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(record_id, bucket = %bucket.display(), "Bucket directory missing");
                    return Ok(None);
                }
                Err(source) => return Err(LocateError::Io { path: bucket, source }),
            }
        };

        let file_name = id.file_name();
        let mut join_set: JoinSet<Candidate> = JoinSet::new();
        for (rank, dir) in candidates.into_iter().enumerate() {
            let permits = self.permits.clone();
            let path = dir.join(&file_name);
            join_set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| LocateError::Task(e.to_string()))?;
                match tokio::fs::metadata(&path).await {
                    Ok(meta) => Ok((rank, meta.is_file().then_some(path))),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok((rank, None)),
                    Err(source) => Err(LocateError::Io { path, source }),
                }
            });
        }

        // Lowest-ranked hit wins so the answer doesn't depend on task timing
        let mut best: Option<(usize, PathBuf)> = None;
        while let Some(joined) = join_set.join_next().await {
            let (rank, hit) = joined.map_err(|e| LocateError::Task(e.to_string()))??;
            if let Some(path) = hit {
                if best.as_ref().map_or(true, |(best_rank, _)| rank < *best_rank) {
                    best = Some((rank, path));
                }
            }
        }
        Ok(best.map(|(_, path)| path))
    }

    /// Locate many identifiers concurrently; results are in input order.
    ///
    /// The first lookup error aborts the remaining lookups.
    pub async fn locate_all(&self, record_ids: &[&str]) -> Result<Vec<Option<PathBuf>>, LocateError> {
        let mut results: Vec<Option<PathBuf>> = vec![None; record_ids.len()];
        let mut join_set: JoinSet<Candidate> = JoinSet::new();

        for (i, record_id) in record_ids.iter().enumerate() {
            let locator = self.clone();
            let record_id = record_id.to_string();
            join_set.spawn(async move { Ok::<_, LocateError>((i, locator.locate(&record_id).await?)) });
        }

        while let Some(joined) = join_set.join_next().await {
            let (i, path) = joined.map_err(|e| LocateError::Task(e.to_string()))??;
            results[i] = path;
        }
        Ok(results)
    }
}

/// The bucket directory followed by its subdirectories, sorted by name.
async fn candidate_dirs(bucket: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    let mut entries = tokio::fs::read_dir(bucket).await?;
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_type().await {
            Ok(kind) if kind.is_dir() => subdirs.push(entry.path()),
            Ok(_) => {}
            // Removed while listing
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    subdirs.sort();

    let mut candidates = Vec::with_capacity(subdirs.len() + 1);
    candidates.push(bucket.to_path_buf());
    candidates.extend(subdirs);
    Ok(candidates)
}
