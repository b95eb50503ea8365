// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full import of the record tree into the store.
//!
//! Used to seed an empty catalog (bootstrap) and by the `import` subcommand.
//! A blocking walker parses files and hands batches of `batch_size` records
//! over a bounded channel; the async side upserts them one batch at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::metrics;
use crate::parser::RecordParser;
use crate::record::NormalizedRecord;
use crate::storage::{RecordStore, StorageError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Record root {0} does not exist")]
    RootMissing(PathBuf),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Import interrupted by shutdown")]
    Interrupted,
    #[error("Import walker failed: {0}")]
    Walker(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Candidate record files found in the tree
    pub files_seen: usize,
    pub imported: usize,
    pub batches: usize,
    /// Batches whose read-back did not find every id
    pub unverified_batches: usize,
    /// Skipped files by reason
    pub skipped: BTreeMap<&'static str, usize>,
}

impl ImportReport {
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

enum Next {
    Batch(Option<Vec<NormalizedRecord>>),
    Signal(bool),
}

/// Tallies kept by the walker thread.
#[derive(Default)]
struct WalkTally {
    files_seen: usize,
    skipped: BTreeMap<&'static str, usize>,
}

pub struct TreeImporter {
    root: PathBuf,
    parser: RecordParser,
    id_prefix: String,
    store: Arc<dyn RecordStore>,
    batch_size: usize,
}

impl TreeImporter {
    pub fn new(
        root: impl AsRef<Path>,
        id_prefix: impl Into<String>,
        store: Arc<dyn RecordStore>,
        batch_size: usize,
    ) -> Self {
        let id_prefix = id_prefix.into();
        Self {
            root: root.as_ref().to_path_buf(),
            parser: RecordParser::new(id_prefix.clone()),
            id_prefix,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Walk the tree and upsert every published record.
    ///
    /// Stops between batches when `shutdown` flips to true.
    #[tracing::instrument(skip(self, shutdown), fields(root = %self.root.display()))]
    pub async fn run(&self, mut shutdown: Option<watch::Receiver<bool>>) -> Result<ImportReport, ImportError> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(ImportError::RootMissing(self.root.clone()));
        }

        let (tx, mut rx) = mpsc::channel::<Vec<NormalizedRecord>>(2);
        let root = self.root.clone();
        let parser = self.parser.clone();
        let file_prefix = format!("{}-", self.id_prefix);
        let batch_size = self.batch_size;

        let walker = tokio::task::spawn_blocking(move || walk_and_parse(&root, &parser, &file_prefix, batch_size, tx));

        let mut report = ImportReport::default();
        let mut interrupted = false;

        loop {
            let next = match shutdown.as_mut() {
                Some(signal) => {
                    if *signal.borrow() {
                        interrupted = true;
                        break;
                    }
                    tokio::select! {
                        batch = rx.recv() => Next::Batch(batch),
                        changed = signal.changed() => Next::Signal(changed.is_ok()),
                    }
                }
                None => Next::Batch(rx.recv().await),
            };
            let batch = match next {
                Next::Batch(Some(batch)) => batch,
                Next::Batch(None) => break,
                Next::Signal(true) => continue,
                Next::Signal(false) => {
                    // Sender gone, nobody can ask us to stop anymore
                    shutdown = None;
                    continue;
                }
            };

            let result = self.store.upsert_batch(&batch).await?;
            report.batches += 1;
            report.imported += result.written;
            if !result.verified {
                report.unverified_batches += 1;
            }
            debug!(batch = report.batches, written = result.written, "Imported batch");
        }

        // Dropping the receiver unblocks a walker waiting on a full channel
        drop(rx);
        let tally = walker.await.map_err(|e| ImportError::Walker(e.to_string()))?;
        report.files_seen = tally.files_seen;
        report.skipped = tally.skipped;

        metrics::record_import(report.imported, report.skipped_total());

        if interrupted {
            warn!(imported = report.imported, "Import stopped by shutdown");
            return Err(ImportError::Interrupted);
        }

        info!(
            files = report.files_seen,
            imported = report.imported,
            skipped = report.skipped_total(),
            batches = report.batches,
            "Full import complete"
        );
        Ok(report)
    }
}

fn walk_and_parse(
    root: &Path,
    parser: &RecordParser,
    file_prefix: &str,
    batch_size: usize,
    tx: mpsc::Sender<Vec<NormalizedRecord>>,
) -> WalkTally {
    let mut tally = WalkTally::default();
    let mut batch = Vec::with_capacity(batch_size);

    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable tree entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(file_prefix) && name.ends_with(".json"))
        });

    for entry in files {
        tally.files_seen += 1;
        match parser.parse_blocking(entry.path()) {
            Ok(record) => batch.push(record),
            Err(e) if e.is_skip() => {
                debug!(path = %entry.path().display(), error = %e, "Skipping record");
                *tally.skipped.entry(e.reason()).or_default() += 1;
            }
            Err(e) => {
                error!(path = %entry.path().display(), error = %e, "Failed to parse record file");
                *tally.skipped.entry(e.reason()).or_default() += 1;
            }
        }

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(full).is_err() {
                return tally;
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(batch);
    }
    tally
}
