//! Applying one change: locate result → parse → insert or update.

use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::delta_log::ChangeIntent;
use crate::metrics;
use crate::storage::StorageError;

use super::types::{skip, CycleError, CycleReport};
use super::SyncOrchestrator;

impl SyncOrchestrator {
    /// Apply one change to the store, counting it in `report`.
    ///
    /// Everything except a storage backend failure is a per-record skip.
    pub(super) async fn apply_change(
        &self,
        intent: ChangeIntent,
        record_id: &str,
        located: Option<PathBuf>,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        let Some(path) = located else {
            info!(record_id, intent = intent.as_str(), "Record file not found in mirror, skipping");
            Self::skipped(report, intent, skip::NOT_LOCATED);
            return Ok(());
        };

        let record = match self.parser.parse(&path).await {
            Ok(record) => record,
            Err(e) if e.is_skip() => {
                debug!(record_id, error = %e, "Skipping record");
                Self::skipped(report, intent, e.reason());
                return Ok(());
            }
            Err(e) => {
                error!(record_id, path = %path.display(), error = %e, "Failed to parse record file");
                Self::skipped(report, intent, e.reason());
                return Ok(());
            }
        };

        if record.id != record_id {
            warn!(record_id, file_id = %record.id, path = %path.display(), "Record file carries a different id");
            Self::skipped(report, intent, skip::ID_MISMATCH);
            return Ok(());
        }

        let result = match intent {
            ChangeIntent::Insert => self.store.insert(&record).await,
            ChangeIntent::Update => self.store.update_by_id(record_id, &record).await,
        };

        match result {
            Ok(()) => {
                debug!(record_id, intent = intent.as_str(), "Applied change");
                match intent {
                    ChangeIntent::Insert => report.inserted += 1,
                    ChangeIntent::Update => report.updated += 1,
                }
                metrics::record_applied(intent.as_str());
                Ok(())
            }
            Err(StorageError::DuplicateKey(_)) => {
                info!(record_id, "Record already present, skipping insert");
                Self::skipped(report, intent, skip::DUPLICATE_KEY);
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                info!(record_id, "Record missing from store, skipping update");
                Self::skipped(report, intent, skip::NOT_FOUND);
                Ok(())
            }
            Err(e) => Err(CycleError::Storage(e)),
        }
    }

    fn skipped(report: &mut CycleReport, intent: ChangeIntent, reason: &'static str) {
        report.skip(reason);
        metrics::record_skip(intent.as_str(), reason);
    }
}
