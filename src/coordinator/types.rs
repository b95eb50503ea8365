//! Public types for the sync orchestrator.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::delta_log::LogError;
use crate::import::{ImportError, ImportReport};
use crate::locator::LocateError;
use crate::mirror::MirrorError;
use crate::storage::StorageError;
use crate::timestamp::Timestamp;

/// Cycle state machine.
///
/// ```text
/// Idle → Mirroring → Diffing → Applying → Checkpointing → Idle
///            ↓          ↓          ↓             ↓
///          Failed ←─────┴──────────┴─────────────┘
/// ```
///
/// Use [`super::SyncOrchestrator::state()`] for the current value or
/// [`super::SyncOrchestrator::state_receiver()`] to watch transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Waiting for the next tick
    Idle,
    /// Refreshing the local mirror
    Mirroring,
    /// Reading the checkpoint and the change log
    Diffing,
    /// Locating, parsing and writing changed records
    Applying,
    /// Persisting the new checkpoint
    Checkpointing,
    /// Last cycle aborted; the next tick retries
    Failed,
}

impl CycleState {
    /// Stable numeric code for the state gauge.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Mirroring => 1,
            Self::Diffing => 2,
            Self::Applying => 3,
            Self::Checkpointing => 4,
            Self::Failed => 5,
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Mirroring => write!(f, "Mirroring"),
            Self::Diffing => write!(f, "Diffing"),
            Self::Applying => write!(f, "Applying"),
            Self::Checkpointing => write!(f, "Checkpointing"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Skip reasons that do not come from the parser.
pub mod skip {
    pub const NOT_LOCATED: &str = "not_located";
    pub const DUPLICATE_KEY: &str = "duplicate_key";
    pub const NOT_FOUND: &str = "not_found";
    pub const ID_MISMATCH: &str = "id_mismatch";
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle_id: String,
    /// Change-log entries processed
    pub entries: usize,
    /// Changes applied from the change log
    pub inserted: usize,
    pub updated: usize,
    /// Skipped changes by reason
    pub skipped: BTreeMap<&'static str, usize>,
    /// Checkpoint after the cycle (unchanged if there was nothing to do)
    pub checkpoint: Option<Timestamp>,
    /// Set when this cycle seeded an empty catalog from the full tree.
    /// Those rows are counted here only, not in `inserted`.
    pub import: Option<ImportReport>,
}

impl CycleReport {
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.inserted + self.updated
    }

    pub(super) fn skip(&mut self, reason: &'static str) {
        *self.skipped.entry(reason).or_default() += 1;
    }
}

/// Why a cycle did not complete. The checkpoint is never advanced on error.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Mirror refresh failed: {0}")]
    Mirror(#[from] MirrorError),
    #[error("Change log unusable: {0}")]
    Log(#[from] LogError),
    #[error("Checkpoint unusable: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Record lookup failed: {0}")]
    Locate(#[from] LocateError),
    #[error("Record store failed: {0}")]
    Storage(#[from] StorageError),
    #[error("Bootstrap import failed: {0}")]
    Import(#[from] ImportError),
    #[error("A sync cycle is already running")]
    AlreadyRunning,
    #[error("Cycle interrupted by shutdown after {applied} applied changes")]
    Interrupted { applied: usize },
}

impl CycleError {
    /// Metric label for the cycle outcome.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::Interrupted { .. } => "interrupted",
            _ => "failed",
        }
    }
}
