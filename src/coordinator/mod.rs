// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] ties the components together:
//! - mirror refresh of the upstream record tree
//! - checkpoint read and change-log diff
//! - locate, parse and write of every changed record
//! - checkpoint advance once the whole delta has been attempted
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cve_sync::{CycleState, InMemoryRecordStore, SyncConfig, SyncOrchestrator};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::default();
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! let store = Arc::new(InMemoryRecordStore::new());
//! let orchestrator = SyncOrchestrator::from_config(config, store, shutdown_rx);
//!
//! assert_eq!(orchestrator.state(), CycleState::Idle);
//! // orchestrator.run().await;
//! # }
//! ```

mod apply;
mod lifecycle;
mod types;

pub use types::{skip, CycleError, CycleReport, CycleState};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::SyncConfig;
use crate::delta_log::DeltaLogReader;
use crate::locator::RecordLocator;
use crate::mirror::{GitMirror, Mirror, NoopMirror};
use crate::parser::RecordParser;
use crate::storage::RecordStore;

/// Drives sync cycles against one record store.
///
/// `Send + Sync`; share it behind an `Arc` to run the loop and inspect
/// state from elsewhere.
pub struct SyncOrchestrator {
    pub(super) config: SyncConfig,
    pub(super) mirror: Arc<dyn Mirror>,
    pub(super) checkpoints: Arc<dyn CheckpointStore>,
    pub(super) log: DeltaLogReader,
    pub(super) locator: RecordLocator,
    pub(super) parser: RecordParser,
    pub(super) store: Arc<dyn RecordStore>,

    /// Cycle state (broadcast to watchers)
    pub(super) state: watch::Sender<CycleState>,
    pub(super) state_rx: watch::Receiver<CycleState>,

    /// Single-flight guard for `run_cycle`
    pub(super) running: AtomicBool,

    pub(super) last_report: RwLock<Option<CycleReport>>,

    /// Flips to `true` when the process is shutting down
    pub(super) shutdown: watch::Receiver<bool>,
}

impl SyncOrchestrator {
    /// Build with explicit collaborators. Log path, locator and parser
    /// settings come from `config`.
    pub fn new(
        config: SyncConfig,
        mirror: Arc<dyn Mirror>,
        checkpoints: Arc<dyn CheckpointStore>,
        store: Arc<dyn RecordStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(CycleState::Idle);

        Self {
            log: DeltaLogReader::new(config.delta_log_path()),
            locator: RecordLocator::new(
                config.record_root(),
                config.id_prefix.clone(),
                config.bucket_width,
                config.locate_concurrency,
            ),
            parser: RecordParser::new(config.id_prefix.clone()),
            config,
            mirror,
            checkpoints,
            store,
            state: state_tx,
            state_rx,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
            shutdown,
        }
    }

    /// Build with a git mirror (or none when `mirror_enabled` is off) and a
    /// file checkpoint at `checkpoint_path`.
    pub fn from_config(config: SyncConfig, store: Arc<dyn RecordStore>, shutdown: watch::Receiver<bool>) -> Self {
        let mirror: Arc<dyn Mirror> = if config.mirror_enabled {
            Arc::new(GitMirror::new(config.git_bin.clone()))
        } else {
            Arc::new(NoopMirror)
        };
        let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint_path));
        Self::new(config, mirror, checkpoints, store, shutdown)
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        *self.state_rx.borrow()
    }

    /// Receiver for watching state transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CycleState> {
        self.state_rx.clone()
    }

    /// Whether a cycle is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Report of the most recent successful cycle.
    #[must_use]
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub(super) fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(super) fn set_state(&self, state: CycleState) {
        let _ = self.state.send(state);
        crate::metrics::set_cycle_state(state.code());
    }
}

/// Holds the single-flight flag for the lifetime of one cycle.
pub(super) struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    /// `None` if another cycle holds the flag.
    pub(super) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
