//! Cycle execution and the scheduler loop.

use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::BootstrapMode;
use crate::import::TreeImporter;
use crate::metrics::{self, PhaseTimer};
use crate::timestamp::{format_timestamp, Timestamp};

use super::types::{CycleError, CycleReport, CycleState};
use super::{CycleGuard, SyncOrchestrator};

impl SyncOrchestrator {
    /// Run one full cycle: mirror, diff, apply, checkpoint.
    ///
    /// Returns [`CycleError::AlreadyRunning`] without side effects if another
    /// cycle holds the guard. On any error the checkpoint is left as it was.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            debug!("Cycle requested while another is running");
            metrics::record_cycle(CycleError::AlreadyRunning.outcome(), std::time::Duration::ZERO);
            return Err(CycleError::AlreadyRunning);
        };

        let cycle_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync_cycle", cycle_id = %cycle_id);
        let start = Instant::now();

        let result = self.execute_cycle(cycle_id).instrument(span.clone()).await;

        let _entered = span.enter();
        match &result {
            Ok(report) => {
                self.set_state(CycleState::Idle);
                metrics::record_cycle("success", start.elapsed());
                info!(
                    entries = report.entries,
                    inserted = report.inserted,
                    updated = report.updated,
                    skipped = report.skipped_total(),
                    imported = report.import.as_ref().map_or(0, |i| i.imported),
                    checkpoint = report.checkpoint.as_ref().map(format_timestamp).as_deref().unwrap_or("none"),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sync cycle complete"
                );
                *self.last_report.write() = Some(report.clone());
            }
            Err(e @ CycleError::Interrupted { .. }) => {
                self.set_state(CycleState::Idle);
                metrics::record_cycle(e.outcome(), start.elapsed());
                warn!(error = %e, "Sync cycle interrupted, checkpoint not advanced");
            }
            Err(e) => {
                self.set_state(CycleState::Failed);
                metrics::record_cycle(e.outcome(), start.elapsed());
                error!(error = %e, "Sync cycle failed, will retry on next tick");
            }
        }
        result
    }

    async fn execute_cycle(&self, cycle_id: String) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport {
            cycle_id,
            ..Default::default()
        };

        if self.shutdown_requested() {
            return Err(CycleError::Interrupted { applied: 0 });
        }

        // Mirroring
        self.set_state(CycleState::Mirroring);
        let mirror_start = Instant::now();
        let mirrored = self
            .mirror
            .ensure_and_refresh(&self.config.repo_url, &self.config.data_dir)
            .await;
        metrics::record_mirror(mirrored.is_ok(), mirror_start.elapsed());
        mirrored?;

        // Diffing
        self.set_state(CycleState::Diffing);
        let checkpoint = self.checkpoints.read().await?;
        report.checkpoint = checkpoint;

        if checkpoint.is_none() && self.config.bootstrap == BootstrapMode::FullImport {
            return self.bootstrap_from_tree(report).await;
        }

        let entries = {
            let _timer = PhaseTimer::new("diff");
            self.log.entries_since(checkpoint).await?
        };
        report.entries = entries.len();
        metrics::record_entries(entries.len());
        info!(
            entries = entries.len(),
            changes = entries.iter().map(|e| e.change_count()).sum::<usize>(),
            since = checkpoint.as_ref().map(format_timestamp).as_deref().unwrap_or("beginning"),
            "Change log diff computed"
        );

        // Applying
        self.set_state(CycleState::Applying);
        let mut newest: Option<Timestamp> = None;
        {
            let _timer = PhaseTimer::new("apply");
            for entry in &entries {
                let changes: Vec<_> = entry.changes().collect();
                let ids: Vec<&str> = changes.iter().map(|(_, id)| *id).collect();
                let located = self.locator.locate_all(&ids).await?;

                for ((intent, record_id), path) in changes.into_iter().zip(located) {
                    if self.shutdown_requested() {
                        return Err(CycleError::Interrupted {
                            applied: report.applied(),
                        });
                    }
                    self.apply_change(intent, record_id, path, &mut report).await?;
                }

                newest = Some(newest.map_or(entry.fetch_time, |n| n.max(entry.fetch_time)));
                debug!(fetch_time = %format_timestamp(&entry.fetch_time), changes = entry.change_count(), "Entry applied");
            }
        }

        // Checkpointing
        if let Some(newest) = newest {
            if checkpoint.map_or(true, |current| newest > current) {
                self.set_state(CycleState::Checkpointing);
                self.checkpoints.write(newest).await?;
                metrics::set_checkpoint(newest.timestamp());
                report.checkpoint = Some(newest);
            }
        }

        Ok(report)
    }

    /// No checkpoint yet: load the whole tree, then start from the log head.
    async fn bootstrap_from_tree(&self, mut report: CycleReport) -> Result<CycleReport, CycleError> {
        info!(root = %self.locator.root().display(), "No checkpoint, importing the full record tree");
        self.set_state(CycleState::Applying);

        let importer = TreeImporter::new(
            self.locator.root(),
            self.config.id_prefix.clone(),
            Arc::clone(&self.store),
            self.config.batch_size,
        );
        let imported = importer.run(Some(self.shutdown.clone())).await.map_err(|e| match e {
            crate::import::ImportError::Interrupted => CycleError::Interrupted { applied: 0 },
            other => CycleError::Import(other),
        })?;

        let head = self.log.latest_fetch_time().await?;
        if let Some(head) = head {
            self.set_state(CycleState::Checkpointing);
            self.checkpoints.write(head).await?;
            metrics::set_checkpoint(head.timestamp());
        } else {
            warn!("Change log is empty, next cycle will replay it from the beginning");
        }

        // Rows written by the import are upserts; they are reported under
        // `import`, not as inserts
        report.checkpoint = head;
        report.import = Some(imported);
        Ok(report)
    }

    /// Run cycles on the configured interval until shutdown.
    ///
    /// The first cycle starts immediately. Ticks that come due while a cycle
    /// is running are dropped.
    #[tracing::instrument(skip(self), fields(interval_secs = self.config.interval_update_secs))]
    pub async fn run(&self) {
        info!("Sync scheduler running");

        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged inside run_cycle; the next tick retries
                    if let Err(CycleError::Interrupted { .. }) = self.run_cycle().await {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown signal dropped, stopping scheduler");
                        break;
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}
