// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync cycle.
//!
//! Uses the `metrics` crate facade; the embedding process installs the
//! exporter. Without one every call is a no-op.
//!
//! # Metric Naming Convention
//! - `cve_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `outcome`: success, failed, interrupted, already_running
//! - `intent`: insert, update
//! - `reason`: skip reason (`not_located`, `unpublished`, `duplicate_key`, ...)

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Cycle finished with the given outcome
pub fn record_cycle(outcome: &str, duration: Duration) {
    counter!("cve_sync_cycles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("cve_sync_cycle_seconds", "outcome" => outcome.to_string()).record(duration.as_secs_f64());
}

/// Change-log entries selected for a cycle
pub fn record_entries(count: usize) {
    histogram!("cve_sync_entries_per_cycle").record(count as f64);
}

/// One change applied to the store
pub fn record_applied(intent: &str) {
    counter!("cve_sync_applied_total", "intent" => intent.to_string()).increment(1);
}

/// One change skipped
pub fn record_skip(intent: &str, reason: &str) {
    counter!(
        "cve_sync_skipped_total",
        "intent" => intent.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_mirror(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    counter!("cve_sync_mirror_refresh_total", "status" => status).increment(1);
    histogram!("cve_sync_mirror_refresh_seconds").record(duration.as_secs_f64());
}

/// Checkpoint advanced to this instant (unix seconds)
pub fn set_checkpoint(unix_seconds: i64) {
    gauge!("cve_sync_checkpoint_timestamp_seconds").set(unix_seconds as f64);
}

/// Numeric cycle state for dashboards (see `CycleState::code`)
pub fn set_cycle_state(code: u8) {
    gauge!("cve_sync_cycle_state").set(f64::from(code));
}

/// Bulk import progress
pub fn record_import(imported: usize, skipped: usize) {
    counter!("cve_sync_import_records_total", "status" => "imported").increment(imported as u64);
    counter!("cve_sync_import_records_total", "status" => "skipped").increment(skipped as u64);
}

/// Records a histogram sample for a named phase on drop.
pub struct PhaseTimer {
    phase: &'static str,
    start: Instant,
}

impl PhaseTimer {
    #[must_use]
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        histogram!("cve_sync_phase_seconds", "phase" => self.phase).record(self.start.elapsed().as_secs_f64());
    }
}
