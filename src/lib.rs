// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # CVE Sync
//!
//! Incremental synchronization of a vulnerability-record catalog from the
//! upstream CVE List V5 repository.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Mirror Updater                        │
//! │  • Shallow clone on first run, fast-forward pull after      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Checkpoint Store + Change-Log Reader            │
//! │  • lastFetchTime persisted with an atomic rename            │
//! │  • deltaLog.json streamed until the checkpoint boundary     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (entries oldest first)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Record Locator + Record Parser                │
//! │  • year/bucket lookup, bounded concurrent lookups           │
//! │  • PUBLISHED filter and field fallbacks                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (insert / update by id)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Record Store (SQLite/MySQL)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checkpoint only moves after every change of the delta has been
//! attempted, so an aborted cycle is replayed in full next time. Replays are
//! harmless: inserts of existing ids and updates of missing ids are skipped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cve_sync::{SqlRecordStore, SyncConfig, SyncOrchestrator};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         sql_url: Some("sqlite://catalog.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!     let store = SqlRecordStore::new(config.sql_url.as_deref().unwrap()).await.unwrap();
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let orchestrator = SyncOrchestrator::from_config(config, Arc::new(store), shutdown_rx);
//!
//!     let report = orchestrator.run_cycle().await.unwrap();
//!     println!("inserted {} updated {}", report.inserted, report.updated);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`SyncOrchestrator`], the cycle state machine and scheduler
//! - [`mirror`], [`checkpoint`], [`delta_log`], [`locator`], [`parser`]: cycle components
//! - [`storage`]: record repository backends (SQL, memory)
//! - [`import`]: full tree import for bootstrap
//! - [`resilience`]: retry with backoff
//! - [`metrics`]: `metrics` crate instrumentation

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod delta_log;
pub mod import;
pub mod locator;
pub mod metrics;
pub mod mirror;
pub mod parser;
pub mod record;
pub mod resilience;
pub mod storage;
pub mod timestamp;

pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore};
pub use config::{BootstrapMode, ConfigError, SyncConfig};
pub use coordinator::{CycleError, CycleReport, CycleState, SyncOrchestrator};
pub use delta_log::{ChangeIntent, ChangeLogEntry, DeltaLogReader, LogError};
pub use import::{ImportError, ImportReport, TreeImporter};
pub use locator::{LocateError, RecordLocator};
pub use mirror::{GitMirror, Mirror, MirrorError, NoopMirror};
pub use parser::{ParseError, RecordParser};
pub use record::{CveId, NormalizedRecord};
pub use resilience::retry::RetryConfig;
pub use storage::{BatchWriteResult, InMemoryRecordStore, RecordStore, SqlRecordStore, StorageError};
pub use timestamp::{parse_timestamp, Timestamp};
