// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record repository backends.
//!
//! - [`sql::SqlRecordStore`]: SQLite or MySQL through the sqlx `Any` driver
//! - [`memory::InMemoryRecordStore`]: DashMap-backed, for tests and dry runs

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryRecordStore;
pub use sql::SqlRecordStore;
pub use traits::{BatchWriteResult, RecordStore, StorageError};
