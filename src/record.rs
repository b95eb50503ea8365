// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record identifiers and the normalized record written to storage.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::Timestamp;

/// A parsed `PREFIX-YYYY-NNNN` identifier.
///
/// # Example
///
/// ```
/// use cve_sync::CveId;
///
/// let id = CveId::parse("CVE-2024-21345", "CVE").unwrap();
/// assert_eq!(id.year, 2024);
/// assert_eq!(id.sequence, 21345);
/// assert_eq!(id.bucket(1000), "21xxx");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CveId {
    pub prefix: String,
    pub year: u32,
    pub sequence: u64,
    /// Sequence digits as written (leading zeros are significant in file names)
    raw: String,
}

impl CveId {
    /// Parse an identifier, requiring the given prefix.
    ///
    /// Returns `None` for anything that isn't `<prefix>-<4 digit year>-<digits>`.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let rest = text.strip_prefix(prefix)?.strip_prefix('-')?;
        let (year, seq) = rest.split_once('-')?;
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            prefix: prefix.to_string(),
            year: year.parse().ok()?,
            sequence: seq.parse().ok()?,
            raw: text.to_string(),
        })
    }

    /// Bucket directory name for this sequence: `sequence / width` followed by
    /// one `x` per digit of the width minus one (`1xxx` for width 1000).
    #[must_use]
    pub fn bucket(&self, width: u64) -> String {
        let width = width.max(1);
        let placeholders = width.to_string().len().saturating_sub(1);
        format!("{}{}", self.sequence / width, "x".repeat(placeholders))
    }

    /// File name of the backing source record.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.json", self.raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for CveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// A catalog record as stored by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date_published: Timestamp,
    pub date_updated: Timestamp,
}
