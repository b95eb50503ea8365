// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source record parsing (CVE JSON 5.x) into [`NormalizedRecord`].
//!
//! Field mapping:
//!
//! | record field     | source                                                   |
//! |------------------|----------------------------------------------------------|
//! | `id`             | `cveMetadata.cveId`                                      |
//! | `title`          | `containers.adp[0].title`, else `""`                     |
//! | `description`    | `containers.cna.descriptions[0].value` (required)        |
//! | `date_published` | `cveMetadata.datePublished`, else `cveMetadata.dateUpdated` |
//! | `date_updated`   | `cveMetadata.dateUpdated` (required)                     |
//!
//! Only `PUBLISHED` records produce a row.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::record::{CveId, NormalizedRecord};
use crate::timestamp::{parse_timestamp, Timestamp};

pub const PUBLISHED_STATE: &str = "PUBLISHED";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record {id} is not published (state {state})")]
    Unpublished { id: String, state: String },
    #[error("Record id '{0}' does not match the catalog prefix")]
    InvalidId(String),
    #[error("Record {0} has no description")]
    MissingDescription(String),
    #[error("Record {0} has no dateUpdated")]
    MissingUpdatedDate(String),
    #[error("Record {id} has an invalid {field}: '{value}'")]
    InvalidDate {
        id: String,
        field: &'static str,
        value: String,
    },
}

impl ParseError {
    /// Expected steady-state outcome rather than a broken source file.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, ParseError::Unpublished { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Io { .. } => "io",
            ParseError::Json(_) => "malformed_json",
            ParseError::Unpublished { .. } => "unpublished",
            ParseError::InvalidId(_) => "invalid_id",
            ParseError::MissingDescription(_) => "missing_description",
            ParseError::MissingUpdatedDate(_) => "missing_date_updated",
            ParseError::InvalidDate { .. } => "invalid_date",
        }
    }
}

#[derive(Deserialize)]
struct SourceRecord {
    #[serde(rename = "cveMetadata")]
    metadata: SourceMetadata,
    #[serde(default)]
    containers: SourceContainers,
}

#[derive(Deserialize)]
struct SourceMetadata {
    state: String,
    #[serde(rename = "cveId")]
    cve_id: String,
    #[serde(rename = "datePublished", default)]
    date_published: Option<String>,
    #[serde(rename = "dateUpdated", default)]
    date_updated: Option<String>,
}

#[derive(Deserialize, Default)]
struct SourceContainers {
    #[serde(default)]
    cna: Option<CnaContainer>,
    #[serde(default)]
    adp: Vec<AdpContainer>,
}

#[derive(Deserialize)]
struct CnaContainer {
    #[serde(default)]
    descriptions: Vec<Description>,
}

#[derive(Deserialize)]
struct Description {
    value: String,
}

#[derive(Deserialize)]
struct AdpContainer {
    #[serde(default)]
    title: Option<String>,
}

/// Parses source record files for one identifier prefix.
#[derive(Debug, Clone)]
pub struct RecordParser {
    id_prefix: String,
}

impl RecordParser {
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self { id_prefix: id_prefix.into() }
    }

    pub async fn parse(&self, path: &Path) -> Result<NormalizedRecord, ParseError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_slice(&bytes)
    }

    /// Blocking variant for bulk import walkers.
    pub fn parse_blocking(&self, path: &Path) -> Result<NormalizedRecord, ParseError> {
        let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_slice(&bytes)
    }

    pub fn parse_slice(&self, bytes: &[u8]) -> Result<NormalizedRecord, ParseError> {
        let source: SourceRecord = serde_json::from_slice(bytes)?;
        self.normalize(source)
    }

    fn normalize(&self, source: SourceRecord) -> Result<NormalizedRecord, ParseError> {
        let SourceRecord { metadata, containers } = source;
        let id = metadata.cve_id;

        if metadata.state != PUBLISHED_STATE {
            return Err(ParseError::Unpublished { id, state: metadata.state });
        }
        if CveId::parse(&id, &self.id_prefix).is_none() {
            return Err(ParseError::InvalidId(id));
        }

        let description = containers
            .cna
            .and_then(|cna| cna.descriptions.into_iter().next())
            .map(|d| d.value)
            .ok_or_else(|| ParseError::MissingDescription(id.clone()))?;

        let title = containers
            .adp
            .into_iter()
            .next()
            .and_then(|adp| adp.title)
            .unwrap_or_default();

        let updated_text = metadata
            .date_updated
            .ok_or_else(|| ParseError::MissingUpdatedDate(id.clone()))?;
        let date_updated = parse_date(&id, "dateUpdated", &updated_text)?;
        let date_published = match metadata.date_published {
            Some(text) => parse_date(&id, "datePublished", &text)?,
            None => date_updated,
        };

        Ok(NormalizedRecord {
            id,
            title,
            description,
            date_published,
            date_updated,
        })
    }
}

fn parse_date(id: &str, field: &'static str, text: &str) -> Result<Timestamp, ParseError> {
    parse_timestamp(text).map_err(|_| ParseError::InvalidDate {
        id: id.to_string(),
        field,
        value: text.to_string(),
    })
}
