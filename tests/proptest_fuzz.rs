//! Property-based tests (fuzzing) for the change-log reader and record parser.
//!
//! Uses proptest to generate random/malformed inputs and verify the readers
//! never panic, only return clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::io::Write;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

use cve_sync::timestamp::format_timestamp;
use cve_sync::{CveId, DeltaLogReader, LogError, RecordParser, Timestamp};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn base_time() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().fixed_offset()
}

fn at(offset_secs: u32) -> Timestamp {
    base_time() + Duration::seconds(i64::from(offset_secs))
}

/// Distinct fetch-time offsets, newest first like the upstream log.
fn fetch_offsets_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::btree_set(0u32..1_000_000, 0..30).prop_map(|set| set.into_iter().rev().collect())
}

fn id_strategy() -> impl Strategy<Value = String> {
    (1999u32..2030, 0u64..200_000).prop_map(|(year, seq)| format!("CVE-{}-{:04}", year, seq))
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
        Just(json!("PUBLISHED")),
        Just(json!("2024-06-01T08:00:00Z")),
    ];

    leaf.prop_recursive(4, 64, 10, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("cveMetadata".to_string()),
                    Just("containers".to_string()),
                    Just("cna".to_string()),
                    Just("descriptions".to_string()),
                    Just("state".to_string()),
                    Just("cveId".to_string()),
                    "[a-zA-Z]{1,12}",
                ],
                inner,
                0..8
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn render_log(offsets: &[u32], ids: &[String]) -> String {
    let entries: Vec<Value> = offsets
        .iter()
        .enumerate()
        .map(|(i, offset)| {
            let id = &ids[i % ids.len()];
            json!({
                "fetchTime": format_timestamp(&at(*offset)),
                "numberOfChanges": 1,
                "new": [{"cveId": id}],
                "updated": [],
                "error": []
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap()
}

fn read_log(text: &[u8], checkpoint: Option<Timestamp>) -> Result<Vec<cve_sync::ChangeLogEntry>, LogError> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text).unwrap();
    file.flush().unwrap();

    let reader = DeltaLogReader::new(file.path());
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(reader.entries_since(checkpoint))
}

// =============================================================================
// Change log
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary bytes never panic the reader
    #[test]
    fn fuzz_log_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = read_log(&bytes, None);
    }

    /// Only entries past the checkpoint come back, oldest first
    #[test]
    fn prop_entries_since_checkpoint_sorted_and_newer(
        offsets in fetch_offsets_strategy(),
        ids in prop::collection::vec(id_strategy(), 1..5),
        checkpoint in prop::option::of(0u32..1_000_000),
    ) {
        let text = render_log(&offsets, &ids);
        let checkpoint = checkpoint.map(at);
        let entries = read_log(text.as_bytes(), checkpoint).unwrap();

        let expected = offsets
            .iter()
            .take_while(|o| checkpoint.map_or(true, |cp| at(**o) > cp))
            .count();
        prop_assert_eq!(entries.len(), expected);
        prop_assert!(entries.windows(2).all(|w| w[0].fetch_time < w[1].fetch_time));
        if let Some(cp) = checkpoint {
            prop_assert!(entries.iter().all(|e| e.fetch_time > cp));
        }
    }

    /// A log cut anywhere after the array opens yields a prefix of the full read
    #[test]
    fn prop_truncated_log_is_prefix(
        offsets in fetch_offsets_strategy(),
        ids in prop::collection::vec(id_strategy(), 1..5),
        cut in any::<prop::sample::Index>(),
    ) {
        let text = render_log(&offsets, &ids);
        let full = read_log(text.as_bytes(), None).unwrap();

        let cut = 1 + cut.index(text.len().max(2) - 1);
        let truncated = read_log(&text.as_bytes()[..cut.min(text.len())], None).unwrap();

        prop_assert!(truncated.len() <= full.len());
        prop_assert!(full.ends_with(&truncated));
    }
}

// =============================================================================
// Record parser and identifiers
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary JSON documents either parse or fail with a classified reason
    #[test]
    fn fuzz_parser_from_arbitrary_json(doc in arbitrary_json_strategy()) {
        let parser = RecordParser::new("CVE");
        let bytes = serde_json::to_vec(&doc).unwrap();
        match parser.parse_slice(&bytes) {
            Ok(record) => prop_assert!(record.id.starts_with("CVE-")),
            Err(e) => prop_assert!(!e.reason().is_empty()),
        }
    }

    #[test]
    fn fuzz_parser_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = RecordParser::new("CVE").parse_slice(&bytes);
    }

    #[test]
    fn fuzz_id_parse_never_panics(text in ".{0,40}") {
        let _ = CveId::parse(&text, "CVE");
    }

    /// Well-formed ids always parse and land in the sequence's thousand bucket
    #[test]
    fn prop_id_bucket_matches_sequence(id in id_strategy()) {
        let parsed = CveId::parse(&id, "CVE").unwrap();
        prop_assert_eq!(parsed.bucket(1000), format!("{}xxx", parsed.sequence / 1000));
        prop_assert_eq!(parsed.file_name(), format!("{}.json", id));
    }
}
