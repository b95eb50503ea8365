//! Shared fixtures: a temp mirror tree, a change log and a config pointing at them.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;

use cve_sync::{
    CheckpointStore, CveId, FileCheckpointStore, Mirror, NoopMirror, RecordStore, SyncConfig, SyncOrchestrator,
    Timestamp,
};

pub struct Fixture {
    pub dir: TempDir,
    pub config: SyncConfig,
}

/// One change-log entry: (fetchTime, new ids, updated ids).
pub type LogEntry<'a> = (&'a str, &'a [&'a str], &'a [&'a str]);

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("cve_data");
        std::fs::create_dir_all(data_dir.join("cves")).unwrap();

        let config = SyncConfig {
            data_dir,
            checkpoint_path: dir.path().join("state").join("last_fetch_time.json"),
            mirror_enabled: false,
            interval_update_secs: 3600,
            locate_concurrency: 4,
            batch_size: 2,
            ..Default::default()
        };
        Self { dir, config }
    }

    pub fn record_root(&self) -> PathBuf {
        self.config.record_root()
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        let parsed = CveId::parse(id, "CVE").unwrap();
        self.record_root()
            .join(parsed.year.to_string())
            .join(parsed.bucket(1000))
            .join(parsed.file_name())
    }

    pub fn write_doc(&self, id: &str, doc: &Value) -> PathBuf {
        let path = self.record_path(id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_vec_pretty(doc).unwrap()).unwrap();
        path
    }

    /// Write a PUBLISHED record whose title and description carry `tag`.
    pub fn publish(&self, id: &str, tag: &str, updated: &str) -> PathBuf {
        self.write_doc(id, &record_doc(id, "PUBLISHED", tag, Some("2024-01-01T00:00:00Z"), updated))
    }

    /// Write the change log, newest entry first like the upstream file.
    pub fn write_log(&self, entries: &[LogEntry<'_>]) {
        std::fs::write(self.config.delta_log_path(), render_log(entries)).unwrap();
    }

    pub fn write_log_raw(&self, text: &str) {
        std::fs::write(self.config.delta_log_path(), text).unwrap();
    }

    pub fn checkpoints(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(&self.config.checkpoint_path)
    }

    pub async fn checkpoint(&self) -> Option<Timestamp> {
        self.checkpoints().read().await.unwrap()
    }

    pub async fn set_checkpoint(&self, at: &str) {
        self.checkpoints().write(ts(at)).await.unwrap();
    }

    pub fn orchestrator(&self, store: Arc<dyn RecordStore>) -> (SyncOrchestrator, watch::Sender<bool>) {
        self.orchestrator_with_mirror(store, Arc::new(NoopMirror))
    }

    pub fn orchestrator_with_mirror(
        &self,
        store: Arc<dyn RecordStore>,
        mirror: Arc<dyn Mirror>,
    ) -> (SyncOrchestrator, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let orchestrator = SyncOrchestrator::new(
            self.config.clone(),
            mirror,
            Arc::new(self.checkpoints()),
            store,
            rx,
        );
        (orchestrator, tx)
    }
}

pub fn ts(text: &str) -> Timestamp {
    cve_sync::parse_timestamp(text).unwrap()
}

pub fn record_doc(id: &str, state: &str, tag: &str, published: Option<&str>, updated: &str) -> Value {
    let mut metadata = json!({
        "cveId": id,
        "assignerOrgId": "8254265b-2729-46b6-b9e3-3dfca2d5bfca",
        "state": state,
        "dateUpdated": updated,
    });
    if let Some(published) = published {
        metadata["datePublished"] = json!(published);
    }
    json!({
        "dataType": "CVE_RECORD",
        "dataVersion": "5.1",
        "cveMetadata": metadata,
        "containers": {
            "cna": {"descriptions": [{"lang": "en", "value": format!("{} description", tag)}]},
            "adp": [{"title": format!("{} title", tag)}]
        }
    })
}

pub fn render_log(entries: &[LogEntry<'_>]) -> String {
    let changes = |ids: &[&str]| -> Vec<Value> {
        ids.iter()
            .map(|id| json!({"cveId": id, "cveOrgLink": format!("https://www.cve.org/CVERecord?id={}", id)}))
            .collect()
    };
    let values: Vec<Value> = entries
        .iter()
        .map(|(fetch_time, new, updated)| {
            json!({
                "fetchTime": fetch_time,
                "numberOfChanges": new.len() + updated.len(),
                "new": changes(new),
                "updated": changes(updated),
                "error": []
            })
        })
        .collect();
    serde_json::to_string_pretty(&values).unwrap()
}
