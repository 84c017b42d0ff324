//! Append-only NDJSON record of every delivery attempt

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use svtk_common::events::EventPayload;
use svtk_common::Result;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::SinkOutcome;

#[derive(Serialize)]
struct JournalEntry<'a> {
    at: String,
    event: &'static str,
    sink: &'static str,
    success: bool,
    detail: &'a str,
    payload: &'a EventPayload,
}

/// One JSON line per sink attempt
pub struct Journal {
    path: PathBuf,
    // Serializes appends from concurrent requests
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, payload: &EventPayload, outcome: &SinkOutcome) -> Result<()> {
        let entry = JournalEntry {
            at: Utc::now().to_rfc3339(),
            event: payload.event_name(),
            sink: outcome.sink,
            success: outcome.success,
            detail: &outcome.detail,
            payload,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
