//! Test Helper Utilities
//!
//! Shared utilities for testing svtk-hooks

#![allow(dead_code)]

pub mod receiver;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use svtk_common::config::TrackingConfig;
use svtk_common::db::init_database;
use svtk_common::events::EventPayload;
use svtk_hooks::decoder::SqliteCatalog;
use svtk_hooks::dispatch::{ChannelDispatcher, Sink, SinkError};
use svtk_hooks::tracker::Tracker;
use tempfile::TempDir;

pub use receiver::TestReceiver;

/// Sink that keeps every payload it is given
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventPayload>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EventPayload> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_name() == event)
            .count()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, payload: &EventPayload) -> Result<String, SinkError> {
        self.events.lock().unwrap().push(payload.clone());
        Ok("recorded".to_string())
    }
}

/// File-backed database in a temporary directory
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("svtk.db")).await.unwrap();
    (dir, pool)
}

pub fn recording_dispatcher() -> (Arc<RecordingSink>, ChannelDispatcher) {
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = ChannelDispatcher::new(vec![sink.clone()], None);
    (sink, dispatcher)
}

pub fn create_tracker(pool: SqlitePool, dispatcher: ChannelDispatcher) -> Tracker {
    Tracker::new(
        pool.clone(),
        Arc::new(SqliteCatalog::new(pool)),
        dispatcher,
        &TrackingConfig::default(),
    )
}

/// Seed one catalog question
pub async fn seed_question(pool: &SqlitePool, qid: i64, parent_qid: i64, survey_id: i64, type_code: &str, title: &str) {
    sqlx::query("INSERT INTO questions (qid, parent_qid, sid, type, title) VALUES (?, ?, ?, ?, ?)")
        .bind(qid)
        .bind(parent_qid)
        .bind(survey_id)
        .bind(type_code)
        .bind(title)
        .execute(pool)
        .await
        .unwrap();
}

/// Seed one catalog answer option
pub async fn seed_answer(pool: &SqlitePool, aid: i64, qid: i64, code: &str, scale_id: i64) {
    sqlx::query("INSERT INTO answers (aid, qid, code, scale_id) VALUES (?, ?, ?, ?)")
        .bind(aid)
        .bind(qid)
        .bind(code)
        .bind(scale_id)
        .execute(pool)
        .await
        .unwrap();
}
