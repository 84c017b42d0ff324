//! Explicit transport session context
//!
//! The survey engine keeps per-visitor state in an ambient session. Here that
//! state is a plain value loaded at the start of a hook, mutated, and saved at
//! the end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use svtk_common::time::{from_millis, to_millis};
use svtk_common::uuid_utils::new_transport_id;
use svtk_common::Result;
use tracing::debug;

/// Per-survey state inside one transport session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyScope {
    /// Unix milliseconds of the first page view
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub started_sent: bool,
    /// Unix milliseconds of the last `survey_started` emission
    #[serde(default)]
    pub started_sent_at: Option<i64>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
}

impl SurveyScope {
    pub fn start_time_utc(&self) -> Option<DateTime<Utc>> {
        self.start_time.map(from_millis)
    }

    /// Clear identifiers and the started flag after completion
    pub fn clear_after_completion(&mut self) {
        self.uuid = None;
        self.custom_id = None;
        self.started_sent = false;
        self.started_sent_at = None;
    }
}

/// All state of one transport session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub transport_id: String,
    #[serde(default)]
    pub surveys: BTreeMap<i64, SurveyScope>,
}

impl SessionContext {
    pub fn new(transport_id: impl Into<String>) -> Self {
        Self {
            transport_id: transport_id.into(),
            surveys: BTreeMap::new(),
        }
    }

    pub fn scope(&self, survey_id: i64) -> Option<&SurveyScope> {
        self.surveys.get(&survey_id)
    }

    pub fn scope_mut(&mut self, survey_id: i64) -> &mut SurveyScope {
        self.surveys.entry(survey_id).or_default()
    }

    /// Drop every survey-scoped value
    pub fn purge(&mut self) {
        self.surveys.clear();
    }
}

/// Storage of [`SessionContext`] values keyed by transport id
#[async_trait]
pub trait TransportSessions: Send + Sync {
    async fn load(&self, transport_id: &str) -> Result<Option<SessionContext>>;

    async fn save(&self, ctx: &SessionContext) -> Result<()>;

    /// Delete a stored context
    async fn invalidate(&self, transport_id: &str) -> Result<()>;

    /// Move `ctx` to a freshly generated id, deleting the old entry
    async fn regenerate(&self, ctx: &mut SessionContext) -> Result<()> {
        let old_id = std::mem::replace(&mut ctx.transport_id, new_transport_id());
        self.invalidate(&old_id).await?;
        self.save(ctx).await?;
        debug!(old = %old_id, new = %ctx.transport_id, "Transport session regenerated");
        Ok(())
    }

    /// Load the context for `transport_id`, or start a new one
    ///
    /// A missing or blank id gets a generated one.
    async fn load_or_new(&self, transport_id: Option<&str>) -> Result<SessionContext> {
        match transport_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(self
                .load(id)
                .await?
                .unwrap_or_else(|| SessionContext::new(id))),
            None => Ok(SessionContext::new(new_transport_id())),
        }
    }
}

/// [`TransportSessions`] over the `transport_sessions` table
#[derive(Clone)]
pub struct SqliteTransportSessions {
    db: SqlitePool,
}

impl SqliteTransportSessions {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TransportSessions for SqliteTransportSessions {
    async fn load(&self, transport_id: &str) -> Result<Option<SessionContext>> {
        let context: Option<String> =
            sqlx::query_scalar("SELECT context FROM transport_sessions WHERE id = ?")
                .bind(transport_id)
                .fetch_optional(&self.db)
                .await?;

        match context {
            Some(json) => {
                let mut ctx: SessionContext = serde_json::from_str(&json)?;
                ctx.transport_id = transport_id.to_string();
                Ok(Some(ctx))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, ctx: &SessionContext) -> Result<()> {
        let json = serde_json::to_string(ctx)?;
        sqlx::query(
            r#"
            INSERT INTO transport_sessions (id, context, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET context = excluded.context, updated_at = excluded.updated_at
            "#,
        )
        .bind(&ctx.transport_id)
        .bind(json)
        .bind(to_millis(Utc::now()))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, transport_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM transport_sessions WHERE id = ?")
            .bind(transport_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
