//! Question and answer metadata
//!
//! The survey engine owns this data; the tracker only reads it.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;
use svtk_common::{Error, Result};
use tracing::info;

/// How submitted values of a question are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    FreeText,
    MultiSelect,
    Matrix,
    /// Single choice, scale, and any unknown type
    SingleChoice,
}

impl QuestionKind {
    pub fn from_type_code(code: &str) -> Self {
        match code.trim() {
            "S" | "T" | "U" | "Q" | ";" | "shortfreetext" | "longfreetext" => QuestionKind::FreeText,
            other => match other.to_ascii_uppercase().as_str() {
                "M" | "P" => QuestionKind::MultiSelect,
                "A" | "B" | "C" | "E" | "F" | "H" | "1" => QuestionKind::Matrix,
                _ => QuestionKind::SingleChoice,
            },
        }
    }
}

/// One answer option row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AnswerOption {
    pub aid: i64,
    pub code: String,
    pub scale_id: i64,
}

/// One sub-question row
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subquestion {
    pub qid: i64,
    pub title: String,
}

/// Read access to question/answer metadata
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    /// Type code of a question, `None` if the question is unknown
    async fn question_type(&self, question_id: i64) -> Result<Option<String>>;

    /// Id of the sub-question of `parent_id` with the given title
    async fn subquestion_id(&self, survey_id: i64, parent_id: i64, title: &str) -> Result<Option<i64>>;

    async fn answer_options(&self, question_id: i64) -> Result<Vec<AnswerOption>>;

    async fn subquestions(&self, survey_id: i64, parent_id: i64) -> Result<Vec<Subquestion>>;

    /// Direct lookup of an answer id by code, optionally within one scale
    async fn answer_id(&self, question_id: i64, code: &str, scale_id: Option<i64>) -> Result<Option<i64>>;
}

/// [`QuestionCatalog`] over SQLite `questions` and `answers` tables
#[derive(Clone)]
pub struct SqliteCatalog {
    db: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open the survey engine database read-only
    pub async fn connect_readonly(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(Error::NotFound(format!(
                "Catalog database not found: {}",
                db_path.display()
            )));
        }

        // mode=ro: the engine owns this database
        let db_url = format!("sqlite://{}?mode=ro", db_path.display());
        let pool = SqlitePool::connect(&db_url).await?;

        info!("Catalog database opened read-only: {}", db_path.display());
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl QuestionCatalog for SqliteCatalog {
    async fn question_type(&self, question_id: i64) -> Result<Option<String>> {
        let code = sqlx::query_scalar("SELECT type FROM questions WHERE qid = ?")
            .bind(question_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(code)
    }

    async fn subquestion_id(&self, survey_id: i64, parent_id: i64, title: &str) -> Result<Option<i64>> {
        let qid = sqlx::query_scalar(
            "SELECT qid FROM questions WHERE parent_qid = ? AND title = ? AND sid = ? ORDER BY qid LIMIT 1",
        )
        .bind(parent_id)
        .bind(title)
        .bind(survey_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(qid)
    }

    async fn answer_options(&self, question_id: i64) -> Result<Vec<AnswerOption>> {
        let rows = sqlx::query_as::<_, AnswerOption>(
            "SELECT aid, code, COALESCE(scale_id, 0) AS scale_id FROM answers WHERE qid = ? ORDER BY aid",
        )
        .bind(question_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn subquestions(&self, survey_id: i64, parent_id: i64) -> Result<Vec<Subquestion>> {
        let rows = sqlx::query_as::<_, Subquestion>(
            "SELECT qid, title FROM questions WHERE parent_qid = ? AND sid = ? ORDER BY qid",
        )
        .bind(parent_id)
        .bind(survey_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn answer_id(&self, question_id: i64, code: &str, scale_id: Option<i64>) -> Result<Option<i64>> {
        let aid = match scale_id {
            Some(scale) => {
                sqlx::query_scalar(
                    "SELECT aid FROM answers WHERE qid = ? AND code = ? AND scale_id = ? ORDER BY aid LIMIT 1",
                )
                .bind(question_id)
                .bind(code)
                .bind(scale)
                .fetch_optional(&self.db)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT aid FROM answers WHERE qid = ? AND code = ? ORDER BY aid LIMIT 1")
                    .bind(question_id)
                    .bind(code)
                    .fetch_optional(&self.db)
                    .await?
            }
        };
        Ok(aid)
    }
}
