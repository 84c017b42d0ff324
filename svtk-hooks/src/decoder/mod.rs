//! Decoding of submitted form fields into answer groups
//!
//! A decoder lives for one request. Question types, answer indexes and
//! sub-question ids are cached for its lifetime; metadata failures are logged
//! and leave the affected values unresolved.

pub mod answer_index;
pub mod catalog;
pub mod field_key;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use svtk_common::events::{push_answer, AnswerEntry, AnswerGroup};
use tracing::warn;

pub use answer_index::AnswerIndex;
pub use catalog::{AnswerOption, QuestionCatalog, QuestionKind, SqliteCatalog, Subquestion};
pub use field_key::FieldKey;

pub struct AnswerDecoder {
    catalog: Arc<dyn QuestionCatalog>,
    kinds: HashMap<i64, QuestionKind>,
    indexes: HashMap<(i64, i64), AnswerIndex>,
    subquestions: HashMap<(i64, i64, String), Option<i64>>,
}

impl AnswerDecoder {
    pub fn new(catalog: Arc<dyn QuestionCatalog>) -> Self {
        Self {
            catalog,
            kinds: HashMap::new(),
            indexes: HashMap::new(),
            subquestions: HashMap::new(),
        }
    }

    /// Decode every answer field of `fields`, in submission order
    pub async fn decode(&mut self, survey_id: i64, fields: &Map<String, Value>) -> Vec<AnswerGroup> {
        let mut groups = Vec::new();

        for (name, value) in fields {
            let Some(key) = FieldKey::parse(name) else {
                continue;
            };
            let values = normalize_values(value);
            if values.is_empty() {
                continue;
            }

            let kind = self.question_kind(key.question_id).await;
            for raw in values {
                let entry = self.decode_value(survey_id, &key, kind, raw).await;
                push_answer(&mut groups, key.question_id, entry);
            }
        }

        groups
    }

    async fn decode_value(
        &mut self,
        survey_id: i64,
        key: &FieldKey,
        kind: QuestionKind,
        raw: String,
    ) -> AnswerEntry {
        match kind {
            QuestionKind::FreeText => AnswerEntry::text(raw),
            QuestionKind::MultiSelect => {
                let id = self.resolve_subquestion(survey_id, key).await;
                AnswerEntry::code(raw, id)
            }
            QuestionKind::Matrix if key.subcode.is_some() => {
                let id = self.resolve_subquestion(survey_id, key).await;
                AnswerEntry::code(raw, id)
            }
            QuestionKind::Matrix | QuestionKind::SingleChoice => {
                let id = self.resolve_code(survey_id, key, &raw).await;
                AnswerEntry::code(raw, id)
            }
        }
    }

    async fn question_kind(&mut self, question_id: i64) -> QuestionKind {
        if let Some(kind) = self.kinds.get(&question_id) {
            return *kind;
        }

        let kind = match self.catalog.question_type(question_id).await {
            Ok(Some(code)) => QuestionKind::from_type_code(&code),
            Ok(None) => QuestionKind::SingleChoice,
            Err(e) => {
                warn!(question_id, "Question type lookup failed: {}", e);
                QuestionKind::SingleChoice
            }
        };
        self.kinds.insert(question_id, kind);
        kind
    }

    /// Sub-question id for the key's subcode: `SQ<code>` title first, then the bare code
    async fn resolve_subquestion(&mut self, survey_id: i64, key: &FieldKey) -> Option<i64> {
        let titles = [key.subquestion_title()?, key.subcode.clone()?];

        for title in titles {
            let cache_key = (survey_id, key.question_id, title.clone());
            let id = match self.subquestions.get(&cache_key) {
                Some(cached) => *cached,
                None => {
                    let looked_up = match self
                        .catalog
                        .subquestion_id(survey_id, key.question_id, &title)
                        .await
                    {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(
                                question_id = key.question_id,
                                title = %title,
                                "Sub-question lookup failed: {}",
                                e
                            );
                            None
                        }
                    };
                    self.subquestions.insert(cache_key, looked_up);
                    looked_up
                }
            };
            if id.is_some() {
                return id;
            }
        }
        None
    }

    /// Answer id for a coded value: cached index, then direct lookup
    async fn resolve_code(&mut self, survey_id: i64, key: &FieldKey, code: &str) -> Option<i64> {
        if let Some(id) = self
            .answer_index(survey_id, key.question_id)
            .await
            .resolve(code, key.scale_id)
        {
            return Some(id);
        }

        if key.scale_id.is_some() {
            match self.catalog.answer_id(key.question_id, code, key.scale_id).await {
                Ok(Some(id)) => return Some(id),
                Ok(None) => {}
                Err(e) => warn!(question_id = key.question_id, "Answer lookup failed: {}", e),
            }
        }
        match self.catalog.answer_id(key.question_id, code, None).await {
            Ok(id) => id,
            Err(e) => {
                warn!(question_id = key.question_id, "Answer lookup failed: {}", e);
                None
            }
        }
    }

    async fn answer_index(&mut self, survey_id: i64, question_id: i64) -> &AnswerIndex {
        if !self.indexes.contains_key(&(survey_id, question_id)) {
            let index = self.build_index(survey_id, question_id).await;
            self.indexes.insert((survey_id, question_id), index);
        }
        // Inserted above
        &self.indexes[&(survey_id, question_id)]
    }

    async fn build_index(&mut self, survey_id: i64, question_id: i64) -> AnswerIndex {
        let options = match self.catalog.answer_options(question_id).await {
            Ok(options) => options,
            Err(e) => {
                warn!(question_id, "Answer index build failed: {}", e);
                return AnswerIndex::default();
            }
        };

        let index = AnswerIndex::from_options(&options);
        if !index.is_empty() || self.question_kind(question_id).await == QuestionKind::MultiSelect {
            return index;
        }

        match self.catalog.subquestions(survey_id, question_id).await {
            Ok(subs) => AnswerIndex::from_subquestions(&subs),
            Err(e) => {
                warn!(question_id, "Sub-question index build failed: {}", e);
                AnswerIndex::default()
            }
        }
    }
}

/// Submitted value(s) as trimmed, non-blank strings
fn normalize_values(value: &Value) -> Vec<String> {
    fn scalar(value: &Value) -> Option<String> {
        let s = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    match value {
        Value::Array(items) => items.iter().filter_map(scalar).collect(),
        other => scalar(other).into_iter().collect(),
    }
}
