//! Per-question answer code index

use std::collections::{BTreeMap, HashMap};

use super::catalog::{AnswerOption, Subquestion};

/// Code → answer id, grouped by scale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerIndex {
    by_scale: BTreeMap<i64, HashMap<String, i64>>,
}

impl AnswerIndex {
    /// Index answer options; blank codes are skipped
    pub fn from_options(options: &[AnswerOption]) -> Self {
        let mut index = Self::default();
        for option in options {
            index.insert(option.scale_id, &option.code, option.aid);
        }
        index
    }

    /// Index sub-questions by title under scale 0
    pub fn from_subquestions(subquestions: &[Subquestion]) -> Self {
        let mut index = Self::default();
        for sq in subquestions {
            index.insert(0, &sq.title, sq.qid);
        }
        index
    }

    fn insert(&mut self, scale_id: i64, code: &str, id: i64) {
        let code = code.trim();
        if code.is_empty() {
            return;
        }
        self.by_scale
            .entry(scale_id)
            .or_default()
            .insert(code.to_string(), id);
    }

    pub fn is_empty(&self) -> bool {
        self.by_scale.is_empty()
    }

    /// Resolve `code`: requested scale (0 if none), then scale 0, then any scale
    pub fn resolve(&self, code: &str, scale_id: Option<i64>) -> Option<i64> {
        let code = code.trim();
        let scale = scale_id.unwrap_or(0);

        self.lookup(scale, code)
            .or_else(|| self.lookup(0, code))
            .or_else(|| self.by_scale.values().find_map(|m| m.get(code).copied()))
    }

    fn lookup(&self, scale: i64, code: &str) -> Option<i64> {
        self.by_scale.get(&scale).and_then(|m| m.get(code).copied())
    }
}
