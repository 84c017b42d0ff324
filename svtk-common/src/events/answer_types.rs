//! Decoded answer records carried by `page_submit` and `survey_completed`

use serde::{Deserialize, Serialize};

/// One submitted value of a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerEntry {
    /// Free-text answer, never code-resolved
    Text { text: String },
    /// Coded answer; `id` is absent when the code could not be resolved
    Code {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
    },
}

impl AnswerEntry {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerEntry::Text { text: value.into() }
    }

    pub fn code(value: impl Into<String>, id: Option<i64>) -> Self {
        AnswerEntry::Code {
            code: value.into(),
            id,
        }
    }
}

/// All values submitted for one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerGroup {
    pub question_id: i64,
    pub answers: Vec<AnswerEntry>,
}

/// Append `entry` to the group of `question_id`, creating the group on first use
///
/// Groups keep first-occurrence order.
pub fn push_answer(groups: &mut Vec<AnswerGroup>, question_id: i64, entry: AnswerEntry) {
    match groups.iter_mut().find(|g| g.question_id == question_id) {
        Some(group) => group.answers.push(entry),
        None => groups.push(AnswerGroup {
            question_id,
            answers: vec![entry],
        }),
    }
}
