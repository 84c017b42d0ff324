//! Submitted field key grammar
//!
//! `<formId>X<groupId>X<questionId>[SQ<subcode>][#<scaleId>]`, e.g.
//! `12X5X301SQ002#1`. Keys that do not match are not answers.

/// Decoded field key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    pub form_id: i64,
    pub group_id: i64,
    pub question_id: i64,
    /// Sub-question code without the `SQ` prefix
    pub subcode: Option<String>,
    pub scale_id: Option<i64>,
}

impl FieldKey {
    pub fn parse(key: &str) -> Option<Self> {
        let (head, scale_id) = match key.split_once('#') {
            Some((head, scale)) => (head, Some(parse_digits(scale)?)),
            None => (key, None),
        };

        let mut parts = head.splitn(3, 'X');
        let form_id = parse_digits(parts.next()?)?;
        let group_id = parse_digits(parts.next()?)?;
        let rest = parts.next()?;

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let question_id = parse_digits(&rest[..digits_end])?;

        let tail = &rest[digits_end..];
        let subcode = if tail.is_empty() {
            None
        } else {
            let code = tail.strip_prefix("SQ")?;
            if code.is_empty()
                || !code
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return None;
            }
            Some(code.to_string())
        };

        Some(Self {
            form_id,
            group_id,
            question_id,
            subcode,
            scale_id,
        })
    }

    /// Sub-question title as stored in the catalog (`SQ<subcode>`)
    pub fn subquestion_title(&self) -> Option<String> {
        self.subcode.as_ref().map(|code| format!("SQ{}", code))
    }
}

fn parse_digits(s: &str) -> Option<i64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
