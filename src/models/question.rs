use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A question as held by the platform's content store. Marks come from here and
/// nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentQuestion {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub class_id: Uuid,
    pub difficulty: String,
    pub prompt: String,
    pub answer_key: Json<AnswerKey>,
    pub marks: Decimal,
    pub negative_marks: Decimal,
}

impl ContentQuestion {
    pub fn kind(&self) -> QuestionKind {
        self.answer_key.0.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    FreeText,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::FreeText => "free_text",
        }
    }

    pub fn is_auto_graded(&self) -> bool {
        !matches!(self, QuestionKind::FreeText)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerKey {
    MultipleChoice {
        options: Vec<ChoiceOption>,
        correct_option_id: String,
    },
    TrueFalse {
        correct: bool,
    },
    FreeText,
}

impl AnswerKey {
    pub fn kind(&self) -> QuestionKind {
        match self {
            AnswerKey::MultipleChoice { .. } => QuestionKind::MultipleChoice,
            AnswerKey::TrueFalse { .. } => QuestionKind::TrueFalse,
            AnswerKey::FreeText => QuestionKind::FreeText,
        }
    }

    /// `None` for free text; otherwise whether the selected option matches the key.
    pub fn check(&self, selected: &str) -> Option<bool> {
        let selected = selected.trim();
        match self {
            AnswerKey::MultipleChoice {
                correct_option_id, ..
            } => Some(selected == correct_option_id),
            AnswerKey::TrueFalse { correct } => {
                Some(parse_bool(selected).map(|b| b == *correct).unwrap_or(false))
            }
            AnswerKey::FreeText => None,
        }
    }

    /// What a learner may see while taking the test.
    pub fn options(&self) -> Vec<ChoiceOption> {
        match self {
            AnswerKey::MultipleChoice { options, .. } => options.clone(),
            AnswerKey::TrueFalse { .. } => vec![
                ChoiceOption {
                    id: "true".to_string(),
                    text: "True".to_string(),
                },
                ChoiceOption {
                    id: "false".to_string(),
                    text: "False".to_string(),
                },
            ],
            AnswerKey::FreeText => Vec::new(),
        }
    }

    pub fn correct_answer(&self) -> Option<String> {
        match self {
            AnswerKey::MultipleChoice {
                correct_option_id, ..
            } => Some(correct_option_id.clone()),
            AnswerKey::TrueFalse { correct } => Some(correct.to_string()),
            AnswerKey::FreeText => None,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Filter used when an author asks for interchangeable questions.
#[derive(Debug, Clone)]
pub struct AlternativeCriteria {
    pub subject_id: Uuid,
    pub class_id: Uuid,
    pub kind: QuestionKind,
    pub difficulty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcq() -> AnswerKey {
        AnswerKey::MultipleChoice {
            options: vec![
                ChoiceOption {
                    id: "a".into(),
                    text: "3".into(),
                },
                ChoiceOption {
                    id: "b".into(),
                    text: "4".into(),
                },
            ],
            correct_option_id: "b".into(),
        }
    }

    #[test]
    fn multiple_choice_matches_option_id_exactly() {
        assert_eq!(mcq().check("b"), Some(true));
        assert_eq!(mcq().check(" b "), Some(true));
        assert_eq!(mcq().check("a"), Some(false));
        assert_eq!(mcq().check("B"), Some(false));
    }

    #[test]
    fn true_false_accepts_any_case_and_rejects_garbage() {
        let key = AnswerKey::TrueFalse { correct: false };
        assert_eq!(key.check("FALSE"), Some(true));
        assert_eq!(key.check("true"), Some(false));
        assert_eq!(key.check("maybe"), Some(false));
    }

    #[test]
    fn free_text_is_never_auto_checked() {
        assert_eq!(AnswerKey::FreeText.check("anything"), None);
        assert!(!AnswerKey::FreeText.kind().is_auto_graded());
    }

    #[test]
    fn answer_key_is_tagged_by_type() {
        let json = serde_json::to_value(AnswerKey::TrueFalse { correct: true }).unwrap();
        assert_eq!(json["type"], "true_false");
        assert_eq!(json["correct"], true);
        let back: AnswerKey =
            serde_json::from_value(serde_json::json!({"type": "free_text"})).unwrap();
        assert_eq!(back, AnswerKey::FreeText);
    }
}
