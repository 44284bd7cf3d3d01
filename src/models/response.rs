use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::question::{AnswerKey, ContentQuestion, QuestionKind};
use crate::models::test::TestQuestion;

/// The question as it stood when the attempt began. Grading reads only this, so later
/// edits to the test or the content store never reach an attempt already underway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSnapshot {
    pub content_question_id: Uuid,
    pub prompt: String,
    pub marks: Decimal,
    pub negative_marks: Decimal,
    pub answer_key: AnswerKey,
}

impl QuestionSnapshot {
    pub fn capture(slot: &TestQuestion, content: &ContentQuestion) -> Self {
        Self {
            content_question_id: slot.content_question_id,
            prompt: content.prompt.clone(),
            marks: slot.marks,
            negative_marks: slot.negative_marks,
            answer_key: content.answer_key.0.clone(),
        }
    }

    pub fn kind(&self) -> QuestionKind {
        self.answer_key.kind()
    }
}

/// What a learner sends for one question, on autosave or on submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub answer_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub test_question_id: Uuid,
    #[serde(flatten)]
    pub payload: AnswerPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub test_question_id: Uuid,
    pub sequence: i32,
    pub question: Json<QuestionSnapshot>,
    pub selected_option: Option<String>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub marks_obtained: Decimal,
    pub answered_at: Option<DateTime<Utc>>,
    pub auto_graded: bool,
}

impl QuestionResponse {
    pub fn empty(attempt_id: Uuid, slot: &TestQuestion, snapshot: QuestionSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id,
            test_question_id: slot.id,
            sequence: slot.sequence,
            question: Json(snapshot),
            selected_option: None,
            answer_text: None,
            is_correct: None,
            marks_obtained: Decimal::ZERO,
            answered_at: None,
            auto_graded: false,
        }
    }

    /// Last write wins.
    pub fn record(&mut self, payload: &AnswerPayload, now: DateTime<Utc>) {
        self.selected_option = payload.selected_option.clone();
        self.answer_text = payload.answer_text.clone();
        self.answered_at = Some(now);
    }

    pub fn is_answered(&self) -> bool {
        let filled =
            |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        match self.question.0.kind() {
            QuestionKind::FreeText => filled(&self.answer_text),
            QuestionKind::MultipleChoice | QuestionKind::TrueFalse => filled(&self.selected_option),
        }
    }
}
