use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::test::{TestDraft, TestPatch, TestStatus};
use crate::repositories::TestFilter;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTestPayload {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "trim_optional_string")]
    pub instructions: Option<String>,
    pub subject_id: Uuid,
    pub class_id: Uuid,
    pub section_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Duration must be at least 1 minute"))]
    pub duration_minutes: i32,
    #[validate(range(min = 1, message = "Max attempts must be at least 1"))]
    pub max_attempts: Option<i32>,
    pub passing_marks: Option<Decimal>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub shuffle_questions: Option<bool>,
    pub allow_review: Option<bool>,
    pub show_results_immediately: Option<bool>,
    /// Content question ids in presentation order. Marks are always read from the bank.
    #[serde(default)]
    pub question_ids: Vec<Uuid>,
}

impl CreateTestPayload {
    pub fn into_draft(self, created_by: Option<Uuid>) -> (TestDraft, Vec<Uuid>) {
        let draft = TestDraft {
            title: self.title.trim().to_string(),
            description: self.description,
            instructions: self.instructions,
            subject_id: self.subject_id,
            class_id: self.class_id,
            section_id: self.section_id,
            duration_minutes: self.duration_minutes,
            max_attempts: self.max_attempts.unwrap_or(1),
            passing_marks: self.passing_marks,
            window_start: self.window_start,
            window_end: self.window_end,
            shuffle_questions: self.shuffle_questions.unwrap_or(false),
            allow_review: self.allow_review.unwrap_or(true),
            show_results_immediately: self.show_results_immediately.unwrap_or(true),
            created_by,
        };
        (draft, self.question_ids)
    }
}

/// Absent fields are left alone; an explicit `null` clears a nullable field.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTestPayload {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "trim_nullable_string")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "trim_nullable_string")]
    pub instructions: Option<Option<String>>,
    pub subject_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    #[serde(default, deserialize_with = "nullable")]
    pub section_id: Option<Option<Uuid>>,
    #[validate(range(min = 1, message = "Duration must be at least 1 minute"))]
    pub duration_minutes: Option<i32>,
    #[validate(range(min = 1, message = "Max attempts must be at least 1"))]
    pub max_attempts: Option<i32>,
    #[serde(default, deserialize_with = "nullable")]
    pub passing_marks: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub window_start: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub window_end: Option<Option<DateTime<Utc>>>,
    pub shuffle_questions: Option<bool>,
    pub allow_review: Option<bool>,
    pub show_results_immediately: Option<bool>,
}

impl From<UpdateTestPayload> for TestPatch {
    fn from(p: UpdateTestPayload) -> Self {
        TestPatch {
            title: p.title.map(|t| t.trim().to_string()),
            description: p.description,
            instructions: p.instructions,
            subject_id: p.subject_id,
            class_id: p.class_id,
            section_id: p.section_id,
            duration_minutes: p.duration_minutes,
            max_attempts: p.max_attempts,
            passing_marks: p.passing_marks,
            window_start: p.window_start,
            window_end: p.window_end,
            shuffle_questions: p.shuffle_questions,
            allow_review: p.allow_review,
            show_results_immediately: p.show_results_immediately,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddQuestionsPayload {
    #[validate(length(min = 1, message = "At least one question is required"))]
    pub question_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceQuestionPayload {
    pub content_question_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DuplicateTestPayload {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTestsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<TestStatus>,
    pub subject_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub search: Option<String>,
    pub mine: Option<bool>,
}

impl ListTestsQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }

    pub fn filter(&self, caller: Option<Uuid>) -> TestFilter {
        TestFilter {
            status: self.status,
            subject_id: self.subject_id,
            class_id: self.class_id,
            created_by: if self.mine.unwrap_or(false) { caller } else { None },
            search: self
                .search
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

/// `?exclude=<id>,<id>`: content ids the caller has already ruled out.
#[derive(Debug, Default, Deserialize)]
pub struct AlternativesQuery {
    #[serde(default, deserialize_with = "comma_separated_ids")]
    pub exclude: Vec<Uuid>,
}

fn comma_separated_ids<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(serde::de::Error::custom))
        .collect()
}

fn trim_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

// Only called when the key is present, so a `null` becomes `Some(None)`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn trim_nullable_string<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    trim_optional_string(deserializer).map(Some)
}
