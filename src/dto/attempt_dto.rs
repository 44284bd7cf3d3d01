use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::question::{ChoiceOption, QuestionKind};
use crate::models::response::{AnswerPayload, QuestionResponse, SubmittedAnswer};
use crate::services::attempt_service::AttemptDetail;
use crate::services::availability_service::AvailableTest;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveResponsePayload {
    pub test_question_id: Uuid,
    #[validate(length(max = 255))]
    pub selected_option: Option<String>,
    #[validate(length(max = 20000, message = "Answer is too long"))]
    pub answer_text: Option<String>,
}

impl SaveResponsePayload {
    pub fn into_parts(self) -> (Uuid, AnswerPayload) {
        (
            self.test_question_id,
            AnswerPayload {
                selected_option: self.selected_option,
                answer_text: self.answer_text,
            },
        )
    }
}

/// Each entry carries the same limits as an autosave.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubmitAttemptPayload {
    #[serde(default)]
    #[validate(nested)]
    pub responses: Vec<SaveResponsePayload>,
}

impl SubmitAttemptPayload {
    pub fn into_answers(self) -> Vec<SubmittedAnswer> {
        self.responses
            .into_iter()
            .map(|entry| {
                let (test_question_id, payload) = entry.into_parts();
                SubmittedAnswer {
                    test_question_id,
                    payload,
                }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AttemptListQuery {
    pub test_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveResponseResult {
    pub saved: bool,
    pub test_question_id: Uuid,
    pub answered_at: Option<DateTime<Utc>>,
}

impl From<&QuestionResponse> for SaveResponseResult {
    fn from(r: &QuestionResponse) -> Self {
        Self {
            saved: true,
            test_question_id: r.test_question_id,
            answered_at: r.answered_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableTestView {
    pub test_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub duration_minutes: i32,
    pub total_questions: i32,
    pub total_marks: Decimal,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub max_attempts: i32,
    pub attempts_used: i64,
    pub attempts_remaining: i64,
    pub in_progress_attempt_id: Option<Uuid>,
}

impl From<AvailableTest> for AvailableTestView {
    fn from(a: AvailableTest) -> Self {
        Self {
            test_id: a.test.id,
            title: a.test.title,
            description: a.test.description,
            instructions: a.test.instructions,
            duration_minutes: a.test.duration_minutes,
            total_questions: a.test.total_questions,
            total_marks: a.test.total_marks,
            window_start: a.test.window_start,
            window_end: a.test.window_end,
            max_attempts: a.test.max_attempts,
            attempts_used: a.attempts_used,
            attempts_remaining: a.attempts_remaining,
            in_progress_attempt_id: a.in_progress_attempt_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    pub total_score: Decimal,
    pub total_marks: Decimal,
    pub percentage: Decimal,
    pub questions_answered: i32,
    pub correct_answers: i32,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionReview {
    pub is_correct: Option<bool>,
    pub marks_obtained: Decimal,
    pub correct_answer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub test_question_id: Uuid,
    pub position: usize,
    pub sequence: i32,
    pub kind: QuestionKind,
    pub prompt: String,
    pub marks: Decimal,
    pub negative_marks: Decimal,
    pub options: Vec<ChoiceOption>,
    pub selected_option: Option<String>,
    pub answer_text: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<QuestionReview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub test_title: String,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub graded_at: Option<DateTime<Utc>>,
    pub resumed: bool,
    pub questions: Vec<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AttemptResult>,
}

/// How much of a finished attempt the reader may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Learner,
    Author,
}

impl AttemptView {
    pub fn render(detail: &AttemptDetail, audience: Audience, resumed: bool) -> Self {
        let attempt = &detail.attempt;
        let test = &detail.test;
        let completed = attempt.status.is_completed();
        let (show_result, show_review) = match audience {
            Audience::Author => (completed, completed),
            Audience::Learner => (
                completed && test.show_results_immediately,
                completed && test.allow_review,
            ),
        };

        let mut ordered: Vec<&QuestionResponse> = detail.responses.iter().collect();
        ordered.sort_by_key(|r| r.sequence);
        if test.shuffle_questions && audience == Audience::Learner {
            ordered.shuffle(&mut attempt_rng(attempt.id));
        }

        let questions = ordered
            .into_iter()
            .enumerate()
            .map(|(i, r)| question_view(r, i + 1, show_review))
            .collect();

        Self {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            test_title: test.title.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: attempt.started_at,
            due_at: attempt.due_at,
            submitted_at: attempt.submitted_at,
            graded_at: attempt.graded_at,
            resumed,
            questions,
            result: show_result.then(|| result_of(attempt, test.passing_marks_or_default())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub test_id: Uuid,
    pub learner_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub total_score: Option<Decimal>,
    pub percentage: Option<Decimal>,
}

impl AttemptSummary {
    pub fn new(attempt: &Attempt, show_scores: bool) -> Self {
        let scored = show_scores && attempt.status.is_completed();
        Self {
            attempt_id: attempt.id,
            test_id: attempt.test_id,
            learner_id: attempt.learner_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            started_at: attempt.started_at,
            due_at: attempt.due_at,
            submitted_at: attempt.submitted_at,
            total_score: scored.then_some(attempt.total_score),
            percentage: scored.then_some(attempt.percentage),
        }
    }
}

fn result_of(attempt: &Attempt, passing_marks: Decimal) -> AttemptResult {
    AttemptResult {
        total_score: attempt.total_score,
        total_marks: attempt.total_marks,
        percentage: attempt.percentage,
        questions_answered: attempt.questions_answered,
        correct_answers: attempt.correct_answers,
        passed: attempt.total_score >= passing_marks,
    }
}

fn question_view(r: &QuestionResponse, position: usize, show_review: bool) -> QuestionView {
    let snapshot = &r.question.0;
    QuestionView {
        test_question_id: r.test_question_id,
        position,
        sequence: r.sequence,
        kind: snapshot.kind(),
        prompt: snapshot.prompt.clone(),
        marks: snapshot.marks,
        negative_marks: snapshot.negative_marks,
        options: snapshot.answer_key.options(),
        selected_option: r.selected_option.clone(),
        answer_text: r.answer_text.clone(),
        answered_at: r.answered_at,
        review: show_review.then(|| QuestionReview {
            is_correct: r.is_correct,
            marks_obtained: r.marks_obtained,
            correct_answer: snapshot.answer_key.correct_answer(),
        }),
    }
}

/// Same attempt, same order, across resumes.
fn attempt_rng(attempt_id: Uuid) -> StdRng {
    let raw = attempt_id.as_u128();
    StdRng::seed_from_u64((raw >> 64) as u64 ^ raw as u64)
}
