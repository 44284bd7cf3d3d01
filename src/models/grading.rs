use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::response::{QuestionResponse, SubmittedAnswer};

/// Scores an in-progress attempt in place and moves it to `Submitted`.
///
/// Must run while the attempt row is held exclusively; the caller persists the
/// mutated attempt and responses in the same transaction. Supplied answers override
/// the autosaved payload of the matching response, unmatched ones are ignored.
///
/// A wrong auto-graded answer deducts `negative_marks` from the attempt total while
/// the response's own `marks_obtained` stays at zero.
pub fn grade(
    attempt: &mut Attempt,
    responses: &mut [QuestionResponse],
    submitted: &[SubmittedAnswer],
    now: DateTime<Utc>,
) -> Result<()> {
    attempt.ensure_in_progress()?;

    for answer in submitted {
        if let Some(response) = responses
            .iter_mut()
            .find(|r| r.test_question_id == answer.test_question_id)
        {
            response.record(&answer.payload, now);
        }
    }

    let mut total_score = Decimal::ZERO;
    let mut questions_answered = 0;
    let mut correct_answers = 0;

    for response in responses.iter_mut() {
        let answered = response.is_answered();
        let snapshot = response.question.0.clone();

        if !snapshot.kind().is_auto_graded() {
            response.auto_graded = false;
            response.is_correct = None;
            response.marks_obtained = Decimal::ZERO;
            if answered {
                questions_answered += 1;
            }
            continue;
        }

        response.auto_graded = true;
        if !answered {
            response.is_correct = None;
            response.marks_obtained = Decimal::ZERO;
            continue;
        }

        questions_answered += 1;
        let selected = response.selected_option.as_deref().unwrap_or_default();
        let is_correct = snapshot.answer_key.check(selected).unwrap_or(false);
        response.is_correct = Some(is_correct);
        if is_correct {
            total_score += snapshot.marks;
            correct_answers += 1;
            response.marks_obtained = snapshot.marks;
        } else {
            total_score -= snapshot.negative_marks;
            response.marks_obtained = Decimal::ZERO;
        }
    }

    attempt.total_score = total_score;
    attempt.questions_answered = questions_answered;
    attempt.correct_answers = correct_answers;
    attempt.percentage = percentage(total_score, attempt.total_marks);
    attempt.advance(AttemptStatus::Submitted, now)?;

    if attempt.is_late() {
        tracing::warn!(
            attempt_id = %attempt.id,
            due_at = %attempt.due_at,
            "Attempt submitted after its due time"
        );
    }

    Ok(())
}

pub fn percentage(score: Decimal, total_marks: Decimal) -> Decimal {
    if total_marks.is_zero() {
        return Decimal::ZERO;
    }
    (score / total_marks * Decimal::ONE_HUNDRED).round_dp(2)
}
