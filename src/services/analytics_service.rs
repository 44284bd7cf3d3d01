use std::cmp::Ordering;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::analytics::{LeaderboardEntry, QuestionStat, TestAnalytics};
use crate::models::attempt::Attempt;
use crate::models::response::QuestionResponse;
use crate::models::test::TestDefinition;
use crate::repositories::{AttemptRepository, TestRepository};
use crate::models::grading::percentage;

#[derive(Clone)]
pub struct AnalyticsService {
    tests: Arc<dyn TestRepository>,
    attempts: Arc<dyn AttemptRepository>,
    leaderboard_size: usize,
}

impl AnalyticsService {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        attempts: Arc<dyn AttemptRepository>,
        leaderboard_size: usize,
    ) -> Self {
        Self {
            tests,
            attempts,
            leaderboard_size,
        }
    }

    pub async fn analytics(&self, test_id: Uuid) -> Result<TestAnalytics> {
        let test = self
            .tests
            .find(test_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))?;
        let attempts = self.attempts.list_completed(test_id).await?;
        let responses = self.attempts.completed_responses(test_id).await?;
        Ok(summarize(&test, &attempts, &responses, self.leaderboard_size))
    }
}

/// Highest score first, then earliest submission, then attempt id.
fn leaderboard_order(a: &Attempt, b: &Attempt) -> Ordering {
    b.total_score
        .cmp(&a.total_score)
        .then_with(|| match (a.submitted_at, b.submitted_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Aggregates over completed attempts only; anything still in progress is skipped.
pub fn summarize(
    test: &TestDefinition,
    attempts: &[Attempt],
    responses: &[QuestionResponse],
    leaderboard_size: usize,
) -> TestAnalytics {
    let mut completed: Vec<&Attempt> = attempts
        .iter()
        .filter(|a| a.test_id == test.id && a.status.is_completed())
        .collect();
    let passing_marks = test.passing_marks_or_default();

    let total_attempts = completed.len() as i64;
    let (average_score, highest_score, lowest_score) = if completed.is_empty() {
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    } else {
        let sum: Decimal = completed.iter().map(|a| a.total_score).sum();
        let highest = completed.iter().map(|a| a.total_score).max().unwrap_or_default();
        let lowest = completed.iter().map(|a| a.total_score).min().unwrap_or_default();
        (
            (sum / Decimal::from(total_attempts)).round_dp(2),
            highest,
            lowest,
        )
    };
    let passed = completed
        .iter()
        .filter(|a| a.total_score >= passing_marks)
        .count() as i64;

    completed.sort_by(|a, b| leaderboard_order(a, b));
    let leaderboard = completed
        .iter()
        .take(leaderboard_size)
        .enumerate()
        .map(|(i, a)| LeaderboardEntry {
            rank: i + 1,
            attempt_id: a.id,
            learner_id: a.learner_id,
            total_score: a.total_score,
            percentage: a.percentage,
            submitted_at: a.submitted_at,
        })
        .collect();

    let counted: Vec<Uuid> = completed.iter().map(|a| a.id).collect();
    let questions = test
        .questions
        .iter()
        .map(|slot| {
            let rows: Vec<&QuestionResponse> = responses
                .iter()
                .filter(|r| r.test_question_id == slot.id && counted.contains(&r.attempt_id))
                .collect();
            let answered = rows.iter().filter(|r| r.is_answered()).count() as i64;
            let correct = rows.iter().filter(|r| r.is_correct == Some(true)).count() as i64;
            let auto_graded = rows
                .first()
                .map(|r| r.question.0.kind().is_auto_graded())
                .unwrap_or(true);
            let accuracy = (auto_graded && answered > 0)
                .then(|| percentage(Decimal::from(correct), Decimal::from(answered)));
            QuestionStat {
                test_question_id: slot.id,
                sequence: slot.sequence,
                answered,
                correct,
                accuracy,
            }
        })
        .collect();

    TestAnalytics {
        test_id: test.id,
        total_attempts,
        average_score,
        highest_score,
        lowest_score,
        passing_marks,
        passed,
        failed: total_attempts - passed,
        leaderboard,
        questions,
    }
}
