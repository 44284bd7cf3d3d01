use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAnalytics {
    pub test_id: Uuid,
    pub total_attempts: i64,
    pub average_score: Decimal,
    pub highest_score: Decimal,
    pub lowest_score: Decimal,
    pub passing_marks: Decimal,
    pub passed: i64,
    pub failed: i64,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub questions: Vec<QuestionStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub attempt_id: Uuid,
    pub learner_id: Uuid,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStat {
    pub test_question_id: Uuid,
    pub sequence: i32,
    pub answered: i64,
    pub correct: i64,
    /// Percentage of answers judged correct; `None` for free text.
    pub accuracy: Option<Decimal>,
}
