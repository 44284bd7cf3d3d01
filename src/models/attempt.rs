use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::test::TestDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Graded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Graded => "graded",
        }
    }

    /// Submitted and graded attempts both count against the attempt limit.
    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptStatus::Submitted | AttemptStatus::Graded)
    }

    /// Single forward steps only.
    pub fn can_advance_to(&self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::InProgress, AttemptStatus::Submitted)
                | (AttemptStatus::Submitted, AttemptStatus::Graded)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub test_id: Uuid,
    pub learner_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub graded_at: Option<DateTime<Utc>>,
    pub total_marks: Decimal,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub questions_answered: i32,
    pub correct_answers: i32,
}

impl Attempt {
    pub fn begin(
        test: &TestDefinition,
        learner_id: Uuid,
        attempt_number: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id: test.id,
            learner_id,
            attempt_number,
            status: AttemptStatus::InProgress,
            started_at: now,
            due_at: now + Duration::minutes(test.duration_minutes as i64),
            submitted_at: None,
            graded_at: None,
            total_marks: test.total_marks,
            total_score: Decimal::ZERO,
            percentage: Decimal::ZERO,
            questions_answered: 0,
            correct_answers: 0,
        }
    }

    pub fn ensure_in_progress(&self) -> Result<()> {
        match self.status {
            AttemptStatus::InProgress => Ok(()),
            _ => Err(Error::AlreadySubmitted(self.id)),
        }
    }

    pub fn advance(&mut self, next: AttemptStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_advance_to(next) {
            if self.status.is_completed() && next == AttemptStatus::Submitted {
                return Err(Error::AlreadySubmitted(self.id));
            }
            return Err(Error::InvalidState(format!(
                "Attempt cannot move from {} to {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        match next {
            AttemptStatus::Submitted => self.submitted_at = Some(now),
            AttemptStatus::Graded => self.graded_at = Some(now),
            AttemptStatus::InProgress => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn is_late(&self) -> bool {
        self.submitted_at.map(|at| at > self.due_at).unwrap_or(false)
    }
}

/// Outcome of the check-then-create step of starting a test, evaluated while the
/// (test, learner) key is held exclusively.
#[derive(Debug, Clone)]
pub enum StartPlan {
    Resume(Attempt),
    Create { attempt_number: i32 },
}

pub fn plan_start(existing: &[Attempt], max_attempts: i32) -> Result<StartPlan> {
    if let Some(open) = existing
        .iter()
        .find(|a| a.status == AttemptStatus::InProgress)
    {
        return Ok(StartPlan::Resume(open.clone()));
    }

    let completed = existing.iter().filter(|a| a.status.is_completed()).count() as i32;
    if completed >= max_attempts {
        return Err(Error::PolicyViolation(format!(
            "Maximum attempts reached ({} of {})",
            completed, max_attempts
        )));
    }

    Ok(StartPlan::Create {
        attempt_number: completed + 1,
    })
}
