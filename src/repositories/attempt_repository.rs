use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::attempt::{plan_start, Attempt, AttemptStatus, StartPlan};
use crate::models::grading;
use crate::models::response::{AnswerPayload, QuestionResponse, QuestionSnapshot, SubmittedAnswer};
use crate::models::test::{TestDefinition, TestStatus};

pub(crate) const COLUMNS: &str = "\
    id, test_id, learner_id, attempt_number, status, started_at, due_at, submitted_at, \
    graded_at, total_marks, total_score, percentage, questions_answered, correct_answers";

const RESPONSE_COLUMNS: &str = "\
    id, attempt_id, test_question_id, sequence, question, selected_option, answer_text, \
    is_correct, marks_obtained, answered_at, auto_graded";

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub attempt: Attempt,
    pub resumed: bool,
}

/// A learner's standing on one test, as needed by the availability gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct AttemptStanding {
    pub test_id: Uuid,
    pub completed: i64,
    pub in_progress: Option<Uuid>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Resumes the open attempt for (test, learner) or creates the next one with an
    /// empty response per question, all under mutual exclusion on that key.
    /// `snapshots` align index-for-index with `test.questions`.
    async fn start(
        &self,
        test: &TestDefinition,
        learner_id: Uuid,
        snapshots: &[QuestionSnapshot],
        now: DateTime<Utc>,
    ) -> Result<StartOutcome>;

    async fn find(&self, id: Uuid) -> Result<Option<Attempt>>;

    async fn responses(&self, attempt_id: Uuid) -> Result<Vec<QuestionResponse>>;

    async fn list_for_learner(
        &self,
        learner_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<Attempt>>;

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<Attempt>>;

    /// Submitted and graded attempts of a test.
    async fn list_completed(&self, test_id: Uuid) -> Result<Vec<Attempt>>;

    /// Responses belonging to submitted and graded attempts of a test.
    async fn completed_responses(&self, test_id: Uuid) -> Result<Vec<QuestionResponse>>;

    async fn standings(&self, learner_id: Uuid, test_ids: &[Uuid]) -> Result<Vec<AttemptStanding>>;

    async fn save_response(
        &self,
        attempt_id: Uuid,
        test_question_id: Uuid,
        payload: &AnswerPayload,
        now: DateTime<Utc>,
    ) -> Result<QuestionResponse>;

    /// Grades and submits atomically. The attempt row is locked for the whole step so a
    /// concurrent duplicate sees `AlreadySubmitted`.
    async fn submit(
        &self,
        attempt_id: Uuid,
        answers: &[SubmittedAnswer],
        now: DateTime<Utc>,
    ) -> Result<(Attempt, Vec<QuestionResponse>)>;

    async fn mark_graded(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt>;
}

#[derive(Clone)]
pub struct PgAttemptRepository {
    pool: PgPool,
}

impl PgAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_attempt(tx: &mut Transaction<'_, Postgres>, attempt_id: Uuid) -> Result<Attempt> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {} FROM test_attempts WHERE id = $1 FOR UPDATE",
        COLUMNS
    ))
    .bind(attempt_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
}

async fn insert_attempt(tx: &mut Transaction<'_, Postgres>, attempt: &Attempt) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO test_attempts (
            id, test_id, learner_id, attempt_number, status, started_at, due_at, submitted_at,
            graded_at, total_marks, total_score, percentage, questions_answered, correct_answers
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(attempt.id)
    .bind(attempt.test_id)
    .bind(attempt.learner_id)
    .bind(attempt.attempt_number)
    .bind(attempt.status)
    .bind(attempt.started_at)
    .bind(attempt.due_at)
    .bind(attempt.submitted_at)
    .bind(attempt.graded_at)
    .bind(attempt.total_marks)
    .bind(attempt.total_score)
    .bind(attempt.percentage)
    .bind(attempt.questions_answered)
    .bind(attempt.correct_answers)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_attempt_outcome(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &Attempt,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE test_attempts
        SET status = $2, submitted_at = $3, graded_at = $4, total_score = $5, percentage = $6,
            questions_answered = $7, correct_answers = $8, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(attempt.id)
    .bind(attempt.status)
    .bind(attempt.submitted_at)
    .bind(attempt.graded_at)
    .bind(attempt.total_score)
    .bind(attempt.percentage)
    .bind(attempt.questions_answered)
    .bind(attempt.correct_answers)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_response(
    tx: &mut Transaction<'_, Postgres>,
    response: &QuestionResponse,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE attempt_responses
        SET selected_option = $2, answer_text = $3, is_correct = $4, marks_obtained = $5,
            answered_at = $6, auto_graded = $7
        WHERE id = $1
        "#,
    )
    .bind(response.id)
    .bind(&response.selected_option)
    .bind(&response.answer_text)
    .bind(response.is_correct)
    .bind(response.marks_obtained)
    .bind(response.answered_at)
    .bind(response.auto_graded)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl AttemptRepository for PgAttemptRepository {
    async fn start(
        &self,
        test: &TestDefinition,
        learner_id: Uuid,
        snapshots: &[QuestionSnapshot],
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        if snapshots.len() != test.questions.len() {
            return Err(Error::Internal(
                "Question snapshots do not match the test's question set".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("attempt:{}:{}", test.id, learner_id))
            .execute(&mut *tx)
            .await?;

        // Holds off deletion and edits of the test until the attempt exists.
        let current: Option<(TestStatus, i32)> = sqlx::query_as(
            "SELECT status, version FROM online_tests WHERE id = $1 FOR SHARE",
        )
        .bind(test.id)
        .fetch_optional(&mut *tx)
        .await?;
        match current {
            None => return Err(Error::NotFound(format!("Test {} not found", test.id))),
            Some((status, _)) if status != TestStatus::Published => {
                return Err(Error::InvalidState(format!(
                    "Test is not open for attempts (test is {})",
                    status.as_str()
                )))
            }
            Some((_, version)) if version != test.version => {
                return Err(Error::Conflict(
                    "Test changed while the attempt was starting, retry".to_string(),
                ))
            }
            Some(_) => {}
        }

        let existing = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {} FROM test_attempts \
             WHERE test_id = $1 AND learner_id = $2 ORDER BY attempt_number",
            COLUMNS
        ))
        .bind(test.id)
        .bind(learner_id)
        .fetch_all(&mut *tx)
        .await?;

        let attempt_number = match plan_start(&existing, test.max_attempts)? {
            StartPlan::Resume(attempt) => {
                tx.commit().await?;
                return Ok(StartOutcome {
                    attempt,
                    resumed: true,
                });
            }
            StartPlan::Create { attempt_number } => attempt_number,
        };

        let attempt = Attempt::begin(test, learner_id, attempt_number, now);
        insert_attempt(&mut tx, &attempt).await?;

        for (slot, snapshot) in test.questions.iter().zip(snapshots.iter()) {
            let response = QuestionResponse::empty(attempt.id, slot, snapshot.clone());
            sqlx::query(
                r#"
                INSERT INTO attempt_responses (
                    id, attempt_id, test_question_id, sequence, question, selected_option,
                    answer_text, is_correct, marks_obtained, answered_at, auto_graded
                ) VALUES ($1, $2, $3, $4, $5, NULL, NULL, NULL, $6, NULL, FALSE)
                "#,
            )
            .bind(response.id)
            .bind(response.attempt_id)
            .bind(response.test_question_id)
            .bind(response.sequence)
            .bind(&response.question)
            .bind(response.marks_obtained)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(StartOutcome {
            attempt,
            resumed: false,
        })
    }

    async fn find(&self, id: Uuid) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {} FROM test_attempts WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempt)
    }

    async fn responses(&self, attempt_id: Uuid) -> Result<Vec<QuestionResponse>> {
        let rows = sqlx::query_as::<_, QuestionResponse>(&format!(
            "SELECT {} FROM attempt_responses WHERE attempt_id = $1 ORDER BY sequence",
            RESPONSE_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_learner(
        &self,
        learner_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, Attempt>(&format!(
            r#"
            SELECT {} FROM test_attempts
            WHERE learner_id = $1 AND ($2::uuid IS NULL OR test_id = $2)
            ORDER BY started_at DESC
            "#,
            COLUMNS
        ))
        .bind(learner_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {} FROM test_attempts WHERE test_id = $1 ORDER BY started_at DESC",
            COLUMNS
        ))
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_completed(&self, test_id: Uuid) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, Attempt>(&format!(
            r#"
            SELECT {} FROM test_attempts
            WHERE test_id = $1 AND status IN ('submitted', 'graded')
            ORDER BY submitted_at ASC
            "#,
            COLUMNS
        ))
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn completed_responses(&self, test_id: Uuid) -> Result<Vec<QuestionResponse>> {
        let rows = sqlx::query_as::<_, QuestionResponse>(
            r#"
            SELECT r.id, r.attempt_id, r.test_question_id, r.sequence, r.question,
                   r.selected_option, r.answer_text, r.is_correct, r.marks_obtained,
                   r.answered_at, r.auto_graded
            FROM attempt_responses r
            JOIN test_attempts a ON a.id = r.attempt_id
            WHERE a.test_id = $1 AND a.status IN ('submitted', 'graded')
            ORDER BY r.sequence
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn standings(&self, learner_id: Uuid, test_ids: &[Uuid]) -> Result<Vec<AttemptStanding>> {
        let rows = sqlx::query_as::<_, AttemptStanding>(
            r#"
            SELECT test_id,
                   COUNT(*) FILTER (WHERE status IN ('submitted', 'graded')) AS completed,
                   (ARRAY_AGG(id) FILTER (WHERE status = 'in_progress'))[1] AS in_progress
            FROM test_attempts
            WHERE learner_id = $1 AND test_id = ANY($2)
            GROUP BY test_id
            "#,
        )
        .bind(learner_id)
        .bind(test_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save_response(
        &self,
        attempt_id: Uuid,
        test_question_id: Uuid,
        payload: &AnswerPayload,
        now: DateTime<Utc>,
    ) -> Result<QuestionResponse> {
        let mut tx = self.pool.begin().await?;

        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        attempt.ensure_in_progress()?;

        let mut response = sqlx::query_as::<_, QuestionResponse>(&format!(
            "SELECT {} FROM attempt_responses \
             WHERE attempt_id = $1 AND test_question_id = $2 FOR UPDATE",
            RESPONSE_COLUMNS
        ))
        .bind(attempt_id)
        .bind(test_question_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "Question {} is not part of attempt {}",
                test_question_id, attempt_id
            ))
        })?;

        response.record(payload, now);
        write_response(&mut tx, &response).await?;
        tx.commit().await?;
        Ok(response)
    }

    async fn submit(
        &self,
        attempt_id: Uuid,
        answers: &[SubmittedAnswer],
        now: DateTime<Utc>,
    ) -> Result<(Attempt, Vec<QuestionResponse>)> {
        let mut tx = self.pool.begin().await?;

        let mut attempt = lock_attempt(&mut tx, attempt_id).await?;
        attempt.ensure_in_progress()?;

        let mut responses = sqlx::query_as::<_, QuestionResponse>(&format!(
            "SELECT {} FROM attempt_responses WHERE attempt_id = $1 ORDER BY sequence FOR UPDATE",
            RESPONSE_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?;

        grading::grade(&mut attempt, &mut responses, answers, now)?;

        for response in &responses {
            write_response(&mut tx, response).await?;
        }
        write_attempt_outcome(&mut tx, &attempt).await?;
        tx.commit().await?;

        Ok((attempt, responses))
    }

    async fn mark_graded(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;
        let mut attempt = lock_attempt(&mut tx, attempt_id).await?;
        attempt.advance(AttemptStatus::Graded, now)?;
        write_attempt_outcome(&mut tx, &attempt).await?;
        tx.commit().await?;
        Ok(attempt)
    }
}
