use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::test::{TestDefinition, TestQuestion, TestStatus};

pub(crate) const COLUMNS: &str = "\
    id, title, description, instructions, subject_id, class_id, section_id, \
    duration_minutes, max_attempts, passing_marks, window_start, window_end, \
    shuffle_questions, allow_review, show_results_immediately, status, total_marks, \
    total_questions, version, created_by, published_at, closed_at, created_at, updated_at";

const QUESTION_COLUMNS: &str =
    "id, test_id, sequence, content_question_id, marks, negative_marks";

#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pub status: Option<TestStatus>,
    pub subject_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub search: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TestRepository: Send + Sync {
    async fn insert(&self, test: &TestDefinition) -> Result<TestDefinition>;

    /// Loads the header and its ordered question set.
    async fn find(&self, id: Uuid) -> Result<Option<TestDefinition>>;

    /// Headers only; `questions` is left empty.
    async fn list(
        &self,
        filter: &TestFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<TestDefinition>, i64)>;

    /// Writes header and question set together if `test.version` is still current.
    /// Returns the stored definition with its version bumped.
    async fn save(&self, test: &TestDefinition) -> Result<TestDefinition>;

    /// Fails with `Conflict` while any attempt references the test.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Published tests targeting the class/section and open at `now`. Headers only.
    async fn list_open_for(
        &self,
        class_id: Uuid,
        section_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TestDefinition>>;
}

#[derive(Clone)]
pub struct PgTestRepository {
    pool: PgPool,
}

impl PgTestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_questions(&self, test_id: Uuid) -> Result<Vec<TestQuestion>> {
        let questions = sqlx::query_as::<_, TestQuestion>(&format!(
            "SELECT {} FROM online_test_questions WHERE test_id = $1 ORDER BY sequence",
            QUESTION_COLUMNS
        ))
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }
}

async fn upsert_questions(
    tx: &mut Transaction<'_, Postgres>,
    test_id: Uuid,
    questions: &[TestQuestion],
) -> Result<()> {
    let keep: Vec<Uuid> = questions.iter().map(|q| q.id).collect();
    sqlx::query("DELETE FROM online_test_questions WHERE test_id = $1 AND NOT (id = ANY($2))")
        .bind(test_id)
        .bind(&keep)
        .execute(&mut **tx)
        .await?;

    for q in questions {
        sqlx::query(
            r#"
            INSERT INTO online_test_questions (
                id, test_id, sequence, content_question_id, marks, negative_marks
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET sequence = EXCLUDED.sequence,
                content_question_id = EXCLUDED.content_question_id,
                marks = EXCLUDED.marks,
                negative_marks = EXCLUDED.negative_marks
            "#,
        )
        .bind(q.id)
        .bind(test_id)
        .bind(q.sequence)
        .bind(q.content_question_id)
        .bind(q.marks)
        .bind(q.negative_marks)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl TestRepository for PgTestRepository {
    async fn insert(&self, test: &TestDefinition) -> Result<TestDefinition> {
        let mut tx = self.pool.begin().await?;

        let mut stored = sqlx::query_as::<_, TestDefinition>(&format!(
            r#"
            INSERT INTO online_tests (
                id, title, description, instructions, subject_id, class_id, section_id,
                duration_minutes, max_attempts, passing_marks, window_start, window_end,
                shuffle_questions, allow_review, show_results_immediately, status, total_marks,
                total_questions, version, created_by, published_at, closed_at, created_at,
                updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
            )
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(test.id)
        .bind(&test.title)
        .bind(&test.description)
        .bind(&test.instructions)
        .bind(test.subject_id)
        .bind(test.class_id)
        .bind(test.section_id)
        .bind(test.duration_minutes)
        .bind(test.max_attempts)
        .bind(test.passing_marks)
        .bind(test.window_start)
        .bind(test.window_end)
        .bind(test.shuffle_questions)
        .bind(test.allow_review)
        .bind(test.show_results_immediately)
        .bind(test.status)
        .bind(test.total_marks)
        .bind(test.total_questions)
        .bind(test.version)
        .bind(test.created_by)
        .bind(test.published_at)
        .bind(test.closed_at)
        .bind(test.created_at)
        .bind(test.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        upsert_questions(&mut tx, test.id, &test.questions).await?;
        tx.commit().await?;

        stored.questions = test.questions.clone();
        Ok(stored)
    }

    async fn find(&self, id: Uuid) -> Result<Option<TestDefinition>> {
        let test = sqlx::query_as::<_, TestDefinition>(&format!(
            "SELECT {} FROM online_tests WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match test {
            Some(mut test) => {
                test.questions = self.load_questions(id).await?;
                Ok(Some(test))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &TestFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<TestDefinition>, i64)> {
        let offset = (page - 1).max(0) * per_page;
        let search = filter.search.as_ref().map(|s| format!("%{}%", s));
        let predicate = r#"
            WHERE ($1::test_status IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR subject_id = $2)
              AND ($3::uuid IS NULL OR class_id = $3)
              AND ($4::uuid IS NULL OR created_by = $4)
              AND ($5::text IS NULL OR title ILIKE $5 OR description ILIKE $5)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM online_tests {}",
            predicate
        ))
        .bind(filter.status)
        .bind(filter.subject_id)
        .bind(filter.class_id)
        .bind(filter.created_by)
        .bind(&search)
        .fetch_one(&self.pool)
        .await?;

        let tests = sqlx::query_as::<_, TestDefinition>(&format!(
            "SELECT {} FROM online_tests {} ORDER BY created_at DESC LIMIT $6 OFFSET $7",
            COLUMNS, predicate
        ))
        .bind(filter.status)
        .bind(filter.subject_id)
        .bind(filter.class_id)
        .bind(filter.created_by)
        .bind(&search)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((tests, total))
    }

    async fn save(&self, test: &TestDefinition) -> Result<TestDefinition> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, TestDefinition>(&format!(
            r#"
            UPDATE online_tests
            SET title = $3,
                description = $4,
                instructions = $5,
                subject_id = $6,
                class_id = $7,
                section_id = $8,
                duration_minutes = $9,
                max_attempts = $10,
                passing_marks = $11,
                window_start = $12,
                window_end = $13,
                shuffle_questions = $14,
                allow_review = $15,
                show_results_immediately = $16,
                status = $17,
                total_marks = $18,
                total_questions = $19,
                published_at = $20,
                closed_at = $21,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(test.id)
        .bind(test.version)
        .bind(&test.title)
        .bind(&test.description)
        .bind(&test.instructions)
        .bind(test.subject_id)
        .bind(test.class_id)
        .bind(test.section_id)
        .bind(test.duration_minutes)
        .bind(test.max_attempts)
        .bind(test.passing_marks)
        .bind(test.window_start)
        .bind(test.window_end)
        .bind(test.shuffle_questions)
        .bind(test.allow_review)
        .bind(test.show_results_immediately)
        .bind(test.status)
        .bind(test.total_marks)
        .bind(test.total_questions)
        .bind(test.published_at)
        .bind(test.closed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut updated) = updated else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM online_tests WHERE id = $1)")
                    .bind(test.id)
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(if exists {
                Error::Conflict("Test was modified concurrently, reload and retry".to_string())
            } else {
                Error::NotFound(format!("Test {} not found", test.id))
            });
        };

        upsert_questions(&mut tx, test.id, &test.questions).await?;
        tx.commit().await?;

        updated.questions = test.questions.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM online_tests WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(Error::NotFound(format!("Test {} not found", id)));
        }

        let attempts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM test_attempts WHERE test_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if attempts > 0 {
            return Err(Error::Conflict(format!(
                "Test has {} attempt(s) and cannot be deleted",
                attempts
            )));
        }

        sqlx::query("DELETE FROM online_tests WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_open_for(
        &self,
        class_id: Uuid,
        section_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TestDefinition>> {
        let tests = sqlx::query_as::<_, TestDefinition>(&format!(
            r#"
            SELECT {} FROM online_tests
            WHERE status = 'published'
              AND class_id = $1
              AND (section_id IS NULL OR section_id = $2)
              AND (window_start IS NULL OR window_start <= $3)
              AND (window_end IS NULL OR window_end >= $3)
            ORDER BY window_end ASC NULLS LAST, created_at DESC
            "#,
            COLUMNS
        ))
        .bind(class_id)
        .bind(section_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tests)
    }
}
