use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::question::{AlternativeCriteria, ContentQuestion};

const COLUMNS: &str =
    "id, subject_id, class_id, difficulty, prompt, answer_key, marks, negative_marks";

/// Read side of the platform's question bank. It is the only source of marks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Questions for the given ids, in no particular order. Missing ids are simply absent.
    async fn fetch(&self, ids: &[Uuid]) -> Result<Vec<ContentQuestion>>;

    async fn find_alternatives(
        &self,
        criteria: &AlternativeCriteria,
        exclude: &[Uuid],
        limit: i64,
    ) -> Result<Vec<ContentQuestion>>;
}

#[derive(Clone)]
pub struct PgQuestionBank {
    pool: PgPool,
}

impl PgQuestionBank {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionBank for PgQuestionBank {
    async fn fetch(&self, ids: &[Uuid]) -> Result<Vec<ContentQuestion>> {
        let rows = sqlx::query_as::<_, ContentQuestion>(&format!(
            "SELECT {} FROM question_bank WHERE id = ANY($1)",
            COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_alternatives(
        &self,
        criteria: &AlternativeCriteria,
        exclude: &[Uuid],
        limit: i64,
    ) -> Result<Vec<ContentQuestion>> {
        let rows = sqlx::query_as::<_, ContentQuestion>(&format!(
            r#"
            SELECT {} FROM question_bank
            WHERE subject_id = $1
              AND class_id = $2
              AND answer_key->>'type' = $3
              AND difficulty = $4
              AND NOT (id = ANY($5))
            ORDER BY created_at DESC
            LIMIT $6
            "#,
            COLUMNS
        ))
        .bind(criteria.subject_id)
        .bind(criteria.class_id)
        .bind(criteria.kind.as_str())
        .bind(&criteria.difficulty)
        .bind(exclude)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
