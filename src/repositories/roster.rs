use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::learner::LearnerProfile;

/// Maps whatever identifier a caller presents to the one canonical learner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosterResolver: Send + Sync {
    /// `identifier` may be a learner id or the id of the account linked to a learner.
    async fn resolve(&self, identifier: &str) -> Result<Option<LearnerProfile>>;
}

#[derive(Clone)]
pub struct PgRosterResolver {
    pool: PgPool,
}

impl PgRosterResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RosterResolver for PgRosterResolver {
    async fn resolve(&self, identifier: &str) -> Result<Option<LearnerProfile>> {
        let Ok(id) = Uuid::parse_str(identifier.trim()) else {
            return Ok(None);
        };

        // A direct learner id match wins over an account link.
        let profile = sqlx::query_as::<_, LearnerProfile>(
            r#"
            SELECT id AS learner_id, class_id, section_id
            FROM learners
            WHERE id = $1 OR account_id = $1
            ORDER BY (id = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}
