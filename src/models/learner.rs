use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A learner as resolved by the roster: one canonical id plus class placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LearnerProfile {
    pub learner_id: Uuid,
    pub class_id: Uuid,
    pub section_id: Option<Uuid>,
}
