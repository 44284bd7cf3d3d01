use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::learner::LearnerProfile;
use crate::models::test::TestDefinition;
use crate::repositories::{AttemptRepository, AttemptStanding, TestRepository};

#[derive(Debug, Clone, Serialize)]
pub struct AvailableTest {
    pub test: TestDefinition,
    pub attempts_used: i64,
    pub attempts_remaining: i64,
    pub in_progress_attempt_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct AvailabilityService {
    tests: Arc<dyn TestRepository>,
    attempts: Arc<dyn AttemptRepository>,
}

impl AvailabilityService {
    pub fn new(tests: Arc<dyn TestRepository>, attempts: Arc<dyn AttemptRepository>) -> Self {
        Self { tests, attempts }
    }

    /// Published tests for the learner's class and section, open at `now`, where the
    /// learner still has attempts left.
    pub async fn list_available(
        &self,
        learner: &LearnerProfile,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailableTest>> {
        let candidates = self
            .tests
            .list_open_for(learner.class_id, learner.section_id, now)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
        let standings: HashMap<Uuid, AttemptStanding> = self
            .attempts
            .standings(learner.learner_id, &ids)
            .await?
            .into_iter()
            .map(|s| (s.test_id, s))
            .collect();

        Ok(filter_available(candidates, &standings, learner, now))
    }
}

fn filter_available(
    candidates: Vec<TestDefinition>,
    standings: &HashMap<Uuid, AttemptStanding>,
    learner: &LearnerProfile,
    now: DateTime<Utc>,
) -> Vec<AvailableTest> {
    candidates
        .into_iter()
        // The store already filters; re-checking keeps the result independent of it.
        .filter(|t| t.targets(learner.class_id, learner.section_id) && t.is_open_at(now))
        .filter_map(|test| {
            let standing = standings.get(&test.id);
            let used = standing.map(|s| s.completed).unwrap_or(0);
            let max = test.max_attempts as i64;
            if used >= max {
                return None;
            }
            Some(AvailableTest {
                attempts_used: used,
                attempts_remaining: max - used,
                in_progress_attempt_id: standing.and_then(|s| s.in_progress),
                test,
            })
        })
        .collect()
}
