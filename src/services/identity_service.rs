use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::learner::LearnerProfile;
use crate::repositories::RosterResolver;

/// Resolves a caller identifier to a canonical learner once, at the request boundary.
#[derive(Clone)]
pub struct IdentityService {
    roster: Arc<dyn RosterResolver>,
}

impl IdentityService {
    pub fn new(roster: Arc<dyn RosterResolver>) -> Self {
        Self { roster }
    }

    pub async fn resolve_learner(&self, identifier: &str) -> Result<LearnerProfile> {
        self.roster.resolve(identifier).await?.ok_or_else(|| {
            tracing::warn!(identifier = %identifier, "No learner linked to caller");
            Error::Forbidden("No learner is linked to this account".to_string())
        })
    }
}
