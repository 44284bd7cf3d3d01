pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::repositories::{
    AttemptRepository, PgAttemptRepository, PgQuestionBank, PgRosterResolver, PgTestRepository,
    QuestionBank, RosterResolver, TestRepository,
};
use crate::services::{
    analytics_service::AnalyticsService, attempt_service::AttemptService,
    availability_service::AvailabilityService, identity_service::IdentityService,
    test_service::TestService,
};

#[derive(Clone)]
pub struct AppState {
    pub test_service: TestService,
    pub attempt_service: AttemptService,
    pub availability_service: AvailabilityService,
    pub analytics_service: AnalyticsService,
    pub identity_service: IdentityService,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self::from_repositories(
            Arc::new(PgTestRepository::new(pool.clone())),
            Arc::new(PgAttemptRepository::new(pool.clone())),
            Arc::new(PgQuestionBank::new(pool.clone())),
            Arc::new(PgRosterResolver::new(pool)),
            config,
        )
    }

    /// Wires the services over any storage backend.
    pub fn from_repositories(
        tests: Arc<dyn TestRepository>,
        attempts: Arc<dyn AttemptRepository>,
        bank: Arc<dyn QuestionBank>,
        roster: Arc<dyn RosterResolver>,
        config: &Config,
    ) -> Self {
        Self {
            test_service: TestService::new(tests.clone(), bank.clone(), config.alternatives_limit),
            attempt_service: AttemptService::new(tests.clone(), attempts.clone(), bank),
            availability_service: AvailabilityService::new(tests.clone(), attempts.clone()),
            analytics_service: AnalyticsService::new(tests, attempts, config.leaderboard_size),
            identity_service: IdentityService::new(roster),
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
        }
    }
}
