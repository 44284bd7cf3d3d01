#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use assessment_backend::config::Config;
use assessment_backend::error::{Error, Result};
use assessment_backend::middleware::auth::Claims;
use assessment_backend::models::attempt::{plan_start, Attempt, AttemptStatus, StartPlan};
use assessment_backend::models::grading;
use assessment_backend::models::learner::LearnerProfile;
use assessment_backend::models::question::{
    AlternativeCriteria, AnswerKey, ChoiceOption, ContentQuestion,
};
use assessment_backend::models::response::{
    AnswerPayload, QuestionResponse, QuestionSnapshot, SubmittedAnswer,
};
use assessment_backend::models::test::{TestDefinition, TestDraft, TestStatus};
use assessment_backend::repositories::{
    AttemptRepository, AttemptStanding, QuestionBank, RosterResolver, StartOutcome, TestFilter,
    TestRepository,
};
use assessment_backend::AppState;

pub const JWT_SECRET: &str = "test_secret_key";

#[derive(Default)]
struct Store {
    tests: HashMap<Uuid, TestDefinition>,
    attempts: HashMap<Uuid, Attempt>,
    responses: Vec<QuestionResponse>,
    content: HashMap<Uuid, ContentQuestion>,
    /// (account id, profile)
    learners: Vec<(Uuid, LearnerProfile)>,
}

/// All four storage seams over one mutex. Every operation holds the lock for its full
/// duration, which gives the same exclusion the Postgres transactions provide.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Store>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_content(&self, question: ContentQuestion) -> ContentQuestion {
        self.inner
            .lock()
            .await
            .content
            .insert(question.id, question.clone());
        question
    }

    pub async fn remove_content(&self, id: Uuid) {
        self.inner.lock().await.content.remove(&id);
    }

    pub async fn add_learner(
        &self,
        class_id: Uuid,
        section_id: Option<Uuid>,
    ) -> (LearnerProfile, Uuid) {
        let profile = LearnerProfile {
            learner_id: Uuid::new_v4(),
            class_id,
            section_id,
        };
        let account_id = Uuid::new_v4();
        self.inner
            .lock()
            .await
            .learners
            .push((account_id, profile.clone()));
        (profile, account_id)
    }

    pub async fn response_count(&self, attempt_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .responses
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .count()
    }

    pub async fn attempt_count(&self, test_id: Uuid, learner_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .attempts
            .values()
            .filter(|a| a.test_id == test_id && a.learner_id == learner_id)
            .count()
    }
}

fn header_only(test: &TestDefinition) -> TestDefinition {
    let mut header = test.clone();
    header.questions.clear();
    header
}

#[async_trait]
impl TestRepository for MemoryStore {
    async fn insert(&self, test: &TestDefinition) -> Result<TestDefinition> {
        let mut store = self.inner.lock().await;
        if store.tests.contains_key(&test.id) {
            return Err(Error::Conflict(format!("Test {} already exists", test.id)));
        }
        store.tests.insert(test.id, test.clone());
        Ok(test.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<TestDefinition>> {
        Ok(self.inner.lock().await.tests.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &TestFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<TestDefinition>, i64)> {
        let store = self.inner.lock().await;
        let mut matching: Vec<&TestDefinition> = store
            .tests
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.subject_id.map_or(true, |s| t.subject_id == s))
            .filter(|t| filter.class_id.map_or(true, |c| t.class_id == c))
            .filter(|t| filter.created_by.map_or(true, |c| t.created_by == Some(c)))
            .filter(|t| {
                filter.search.as_ref().map_or(true, |q| {
                    t.title.to_lowercase().contains(&q.to_lowercase())
                })
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let offset = ((page - 1).max(0) * per_page) as usize;
        let items = matching
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .map(header_only)
            .collect();
        Ok((items, total))
    }

    async fn save(&self, test: &TestDefinition) -> Result<TestDefinition> {
        let mut store = self.inner.lock().await;
        let current = store
            .tests
            .get(&test.id)
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test.id)))?;
        if current.version != test.version {
            return Err(Error::Conflict(
                "Test was modified concurrently, reload and retry".to_string(),
            ));
        }
        let mut stored = test.clone();
        stored.version += 1;
        stored.updated_at = Utc::now();
        store.tests.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut store = self.inner.lock().await;
        if !store.tests.contains_key(&id) {
            return Err(Error::NotFound(format!("Test {} not found", id)));
        }
        let attempts = store.attempts.values().filter(|a| a.test_id == id).count();
        if attempts > 0 {
            return Err(Error::Conflict(format!(
                "Test has {} attempt(s) and cannot be deleted",
                attempts
            )));
        }
        store.tests.remove(&id);
        Ok(())
    }

    async fn list_open_for(
        &self,
        class_id: Uuid,
        section_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TestDefinition>> {
        let store = self.inner.lock().await;
        Ok(store
            .tests
            .values()
            .filter(|t| t.status == TestStatus::Published)
            .filter(|t| t.targets(class_id, section_id) && t.is_open_at(now))
            .map(header_only)
            .collect())
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn start(
        &self,
        test: &TestDefinition,
        learner_id: Uuid,
        snapshots: &[QuestionSnapshot],
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        let mut store = self.inner.lock().await;
        match store.tests.get(&test.id) {
            None => return Err(Error::NotFound(format!("Test {} not found", test.id))),
            Some(current) if current.status != TestStatus::Published => {
                return Err(Error::InvalidState("Test is not open for attempts".to_string()))
            }
            Some(current) if current.version != test.version => {
                return Err(Error::Conflict(
                    "Test changed while the attempt was starting, retry".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut existing: Vec<Attempt> = store
            .attempts
            .values()
            .filter(|a| a.test_id == test.id && a.learner_id == learner_id)
            .cloned()
            .collect();
        existing.sort_by_key(|a| a.attempt_number);

        let attempt_number = match plan_start(&existing, test.max_attempts)? {
            StartPlan::Resume(attempt) => {
                return Ok(StartOutcome {
                    attempt,
                    resumed: true,
                })
            }
            StartPlan::Create { attempt_number } => attempt_number,
        };

        let attempt = Attempt::begin(test, learner_id, attempt_number, now);
        for (slot, snapshot) in test.questions.iter().zip(snapshots.iter()) {
            store
                .responses
                .push(QuestionResponse::empty(attempt.id, slot, snapshot.clone()));
        }
        store.attempts.insert(attempt.id, attempt.clone());
        Ok(StartOutcome {
            attempt,
            resumed: false,
        })
    }

    async fn find(&self, id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.inner.lock().await.attempts.get(&id).cloned())
    }

    async fn responses(&self, attempt_id: Uuid) -> Result<Vec<QuestionResponse>> {
        let store = self.inner.lock().await;
        let mut rows: Vec<QuestionResponse> = store
            .responses
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.sequence);
        Ok(rows)
    }

    async fn list_for_learner(
        &self,
        learner_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<Attempt>> {
        let store = self.inner.lock().await;
        let mut rows: Vec<Attempt> = store
            .attempts
            .values()
            .filter(|a| a.learner_id == learner_id && test_id.map_or(true, |t| a.test_id == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<Attempt>> {
        let store = self.inner.lock().await;
        let mut rows: Vec<Attempt> = store
            .attempts
            .values()
            .filter(|a| a.test_id == test_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }

    async fn list_completed(&self, test_id: Uuid) -> Result<Vec<Attempt>> {
        let store = self.inner.lock().await;
        Ok(store
            .attempts
            .values()
            .filter(|a| a.test_id == test_id && a.status.is_completed())
            .cloned()
            .collect())
    }

    async fn completed_responses(&self, test_id: Uuid) -> Result<Vec<QuestionResponse>> {
        let store = self.inner.lock().await;
        Ok(store
            .responses
            .iter()
            .filter(|r| {
                store
                    .attempts
                    .get(&r.attempt_id)
                    .map_or(false, |a| a.test_id == test_id && a.status.is_completed())
            })
            .cloned()
            .collect())
    }

    async fn standings(&self, learner_id: Uuid, test_ids: &[Uuid]) -> Result<Vec<AttemptStanding>> {
        let store = self.inner.lock().await;
        let mut by_test: HashMap<Uuid, AttemptStanding> = HashMap::new();
        for attempt in store
            .attempts
            .values()
            .filter(|a| a.learner_id == learner_id && test_ids.contains(&a.test_id))
        {
            let standing = by_test.entry(attempt.test_id).or_insert(AttemptStanding {
                test_id: attempt.test_id,
                completed: 0,
                in_progress: None,
            });
            if attempt.status.is_completed() {
                standing.completed += 1;
            } else if attempt.status == AttemptStatus::InProgress {
                standing.in_progress = Some(attempt.id);
            }
        }
        Ok(by_test.into_values().collect())
    }

    async fn save_response(
        &self,
        attempt_id: Uuid,
        test_question_id: Uuid,
        payload: &AnswerPayload,
        now: DateTime<Utc>,
    ) -> Result<QuestionResponse> {
        let mut store = self.inner.lock().await;
        let attempt = store
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        attempt.ensure_in_progress()?;

        let response = store
            .responses
            .iter_mut()
            .find(|r| r.attempt_id == attempt_id && r.test_question_id == test_question_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Question {} is not part of attempt {}",
                    test_question_id, attempt_id
                ))
            })?;
        response.record(payload, now);
        Ok(response.clone())
    }

    async fn submit(
        &self,
        attempt_id: Uuid,
        answers: &[SubmittedAnswer],
        now: DateTime<Utc>,
    ) -> Result<(Attempt, Vec<QuestionResponse>)> {
        let mut store = self.inner.lock().await;
        let mut attempt = store
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;

        let mut responses: Vec<QuestionResponse> = store
            .responses
            .iter()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        responses.sort_by_key(|r| r.sequence);

        // Nothing is written back unless grading succeeds.
        grading::grade(&mut attempt, &mut responses, answers, now)?;

        store.responses.retain(|r| r.attempt_id != attempt_id);
        store.responses.extend(responses.iter().cloned());
        store.attempts.insert(attempt.id, attempt.clone());
        Ok((attempt, responses))
    }

    async fn mark_graded(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<Attempt> {
        let mut store = self.inner.lock().await;
        let attempt = store
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        attempt.advance(AttemptStatus::Graded, now)?;
        Ok(attempt.clone())
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn fetch(&self, ids: &[Uuid]) -> Result<Vec<ContentQuestion>> {
        let store = self.inner.lock().await;
        Ok(ids.iter().filter_map(|id| store.content.get(id).cloned()).collect())
    }

    async fn find_alternatives(
        &self,
        criteria: &AlternativeCriteria,
        exclude: &[Uuid],
        limit: i64,
    ) -> Result<Vec<ContentQuestion>> {
        let store = self.inner.lock().await;
        Ok(store
            .content
            .values()
            .filter(|q| {
                q.subject_id == criteria.subject_id
                    && q.class_id == criteria.class_id
                    && q.kind() == criteria.kind
                    && q.difficulty == criteria.difficulty
                    && !exclude.contains(&q.id)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RosterResolver for MemoryStore {
    async fn resolve(&self, identifier: &str) -> Result<Option<LearnerProfile>> {
        let Ok(id) = Uuid::parse_str(identifier.trim()) else {
            return Ok(None);
        };
        let store = self.inner.lock().await;
        let direct = store.learners.iter().find(|(_, p)| p.learner_id == id);
        let via_account = store.learners.iter().find(|(account, _)| *account == id);
        Ok(direct.or(via_account).map(|(_, p)| p.clone()))
    }
}

pub fn test_config() -> Config {
    Config {
        server_address: "127.0.0.1:0".to_string(),
        database_url: "postgres://unused".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        database_max_connections: 1,
        leaderboard_size: 10,
        alternatives_limit: 20,
    }
}

pub fn app_state(store: &MemoryStore) -> AppState {
    let shared = Arc::new(store.clone());
    AppState::from_repositories(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        shared,
        &test_config(),
    )
}

pub fn mcq(subject_id: Uuid, class_id: Uuid, marks: i64, negative: Decimal) -> ContentQuestion {
    ContentQuestion {
        id: Uuid::new_v4(),
        subject_id,
        class_id,
        difficulty: "medium".to_string(),
        prompt: "Pick the right option".to_string(),
        answer_key: Json(AnswerKey::MultipleChoice {
            options: vec![
                ChoiceOption {
                    id: "a".to_string(),
                    text: "Right".to_string(),
                },
                ChoiceOption {
                    id: "b".to_string(),
                    text: "Wrong".to_string(),
                },
            ],
            correct_option_id: "a".to_string(),
        }),
        marks: Decimal::new(marks, 0),
        negative_marks: negative,
    }
}

pub fn free_text(subject_id: Uuid, class_id: Uuid, marks: i64) -> ContentQuestion {
    ContentQuestion {
        id: Uuid::new_v4(),
        subject_id,
        class_id,
        difficulty: "medium".to_string(),
        prompt: "Explain your reasoning".to_string(),
        answer_key: Json(AnswerKey::FreeText),
        marks: Decimal::new(marks, 0),
        negative_marks: Decimal::ZERO,
    }
}

pub fn draft(subject_id: Uuid, class_id: Uuid) -> TestDraft {
    TestDraft {
        title: "Unit test".to_string(),
        description: None,
        instructions: None,
        subject_id,
        class_id,
        section_id: None,
        duration_minutes: 30,
        max_attempts: 1,
        passing_marks: None,
        window_start: None,
        window_end: None,
        shuffle_questions: false,
        allow_review: true,
        show_results_immediately: true,
        created_by: None,
    }
}

pub fn answer(test_question_id: Uuid, option: &str) -> SubmittedAnswer {
    SubmittedAnswer {
        test_question_id,
        payload: AnswerPayload {
            selected_option: Some(option.to_string()),
            answer_text: None,
        },
    }
}

pub fn token(sub: &str, role: Option<&str>) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
        role: role.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode token")
}

/// Sends a request through the router and returns status plus parsed JSON body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("router response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}
