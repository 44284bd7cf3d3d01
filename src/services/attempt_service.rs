use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::learner::LearnerProfile;
use crate::models::response::{AnswerPayload, QuestionResponse, QuestionSnapshot, SubmittedAnswer};
use crate::models::test::TestDefinition;
use crate::repositories::{AttemptRepository, QuestionBank, TestRepository};

/// An attempt together with what is needed to render it.
#[derive(Debug, Clone)]
pub struct AttemptDetail {
    pub attempt: Attempt,
    pub test: TestDefinition,
    pub responses: Vec<QuestionResponse>,
}

#[derive(Clone)]
pub struct AttemptService {
    tests: Arc<dyn TestRepository>,
    attempts: Arc<dyn AttemptRepository>,
    bank: Arc<dyn QuestionBank>,
}

impl AttemptService {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        attempts: Arc<dyn AttemptRepository>,
        bank: Arc<dyn QuestionBank>,
    ) -> Self {
        Self {
            tests,
            attempts,
            bank,
        }
    }

    /// Starts the learner's next attempt or resumes the one in progress.
    /// Returns the attempt detail and whether it was resumed.
    pub async fn start_attempt(
        &self,
        test_id: Uuid,
        learner: &LearnerProfile,
    ) -> Result<(AttemptDetail, bool)> {
        let now = Utc::now();
        let test = self.load_test(test_id).await?;

        if let Err(err) = test.ensure_startable(now) {
            tracing::warn!(
                test_id = %test_id,
                learner_id = %learner.learner_id,
                error = %err,
                "Attempt start rejected"
            );
            return Err(err);
        }
        if !test.targets(learner.class_id, learner.section_id) {
            return Err(Error::PolicyViolation(
                "This test is not assigned to your class".to_string(),
            ));
        }

        // Resuming needs no snapshot work; the locked path below re-checks anyway.
        let open = self
            .attempts
            .list_for_learner(learner.learner_id, Some(test_id))
            .await?
            .into_iter()
            .find(|a| a.status == AttemptStatus::InProgress);
        if let Some(attempt) = open {
            let responses = self.attempts.responses(attempt.id).await?;
            tracing::info!(attempt_id = %attempt.id, "Attempt resumed");
            return Ok((
                AttemptDetail {
                    attempt,
                    test,
                    responses,
                },
                true,
            ));
        }

        let snapshots = self.snapshot_questions(&test).await?;
        let outcome = self
            .attempts
            .start(&test, learner.learner_id, &snapshots, now)
            .await?;
        let responses = self.attempts.responses(outcome.attempt.id).await?;

        if outcome.resumed {
            tracing::info!(attempt_id = %outcome.attempt.id, "Attempt resumed");
        } else {
            tracing::info!(
                attempt_id = %outcome.attempt.id,
                test_id = %test_id,
                learner_id = %learner.learner_id,
                attempt_number = outcome.attempt.attempt_number,
                "Attempt started"
            );
        }

        Ok((
            AttemptDetail {
                attempt: outcome.attempt,
                test,
                responses,
            },
            outcome.resumed,
        ))
    }

    pub async fn save_response(
        &self,
        attempt_id: Uuid,
        learner_id: Uuid,
        test_question_id: Uuid,
        payload: AnswerPayload,
    ) -> Result<QuestionResponse> {
        self.owned_attempt(attempt_id, learner_id).await?;
        self.attempts
            .save_response(attempt_id, test_question_id, &payload, Utc::now())
            .await
    }

    pub async fn submit(
        &self,
        attempt_id: Uuid,
        learner_id: Uuid,
        answers: Vec<SubmittedAnswer>,
    ) -> Result<AttemptDetail> {
        let attempt = self.owned_attempt(attempt_id, learner_id).await?;
        let test = self.load_test(attempt.test_id).await?;

        let graded = self.attempts.submit(attempt_id, &answers, Utc::now()).await;
        let (attempt, responses) = match graded {
            Ok(graded) => graded,
            Err(err @ Error::AlreadySubmitted(_)) => {
                tracing::warn!(attempt_id = %attempt_id, "Duplicate submission rejected");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            attempt_id = %attempt.id,
            total_score = %attempt.total_score,
            percentage = %attempt.percentage,
            questions_answered = attempt.questions_answered,
            correct_answers = attempt.correct_answers,
            "Attempt submitted"
        );

        Ok(AttemptDetail {
            attempt,
            test,
            responses,
        })
    }

    /// Any attempt, for authors.
    pub async fn get_attempt(&self, attempt_id: Uuid) -> Result<AttemptDetail> {
        let attempt = self.load_attempt(attempt_id).await?;
        self.detail(attempt).await
    }

    pub async fn get_learner_attempt(
        &self,
        attempt_id: Uuid,
        learner_id: Uuid,
    ) -> Result<AttemptDetail> {
        let attempt = self.owned_attempt(attempt_id, learner_id).await?;
        self.detail(attempt).await
    }

    pub async fn list_learner_attempts(
        &self,
        learner_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<Attempt>> {
        self.attempts.list_for_learner(learner_id, test_id).await
    }

    pub async fn list_test_attempts(&self, test_id: Uuid) -> Result<Vec<Attempt>> {
        self.load_test(test_id).await?;
        self.attempts.list_for_test(test_id).await
    }

    pub async fn mark_graded(&self, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = self.attempts.mark_graded(attempt_id, Utc::now()).await?;
        tracing::info!(attempt_id = %attempt_id, "Attempt marked graded");
        Ok(attempt)
    }

    async fn detail(&self, attempt: Attempt) -> Result<AttemptDetail> {
        let test = self.load_test(attempt.test_id).await?;
        let responses = self.attempts.responses(attempt.id).await?;
        Ok(AttemptDetail {
            attempt,
            test,
            responses,
        })
    }

    async fn load_test(&self, test_id: Uuid) -> Result<TestDefinition> {
        self.tests
            .find(test_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
    }

    async fn load_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.attempts
            .find(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    async fn owned_attempt(&self, attempt_id: Uuid, learner_id: Uuid) -> Result<Attempt> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.learner_id != learner_id {
            tracing::warn!(
                attempt_id = %attempt_id,
                learner_id = %learner_id,
                "Learner tried to access another learner's attempt"
            );
            return Err(Error::Forbidden(
                "This attempt belongs to another learner".to_string(),
            ));
        }
        Ok(attempt)
    }

    /// One snapshot per test question, in question order.
    async fn snapshot_questions(&self, test: &TestDefinition) -> Result<Vec<QuestionSnapshot>> {
        let ids: Vec<Uuid> = test.questions.iter().map(|q| q.content_question_id).collect();
        let content: HashMap<Uuid, _> = self
            .bank
            .fetch(&ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        test.questions
            .iter()
            .map(|slot| {
                content
                    .get(&slot.content_question_id)
                    .map(|c| QuestionSnapshot::capture(slot, c))
                    .ok_or_else(|| {
                        Error::InvalidState(format!(
                            "Question {} no longer exists in the question bank",
                            slot.content_question_id
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{AnswerKey, ContentQuestion};
    use crate::models::test::{TestDraft, TestStatus};
    use crate::repositories::attempt_repository::MockAttemptRepository;
    use crate::repositories::question_bank::MockQuestionBank;
    use crate::repositories::test_repository::MockTestRepository;
    use crate::repositories::StartOutcome;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    fn content(class_id: Uuid) -> ContentQuestion {
        ContentQuestion {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            class_id,
            difficulty: "easy".into(),
            prompt: "2 + 2?".into(),
            answer_key: Json(AnswerKey::TrueFalse { correct: true }),
            marks: Decimal::new(2, 0),
            negative_marks: Decimal::ZERO,
        }
    }

    fn published(content: &[ContentQuestion], class_id: Uuid) -> TestDefinition {
        let mut test = TestDefinition::new_draft(
            TestDraft {
                title: "Arithmetic".into(),
                description: None,
                instructions: None,
                subject_id: Uuid::new_v4(),
                class_id,
                section_id: None,
                duration_minutes: 10,
                max_attempts: 1,
                passing_marks: None,
                window_start: None,
                window_end: None,
                shuffle_questions: false,
                allow_review: false,
                show_results_immediately: false,
                created_by: None,
            },
            content,
            Utc::now(),
        );
        test.status = TestStatus::Published;
        test
    }

    fn learner(class_id: Uuid) -> LearnerProfile {
        LearnerProfile {
            learner_id: Uuid::new_v4(),
            class_id,
            section_id: None,
        }
    }

    fn service(
        tests: MockTestRepository,
        attempts: MockAttemptRepository,
        bank: MockQuestionBank,
    ) -> AttemptService {
        AttemptService::new(Arc::new(tests), Arc::new(attempts), Arc::new(bank))
    }

    #[tokio::test]
    async fn start_rejects_other_class() {
        let class_id = Uuid::new_v4();
        let test = published(&[content(class_id)], class_id);
        let test_id = test.id;

        let mut tests = MockTestRepository::new();
        tests.expect_find().returning(move |_| Ok(Some(test.clone())));
        let mut attempts = MockAttemptRepository::new();
        attempts.expect_start().never();

        let err = service(tests, attempts, MockQuestionBank::new())
            .start_attempt(test_id, &learner(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn start_rejects_draft() {
        let class_id = Uuid::new_v4();
        let mut test = published(&[content(class_id)], class_id);
        test.status = TestStatus::Draft;
        let test_id = test.id;

        let mut tests = MockTestRepository::new();
        tests.expect_find().returning(move |_| Ok(Some(test.clone())));

        let err = service(tests, MockAttemptRepository::new(), MockQuestionBank::new())
            .start_attempt(test_id, &learner(class_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn start_snapshots_questions_in_order() {
        let class_id = Uuid::new_v4();
        let first = content(class_id);
        let second = content(class_id);
        let test = published(&[first.clone(), second.clone()], class_id);
        let test_id = test.id;
        let learner = learner(class_id);

        let mut tests = MockTestRepository::new();
        let found = test.clone();
        tests.expect_find().returning(move |_| Ok(Some(found.clone())));

        let mut bank = MockQuestionBank::new();
        // Bank order differs from test order.
        let bank_rows = vec![second.clone(), first.clone()];
        bank.expect_fetch().returning(move |_| Ok(bank_rows.clone()));

        let mut attempts = MockAttemptRepository::new();
        attempts
            .expect_list_for_learner()
            .returning(|_, _| Ok(vec![]));
        let (first_id, second_id) = (first.id, second.id);
        attempts
            .expect_start()
            .withf(move |_, _, snapshots, _| {
                snapshots.len() == 2
                    && snapshots[0].content_question_id == first_id
                    && snapshots[1].content_question_id == second_id
            })
            .returning(|test, learner_id, _, now| {
                Ok(StartOutcome {
                    attempt: Attempt::begin(test, learner_id, 1, now),
                    resumed: false,
                })
            });
        attempts.expect_responses().returning(|_| Ok(vec![]));

        let (detail, resumed) = service(tests, attempts, bank)
            .start_attempt(test_id, &learner)
            .await
            .unwrap();
        assert!(!resumed);
        assert_eq!(detail.attempt.attempt_number, 1);
        assert_eq!(detail.attempt.learner_id, learner.learner_id);
    }

    #[tokio::test]
    async fn start_fails_when_content_is_gone() {
        let class_id = Uuid::new_v4();
        let test = published(&[content(class_id)], class_id);
        let test_id = test.id;

        let mut tests = MockTestRepository::new();
        tests.expect_find().returning(move |_| Ok(Some(test.clone())));
        let mut bank = MockQuestionBank::new();
        bank.expect_fetch().returning(|_| Ok(vec![]));
        let mut attempts = MockAttemptRepository::new();
        attempts
            .expect_list_for_learner()
            .returning(|_, _| Ok(vec![]));
        attempts.expect_start().never();

        let err = service(tests, attempts, bank)
            .start_attempt(test_id, &learner(class_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn foreign_attempt_is_forbidden() {
        let class_id = Uuid::new_v4();
        let test = published(&[content(class_id)], class_id);
        let owner = Uuid::new_v4();
        let attempt = Attempt::begin(&test, owner, 1, Utc::now());
        let attempt_id = attempt.id;

        let mut attempts = MockAttemptRepository::new();
        attempts
            .expect_find()
            .returning(move |_| Ok(Some(attempt.clone())));
        attempts.expect_save_response().never();

        let err = service(MockTestRepository::new(), attempts, MockQuestionBank::new())
            .save_response(attempt_id, Uuid::new_v4(), Uuid::new_v4(), AnswerPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn missing_attempt_is_not_found() {
        let mut attempts = MockAttemptRepository::new();
        attempts.expect_find().returning(|_| Ok(None));

        let err = service(MockTestRepository::new(), attempts, MockQuestionBank::new())
            .submit(Uuid::new_v4(), Uuid::new_v4(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
