use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::question::{AlternativeCriteria, ContentQuestion};
use crate::models::test::{TestDefinition, TestDraft, TestPatch};
use crate::repositories::{QuestionBank, TestFilter, TestRepository};

#[derive(Debug, serde::Serialize)]
pub struct PaginatedTests {
    #[serde(rename = "items")]
    pub tests: Vec<TestDefinition>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Clone)]
pub struct TestService {
    tests: Arc<dyn TestRepository>,
    bank: Arc<dyn QuestionBank>,
    alternatives_limit: i64,
}

impl TestService {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        bank: Arc<dyn QuestionBank>,
        alternatives_limit: i64,
    ) -> Self {
        Self {
            tests,
            bank,
            alternatives_limit,
        }
    }

    /// Creates a draft. Marks for every question come from the question bank.
    pub async fn create_test(
        &self,
        draft: TestDraft,
        content_question_ids: &[Uuid],
    ) -> Result<TestDefinition> {
        let content = self.fetch_content(content_question_ids).await?;
        let test = TestDefinition::new_draft(draft, &content, Utc::now());
        test.validate_settings()?;

        let stored = self.tests.insert(&test).await?;
        tracing::info!(
            test_id = %stored.id,
            questions = stored.total_questions,
            total_marks = %stored.total_marks,
            "Test draft created"
        );
        Ok(stored)
    }

    pub async fn get_test(&self, test_id: Uuid) -> Result<TestDefinition> {
        self.tests
            .find(test_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))
    }

    pub async fn list_tests(
        &self,
        page: i64,
        per_page: i64,
        filter: Option<TestFilter>,
    ) -> Result<PaginatedTests> {
        let filter = filter.unwrap_or_default();
        let (tests, total) = self.tests.list(&filter, page, per_page).await?;
        let total_pages = if per_page > 0 {
            ((total as f64) / (per_page as f64)).ceil() as i64
        } else {
            1
        };
        Ok(PaginatedTests {
            tests,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    pub async fn update_test(&self, test_id: Uuid, patch: TestPatch) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.apply(patch, Utc::now())?;
        self.tests.save(&test).await
    }

    pub async fn publish_test(&self, test_id: Uuid) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.publish(Utc::now())?;
        let stored = self.tests.save(&test).await?;
        tracing::info!(test_id = %test_id, "Test published");
        Ok(stored)
    }

    pub async fn close_test(&self, test_id: Uuid) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.close(Utc::now())?;
        let stored = self.tests.save(&test).await?;
        tracing::info!(test_id = %test_id, "Test closed");
        Ok(stored)
    }

    pub async fn delete_test(&self, test_id: Uuid) -> Result<()> {
        match self.tests.delete(test_id).await {
            Ok(()) => {
                tracing::info!(test_id = %test_id, "Test deleted");
                Ok(())
            }
            Err(err @ Error::Conflict(_)) => {
                tracing::warn!(test_id = %test_id, "Refused to delete test with attempts");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn duplicate_test(&self, test_id: Uuid, new_title: String) -> Result<TestDefinition> {
        let source = self.get_test(test_id).await?;
        let copy = source.duplicate(new_title, Utc::now());
        copy.validate_settings()?;
        let stored = self.tests.insert(&copy).await?;
        tracing::info!(source_id = %test_id, test_id = %stored.id, "Test duplicated");
        Ok(stored)
    }

    pub async fn add_questions(
        &self,
        test_id: Uuid,
        content_question_ids: &[Uuid],
    ) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.ensure_questions_editable()?;
        if let Some(dup) = content_question_ids.iter().find(|id| test.contains_content(**id)) {
            return Err(Error::BadRequest(format!(
                "Question {} is already part of this test",
                dup
            )));
        }
        let content = self.fetch_content(content_question_ids).await?;
        test.append_questions(&content);
        test.updated_at = Utc::now();
        self.tests.save(&test).await
    }

    pub async fn remove_question(
        &self,
        test_id: Uuid,
        test_question_id: Uuid,
    ) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.ensure_questions_editable()?;
        let removed = test.remove_question(test_question_id)?;
        test.updated_at = Utc::now();
        let stored = self.tests.save(&test).await?;
        tracing::info!(
            test_id = %test_id,
            test_question_id = %removed.id,
            total_marks = %stored.total_marks,
            "Question removed from test"
        );
        Ok(stored)
    }

    pub async fn replace_question(
        &self,
        test_id: Uuid,
        test_question_id: Uuid,
        new_content_question_id: Uuid,
    ) -> Result<TestDefinition> {
        let mut test = self.get_test(test_id).await?;
        test.ensure_questions_editable()?;
        let current = test.question(test_question_id)?.content_question_id;
        if current != new_content_question_id && test.contains_content(new_content_question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} is already part of this test",
                new_content_question_id
            )));
        }
        let mut content = self.fetch_content(&[new_content_question_id]).await?;
        let replacement = content.remove(0);
        test.replace_question(test_question_id, &replacement)?;
        test.updated_at = Utc::now();
        self.tests.save(&test).await
    }

    /// Bank questions that could stand in for the given slot: same subject, class, type
    /// and difficulty, excluding everything already in the test.
    /// Same subject, class, type and difficulty; never a question already in the test
    /// or one listed in `exclude`.
    pub async fn list_alternatives(
        &self,
        test_id: Uuid,
        test_question_id: Uuid,
        exclude: &[Uuid],
    ) -> Result<Vec<ContentQuestion>> {
        let test = self.get_test(test_id).await?;
        let slot = test.question(test_question_id)?;
        let mut reference = self.bank.fetch(&[slot.content_question_id]).await?;
        let reference = reference.pop().ok_or_else(|| {
            Error::NotFound(format!(
                "Question {} no longer exists in the question bank",
                slot.content_question_id
            ))
        })?;

        let criteria = AlternativeCriteria {
            subject_id: reference.subject_id,
            class_id: reference.class_id,
            kind: reference.kind(),
            difficulty: reference.difficulty.clone(),
        };
        let mut excluded: Vec<Uuid> =
            test.questions.iter().map(|q| q.content_question_id).collect();
        excluded.extend(exclude.iter().filter(|id| !test.contains_content(**id)));
        self.bank
            .find_alternatives(&criteria, &excluded, self.alternatives_limit)
            .await
    }

    /// Fetches content in the requested order, rejecting duplicates and unknown ids.
    async fn fetch_content(&self, ids: &[Uuid]) -> Result<Vec<ContentQuestion>> {
        let mut seen = HashSet::new();
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::BadRequest(format!(
                "Question {} is listed more than once",
                dup
            )));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_id: HashMap<Uuid, ContentQuestion> = self
            .bank
            .fetch(ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        ids.iter()
            .map(|id| {
                by_id
                    .remove(id)
                    .ok_or_else(|| Error::NotFound(format!("Question {} not found", id)))
            })
            .collect()
    }
}
