use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{
    AttemptListQuery, AttemptSummary, AttemptView, Audience, AvailableTestView,
    SaveResponsePayload, SaveResponseResult, SubmitAttemptPayload,
};
use crate::error::Result;
use crate::models::learner::LearnerProfile;
use crate::AppState;

pub async fn list_available(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
) -> Result<impl IntoResponse> {
    let available = state
        .availability_service
        .list_available(&learner, Utc::now())
        .await?;
    let items: Vec<AvailableTestView> = available.into_iter().map(Into::into).collect();
    Ok(Json(items))
}

pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let (detail, resumed) = state
        .attempt_service
        .start_attempt(test_id, &learner)
        .await?;
    let status = if resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(AttemptView::render(&detail, Audience::Learner, resumed)),
    ))
}

pub async fn save_response(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SaveResponsePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let (test_question_id, answer) = payload.into_parts();
    let response = state
        .attempt_service
        .save_response(attempt_id, learner.learner_id, test_question_id, answer)
        .await?;
    Ok(Json(SaveResponseResult::from(&response)))
}

pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SubmitAttemptPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let detail = state
        .attempt_service
        .submit(attempt_id, learner.learner_id, payload.into_answers())
        .await?;
    Ok(Json(AttemptView::render(&detail, Audience::Learner, false)))
}

pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let detail = state
        .attempt_service
        .get_learner_attempt(attempt_id, learner.learner_id)
        .await?;
    Ok(Json(AttemptView::render(&detail, Audience::Learner, false)))
}

/// Scores are listed only for tests that reveal results to learners.
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(learner): Extension<LearnerProfile>,
    Query(query): Query<AttemptListQuery>,
) -> Result<impl IntoResponse> {
    let attempts = state
        .attempt_service
        .list_learner_attempts(learner.learner_id, query.test_id)
        .await?;

    let mut items = Vec::with_capacity(attempts.len());
    let mut visibility = HashMap::new();
    for attempt in &attempts {
        let show = match visibility.get(&attempt.test_id) {
            Some(show) => *show,
            None => {
                let show = state
                    .test_service
                    .get_test(attempt.test_id)
                    .await?
                    .show_results_immediately;
                visibility.insert(attempt.test_id, show);
                show
            }
        };
        items.push(AttemptSummary::new(attempt, show));
    }
    Ok(Json(items))
}
