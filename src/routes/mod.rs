pub mod health;
pub mod learner;

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    BoxError, Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::Error;
use crate::middleware::auth::{require_author, require_learner};
use crate::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_LIMIT: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let authoring = Router::new()
        .route("/api/tests", get(tests::list_tests).post(tests::create_test))
        .route(
            "/api/tests/:id",
            get(tests::get_test)
                .patch(tests::update_test)
                .delete(tests::delete_test),
        )
        .route("/api/tests/:id/publish", post(tests::publish_test))
        .route("/api/tests/:id/close", post(tests::close_test))
        .route("/api/tests/:id/duplicate", post(tests::duplicate_test))
        .route("/api/tests/:id/questions", post(tests::add_questions))
        .route(
            "/api/tests/:id/questions/:question_id",
            put(tests::replace_question).delete(tests::remove_question),
        )
        .route(
            "/api/tests/:id/questions/:question_id/alternatives",
            get(tests::list_alternatives),
        )
        .route("/api/tests/:id/analytics", get(tests::test_analytics))
        .route("/api/tests/:id/attempts", get(tests::list_test_attempts))
        .route(
            "/api/tests/:id/attempts/:attempt_id",
            get(tests::get_attempt),
        )
        .route(
            "/api/tests/:id/attempts/:attempt_id/graded",
            post(tests::mark_graded),
        )
        .route_layer(from_fn_with_state(state.clone(), require_author));

    let learner_api = Router::new()
        .route("/api/learner/tests", get(learner::list_available))
        .route(
            "/api/learner/tests/:test_id/start",
            post(learner::start_attempt),
        )
        .route("/api/learner/attempts", get(learner::list_attempts))
        .route(
            "/api/learner/attempts/:attempt_id",
            get(learner::get_attempt),
        )
        .route(
            "/api/learner/attempts/:attempt_id/responses",
            put(learner::save_response),
        )
        .route(
            "/api/learner/attempts/:attempt_id/submit",
            post(learner::submit_attempt),
        )
        .route_layer(from_fn_with_state(state.clone(), require_learner));

    Router::new()
        .route("/health", get(health::health))
        .merge(authoring)
        .merge(learner_api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(REQUEST_TIMEOUT),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        return (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({"error": "timeout", "message": "Request took too long"})),
        )
            .into_response();
    }
    Error::Internal(err.to_string()).into_response()
}
