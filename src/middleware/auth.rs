use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::AppState;

pub const AUTHOR_ROLES: &[&str] = &["teacher", "admin"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    /// The subject as a user id, when it is one.
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn has_any_role(&self, allowed: &[&str]) -> bool {
        let role = self.role.as_deref().unwrap_or_default();
        allowed.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

pub fn decode_bearer(header: Option<&str>, secret: &str) -> Result<Claims, Error> {
    let Some(auth_str) = header else {
        return Err(Error::Unauthorized("Missing authorization header".to_string()));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(Error::Unauthorized("Unsupported authorization scheme".to_string()));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<Claims>(
        token.trim(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        Error::Unauthorized("Invalid or expired token".to_string())
    })
}

fn claims_from(req: &Request, secret: &str) -> Result<Claims, Error> {
    let header = match req.headers().get(AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| Error::Unauthorized("Malformed authorization header".to_string()))?,
        ),
        None => None,
    };
    decode_bearer(header, secret)
}

/// Authoring routes: a valid token with a teacher or admin role.
pub async fn require_author(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let claims = match claims_from(&req, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };
    if !claims.has_any_role(AUTHOR_ROLES) {
        return Error::Forbidden("Authoring requires a teacher or admin role".to_string())
            .into_response();
    }
    req.extensions_mut().insert(claims);
    next.run(req).await
}

/// Learner routes: any valid token whose subject resolves to a learner. The resolved
/// profile is attached to the request for handlers.
pub async fn require_learner(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let claims = match claims_from(&req, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };
    let learner = match state.identity_service.resolve_learner(&claims.sub).await {
        Ok(learner) => learner,
        Err(err) => return err.into_response(),
    };
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(learner);
    next.run(req).await
}
