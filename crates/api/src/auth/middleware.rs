//! Bearer authentication middleware

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::gateway::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Reject the request unless it carries a valid bearer token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::Unauthorized)?;
    let user = state.auth.validate(token).await?;

    tracing::debug!(username = %user.username, role = %user.role, "Request authenticated");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Attach an identity when a bearer token is present. A token that is present
/// but invalid is still rejected.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = bearer_token(&request) {
        let user = state.auth.validate(token).await?;
        request.extensions_mut().insert(user);
    }
    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extension type handlers use when authentication was optional
pub type MaybeUser = Option<axum::Extension<AuthUser>>;
