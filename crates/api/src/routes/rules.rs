//! Canned-answer rule administration

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use parley_shared::Rule;

use crate::{assistant::NewRule, auth::AuthUser, error::ApiResult, state::AppState};

pub async fn list_rules(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Rule>>> {
    Ok(Json(state.rules.list(&user).await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<NewRule>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let rule = state.rules.add(&user, req).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(rule_id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.rules.remove(&user, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
