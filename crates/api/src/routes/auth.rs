//! Authentication routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Form, Json,
};
use parley_shared::Account;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// OAuth2 password-grant style form body
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Register a new account with the `user` role
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    if !state.config.enable_signup {
        return Err(ApiError::BadRequest("Registration is disabled".to_string()));
    }

    let account = state.auth.register(req.username.trim(), &req.password).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Exchange credentials for a bearer token
pub async fn token(
    State(state): State<AppState>,
    Form(req): Form<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let issued = state.auth.login(req.username.trim(), &req.password).await?;

    tracing::info!(username = %req.username.trim(), "Token issued");
    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "bearer",
        expires_in: issued.expires_in,
    }))
}

/// The caller's account as the server sees it
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
    Json(user)
}
