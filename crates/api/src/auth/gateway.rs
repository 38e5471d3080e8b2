//! Credential exchange and token validation
//!
//! The gateway never trusts anything a client says about its own role: every
//! validated token is resolved back to its account and the stored role wins.

use parley_shared::{Account, Role, StoreError};
use serde::Serialize;

use super::accounts::AccountStore;
use super::jwt::{IssuedToken, JwtError, JwtManager};
use super::password::{hash_password, validate_password, verify_against_dummy, verify_password};
use crate::error::{ApiError, ApiResult};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Identity attached to a request after its bearer token was validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub username: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct AuthGateway {
    accounts: AccountStore,
    jwt: JwtManager,
}

impl AuthGateway {
    pub fn new(accounts: AccountStore, jwt: JwtManager) -> Self {
        Self { accounts, jwt }
    }

    pub async fn register(&self, username: &str, password: &str) -> ApiResult<Account> {
        validate_username(username)?;
        validate_password(password).map_err(|e| ApiError::Validation(e.to_string()))?;

        let hash = hash_password(password).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            ApiError::Internal
        })?;

        match self.accounts.insert(username, &hash, Role::User).await {
            Ok(account) => {
                tracing::info!(username = %account.username, "Account registered");
                Ok(account)
            }
            Err(StoreError::Conflict(_)) => Err(ApiError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> ApiResult<IssuedToken> {
        let Some(account) = self.accounts.find(username).await? else {
            verify_against_dummy(password);
            tracing::debug!(username = %username, "Login for unknown account");
            return Err(ApiError::InvalidCredentials);
        };

        let matches = verify_password(password, &account.password_hash).map_err(|e| {
            tracing::error!(username = %username, error = %e, "Stored password hash unreadable");
            ApiError::Internal
        })?;
        if !matches {
            tracing::debug!(username = %username, "Login with wrong password");
            return Err(ApiError::InvalidCredentials);
        }

        self.jwt.issue(&account.username).map_err(|e| {
            tracing::error!(error = %e, "Token issuance failed");
            ApiError::Internal
        })
    }

    /// Check signature and expiry, then resolve the subject's current role
    pub async fn validate(&self, token: &str) -> ApiResult<AuthUser> {
        let claims = self.jwt.validate(token).map_err(|e| {
            match e {
                JwtError::Expired => tracing::debug!("Rejected expired token"),
                other => tracing::debug!(error = %other, "Rejected token"),
            }
            ApiError::Unauthorized
        })?;

        let account = self
            .accounts
            .find(&claims.sub)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            username: account.username,
            role: account.role,
        })
    }

    /// Create or promote the configured expert account
    pub async fn ensure_expert(&self, username: &str, password: &str) -> ApiResult<Account> {
        validate_username(username)?;
        validate_password(password).map_err(|e| ApiError::Validation(e.to_string()))?;

        let hash = hash_password(password).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            ApiError::Internal
        })?;

        let account = self.accounts.upsert_expert(username, &hash).await?;
        tracing::info!(username = %account.username, "Expert account ready");
        Ok(account)
    }

    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }
}

fn validate_username(username: &str) -> ApiResult<()> {
    let length = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&length) {
        return Err(ApiError::Validation(format!(
            "Username must be {MIN_USERNAME_LENGTH}-{MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ApiError::Validation(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}
