//! Account storage
//!
//! Accounts live either in process memory (the default for local runs and tests)
//! or in the `accounts` table when a database is configured.

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::{Account, Role, StoreError, StoreResult};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
pub enum AccountStore {
    Memory(Arc<RwLock<HashMap<String, Account>>>),
    Postgres(PgPool),
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    username: String,
    password_hash: String,
    role: String,
    created_at: OffsetDateTime,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            username: row.username,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            created_at: row.created_at,
        })
    }
}

impl AccountStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    /// Insert a new account. `Conflict` when the username is taken.
    pub async fn insert(&self, username: &str, password_hash: &str, role: Role) -> StoreResult<Account> {
        match self {
            Self::Memory(accounts) => {
                let mut accounts = accounts.write().await;
                if accounts.contains_key(username) {
                    return Err(StoreError::Conflict(format!("account {username} exists")));
                }
                let account = Account {
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    role,
                    created_at: OffsetDateTime::now_utc(),
                };
                accounts.insert(account.username.clone(), account.clone());
                Ok(account)
            }
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, AccountRow>(
                    r#"
                    INSERT INTO accounts (username, password_hash, role)
                    VALUES ($1, $2, $3)
                    RETURNING username, password_hash, role, created_at
                    "#,
                )
                .bind(username)
                .bind(password_hash)
                .bind(role.as_str())
                .fetch_one(pool)
                .await?;

                row.try_into()
            }
        }
    }

    pub async fn find(&self, username: &str) -> StoreResult<Option<Account>> {
        match self {
            Self::Memory(accounts) => Ok(accounts.read().await.get(username).cloned()),
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, AccountRow>(
                    "SELECT username, password_hash, role, created_at FROM accounts WHERE username = $1",
                )
                .bind(username)
                .fetch_optional(pool)
                .await?;

                row.map(Account::try_from).transpose()
            }
        }
    }

    /// Create `username` as an expert, or promote it and reset its password
    pub async fn upsert_expert(&self, username: &str, password_hash: &str) -> StoreResult<Account> {
        match self {
            Self::Memory(accounts) => {
                let mut accounts = accounts.write().await;
                let account = accounts
                    .entry(username.to_string())
                    .or_insert_with(|| Account {
                        username: username.to_string(),
                        password_hash: String::new(),
                        role: Role::Expert,
                        created_at: OffsetDateTime::now_utc(),
                    });
                account.password_hash = password_hash.to_string();
                account.role = Role::Expert;
                Ok(account.clone())
            }
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, AccountRow>(
                    r#"
                    INSERT INTO accounts (username, password_hash, role)
                    VALUES ($1, $2, 'expert')
                    ON CONFLICT (username) DO UPDATE SET
                      password_hash = EXCLUDED.password_hash,
                      role = 'expert'
                    RETURNING username, password_hash, role, created_at
                    "#,
                )
                .bind(username)
                .bind(password_hash)
                .fetch_one(pool)
                .await?;

                row.try_into()
            }
        }
    }
}
