//! Canned answers matched by pattern
//!
//! Experts maintain a small set of rules. When any pattern of an active rule
//! matches the user's content, its answer is sent instead of asking the upstream.
//! With a database the rules are stored there and the compiled set is rebuilt
//! from storage at startup and after every change.

mod postgres;

use std::sync::Arc;

use parley_shared::Rule;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::rbac::{self, Operation};

const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("{0}")]
    Invalid(&'static str),
    #[error("rule {0} not found")]
    NotFound(i64),
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::InvalidPattern { .. } => ApiError::BadRequest(err.to_string()),
            RuleError::Invalid(msg) => ApiError::Validation(msg.to_string()),
            RuleError::NotFound(_) => ApiError::NotFound,
        }
    }
}

/// Body of `POST /admin/rules`
#[derive(Debug, Clone, Deserialize)]
pub struct NewRule {
    pub patterns: Vec<String>,
    pub answer: String,
    pub source: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: i64,
    pub answer: String,
    pub source: String,
}

impl RuleMatch {
    pub fn citations(&self) -> Value {
        json!([{ "source": self.source }])
    }
}

struct CompiledRule {
    id: i64,
    patterns: Vec<Regex>,
    answer: String,
    source: String,
}

#[derive(Default)]
struct Book {
    rules: Vec<Rule>,
    compiled: Vec<CompiledRule>,
    next_id: i64,
}

impl Book {
    /// Compile every active rule. Stored rules that no longer compile are skipped.
    fn from_rules(rules: Vec<Rule>) -> Self {
        let compiled = rules
            .iter()
            .filter(|rule| rule.active)
            .filter_map(|rule| match compile_patterns(&rule.patterns) {
                Ok(patterns) => Some(CompiledRule {
                    id: rule.id,
                    patterns,
                    answer: rule.answer.clone(),
                    source: rule.source.clone(),
                }),
                Err(e) => {
                    tracing::warn!(rule_id = rule.id, error = %e, "Skipping stored rule");
                    None
                }
            })
            .collect();
        let next_id = rules.iter().map(|rule| rule.id).max().unwrap_or(0);

        Self {
            rules,
            compiled,
            next_id,
        }
    }
}

#[derive(Clone)]
enum Storage {
    Memory,
    Postgres(PgPool),
}

#[derive(Clone)]
pub struct RuleBook {
    inner: Arc<RwLock<Book>>,
    storage: Storage,
}

impl RuleBook {
    pub fn memory() -> Self {
        Self {
            inner: Arc::default(),
            storage: Storage::Memory,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            inner: Arc::default(),
            storage: Storage::Postgres(pool),
        }
    }

    /// Recompile the active set from storage; returns how many rules are stored
    pub async fn reload(&self) -> ApiResult<usize> {
        let mut book = self.inner.write().await;
        if let Storage::Postgres(pool) = &self.storage {
            *book = Book::from_rules(postgres::all(pool).await?);
        }
        Ok(book.rules.len())
    }

    /// First active rule with any matching pattern, in creation order
    pub async fn check(&self, query: &str) -> Option<RuleMatch> {
        let book = self.inner.read().await;
        book.compiled
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| p.is_match(query)))
            .map(|rule| RuleMatch {
                rule_id: rule.id,
                answer: rule.answer.clone(),
                source: rule.source.clone(),
            })
    }

    pub async fn list(&self, user: &AuthUser) -> ApiResult<Vec<Rule>> {
        rbac::require(Operation::ManageRules, user.role)?;
        Ok(self.inner.read().await.rules.clone())
    }

    pub async fn add(&self, user: &AuthUser, new_rule: NewRule) -> ApiResult<Rule> {
        rbac::require(Operation::ManageRules, user.role)?;
        validate(&new_rule)?;
        let compiled_patterns = compile_patterns(&new_rule.patterns)?;

        // Held across the storage write and the reload
        let mut book = self.inner.write().await;
        let rule = match &self.storage {
            Storage::Memory => {
                book.next_id += 1;
                let rule = Rule {
                    id: book.next_id,
                    patterns: new_rule.patterns,
                    answer: new_rule.answer,
                    source: new_rule.source,
                    active: new_rule.active,
                    created_at: OffsetDateTime::now_utc(),
                };
                if rule.active {
                    book.compiled.push(CompiledRule {
                        id: rule.id,
                        patterns: compiled_patterns,
                        answer: rule.answer.clone(),
                        source: rule.source.clone(),
                    });
                }
                book.rules.push(rule.clone());
                rule
            }
            Storage::Postgres(pool) => {
                let rule = postgres::insert(pool, &new_rule).await?;
                *book = Book::from_rules(postgres::all(pool).await?);
                rule
            }
        };

        tracing::info!(
            rule_id = rule.id,
            expert = %user.username,
            active_rules = book.compiled.len(),
            "Rule added"
        );
        Ok(rule)
    }

    pub async fn remove(&self, user: &AuthUser, id: i64) -> ApiResult<()> {
        rbac::require(Operation::ManageRules, user.role)?;

        let mut book = self.inner.write().await;
        let removed = match &self.storage {
            Storage::Memory => {
                let before = book.rules.len();
                book.rules.retain(|r| r.id != id);
                book.compiled.retain(|r| r.id != id);
                book.rules.len() != before
            }
            Storage::Postgres(pool) => {
                let removed = postgres::delete(pool, id).await?;
                *book = Book::from_rules(postgres::all(pool).await?);
                removed
            }
        };
        if !removed {
            return Err(RuleError::NotFound(id).into());
        }

        tracing::info!(
            rule_id = id,
            expert = %user.username,
            active_rules = book.compiled.len(),
            "Rule removed"
        );
        Ok(())
    }
}

fn validate(rule: &NewRule) -> Result<(), RuleError> {
    if rule.patterns.is_empty() {
        return Err(RuleError::Invalid("a rule needs at least one pattern"));
    }
    if rule.answer.trim().is_empty() {
        return Err(RuleError::Invalid("answer cannot be empty"));
    }
    if rule.source.trim().is_empty() {
        return Err(RuleError::Invalid("source cannot be empty"));
    }
    Ok(())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, RuleError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| RuleError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
