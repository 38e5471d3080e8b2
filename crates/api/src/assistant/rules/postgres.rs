//! Postgres-backed rule storage

use parley_shared::{Rule, StoreResult};
use sqlx::PgPool;
use time::OffsetDateTime;

use super::NewRule;

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    patterns: Vec<String>,
    answer: String,
    source: String,
    active: bool,
    created_at: OffsetDateTime,
}

impl From<RuleRow> for Rule {
    fn from(row: RuleRow) -> Self {
        Rule {
            id: row.id,
            patterns: row.patterns,
            answer: row.answer,
            source: row.source,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

pub async fn all(pool: &PgPool) -> StoreResult<Vec<Rule>> {
    let rows = sqlx::query_as::<_, RuleRow>(
        "SELECT id, patterns, answer, source, active, created_at FROM rules ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Rule::from).collect())
}

pub async fn insert(pool: &PgPool, rule: &NewRule) -> StoreResult<Rule> {
    let row = sqlx::query_as::<_, RuleRow>(
        r#"
        INSERT INTO rules (patterns, answer, source, active)
        VALUES ($1, $2, $3, $4)
        RETURNING id, patterns, answer, source, active, created_at
        "#,
    )
    .bind(&rule.patterns)
    .bind(&rule.answer)
    .bind(&rule.source)
    .bind(rule.active)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Returns whether a rule was removed
pub async fn delete(pool: &PgPool, id: i64) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM rules WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
