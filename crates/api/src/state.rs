//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::assistant::{Assistant, RuleBook};
use crate::auth::{AccountStore, AuthGateway, JwtManager};
use crate::channel::ChannelState;
use crate::config::Config;
use crate::sessions::SessionRegistry;
use crate::tickets::TicketDesk;

/// Handles shared by every request and channel task. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Present when the stores are backed by Postgres
    pub pool: Option<PgPool>,
    pub sessions: SessionRegistry,
    pub auth: AuthGateway,
    pub tickets: TicketDesk,
    pub rules: RuleBook,
    pub assistant: Arc<dyn Assistant>,
    pub channels: ChannelState,
}

impl AppState {
    /// Build state over Postgres when a pool is given, otherwise in memory
    pub fn new(config: Config, pool: Option<PgPool>, assistant: Arc<dyn Assistant>) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_minutes);

        let (sessions, accounts, tickets, rules) = match &pool {
            Some(pool) => (
                SessionRegistry::postgres(pool.clone(), config.context_window),
                AccountStore::postgres(pool.clone()),
                TicketDesk::postgres(pool.clone()),
                RuleBook::postgres(pool.clone()),
            ),
            None => (
                SessionRegistry::memory(config.context_window),
                AccountStore::memory(),
                TicketDesk::memory(),
                RuleBook::memory(),
            ),
        };

        Self {
            config: Arc::new(config),
            pool,
            sessions,
            auth: AuthGateway::new(accounts, jwt),
            tickets,
            rules,
            assistant,
            channels: ChannelState::new(),
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }
}
