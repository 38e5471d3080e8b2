//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_request_body_bytes: usize,

    // Database (in-memory stores when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_minutes: i64,
    pub enable_signup: bool,
    pub expert_username: Option<String>,
    pub expert_password: Option<String>,

    // Upstream assistant
    pub assistant_base_url: String,
    pub assistant_api_key: Option<String>,
    pub assistant_model: String,
    pub assistant_system_prompt: Option<String>,
    pub assistant_temperature: f32,
    pub assistant_max_tokens: u32,
    pub upstream_timeout_ms: u64,

    // Realtime channel
    pub stream_replies: bool,
    pub context_window: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::WeakSecret(
                "JWT_SECRET must be at least 32 characters",
            ));
        }

        let expert_username = env::var("EXPERT_USERNAME").ok().filter(|v| !v.is_empty());
        let expert_password = env::var("EXPERT_PASSWORD").ok().filter(|v| !v.is_empty());
        if expert_username.is_some() != expert_password.is_some() {
            return Err(ConfigError::Incomplete(
                "EXPERT_USERNAME and EXPERT_PASSWORD must be set together",
            ));
        }

        let context_window = parse_or("CONTEXT_WINDOW", 20usize);
        if context_window == 0 {
            return Err(ConfigError::Invalid("CONTEXT_WINDOW must be at least 1"));
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            max_request_body_bytes: parse_or("MAX_REQUEST_BODY_BYTES", 1_048_576),

            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),

            jwt_secret,
            jwt_expiry_minutes: parse_or("JWT_EXPIRY_MINUTES", 300),
            enable_signup: parse_or("ENABLE_SIGNUP", true),
            expert_username,
            expert_password,

            assistant_base_url: env::var("ASSISTANT_BASE_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com/v1".to_string()),
            assistant_api_key: env::var("ASSISTANT_API_KEY").ok().filter(|v| !v.is_empty()),
            assistant_model: env::var("ASSISTANT_MODEL")
                .unwrap_or_else(|_| "deepseek-chat".to_string()),
            assistant_system_prompt: env::var("ASSISTANT_SYSTEM_PROMPT")
                .ok()
                .filter(|v| !v.is_empty()),
            assistant_temperature: parse_or("ASSISTANT_TEMPERATURE", 0.7),
            assistant_max_tokens: parse_or("ASSISTANT_MAX_TOKENS", 2000),
            upstream_timeout_ms: parse_or("UPSTREAM_TIMEOUT_MS", 60_000),

            stream_replies: parse_or("STREAM_REPLIES", false),
            context_window,
        })
    }

    /// Configuration for an in-process gateway backed by in-memory stores
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
            max_request_body_bytes: 1_048_576,
            database_url: None,
            database_max_connections: 1,
            jwt_secret: jwt_secret.into(),
            jwt_expiry_minutes: 300,
            enable_signup: true,
            expert_username: None,
            expert_password: None,
            assistant_base_url: "http://127.0.0.1:9/v1".to_string(),
            assistant_api_key: None,
            assistant_model: "deepseek-chat".to_string(),
            assistant_system_prompt: None,
            assistant_temperature: 0.7,
            assistant_max_tokens: 2000,
            upstream_timeout_ms: 60_000,
            stream_replies: false,
            context_window: 20,
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Incomplete configuration: {0}")]
    Incomplete(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
