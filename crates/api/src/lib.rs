//! Parley API Library
//!
//! HTTP and WebSocket server components for the Parley conversational gateway.

pub mod assistant;
pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod rbac;
pub mod routes;
pub mod security;
pub mod sessions;
pub mod state;
pub mod tickets;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
