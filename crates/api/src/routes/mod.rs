//! API routes

pub mod auth;
pub mod feedback;
pub mod health;
pub mod rules;
pub mod sessions;
pub mod tickets;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{optional_auth, require_auth},
    channel::ws_handler,
    config::Config,
    security::security_headers,
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/", post(sessions::create_session))
        .route(
            "/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/register", post(auth::register))
        .route("/token", post(auth::token));

    // Feedback accepts anonymous votes but rejects bad tokens
    let feedback_routes = Router::new()
        .route("/feedback", post(feedback::submit_feedback))
        .route("/feedback/", post(feedback::submit_feedback))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    // Protected routes (auth required). Expert-only operations are checked
    // again by the stores that perform them.
    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route(
            "/tickets",
            post(tickets::create_ticket).get(tickets::list_my_tickets),
        )
        .route(
            "/tickets/",
            post(tickets::create_ticket).get(tickets::list_my_tickets),
        )
        .route("/tickets/:ticket_id", get(tickets::get_ticket))
        // Expert routes
        .route("/admin/tickets", get(tickets::list_all_tickets))
        .route("/admin/tickets/:ticket_id", put(tickets::reply_ticket))
        .route("/admin/feedback/:message_id", get(feedback::list_feedback))
        .route("/admin/corrections", post(feedback::record_correction))
        .route(
            "/admin/rules",
            get(rules::list_rules).post(rules::create_rule),
        )
        .route("/admin/rules/:rule_id", delete(rules::delete_rule))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Realtime channel (session id is the only credential)
    let channel_routes = Router::new().route("/ws/:session_id", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(public_routes)
        .merge(feedback_routes)
        .merge(protected_routes)
        .merge(channel_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(DefaultBodyLimit::max(state.config.max_request_body_bytes))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if config.cors_allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
