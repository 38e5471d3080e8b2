//! Parley API server

use std::sync::Arc;

use anyhow::Context;
use parley_api::{assistant::OpenAiAssistant, create_router, AppState, Config};
use parley_shared::{create_pool, run_migrations};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;

    let pool = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Database ready");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; sessions, accounts and tickets are kept in memory");
            None
        }
    };

    let assistant = OpenAiAssistant::new(&config).context("Failed to build assistant client")?;
    let state = AppState::new(config.clone(), pool, Arc::new(assistant));

    if let (Some(username), Some(password)) = (&config.expert_username, &config.expert_password) {
        state
            .auth
            .ensure_expert(username, password)
            .await
            .context("Failed to provision expert account")?;
    }

    let rules = state
        .rules
        .reload()
        .await
        .context("Failed to load rules")?;
    tracing::info!(rules, "Rule book loaded");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    tracing::info!(
        address = %listener.local_addr()?,
        model = %config.assistant_model,
        streaming = config.stream_replies,
        "Parley API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Parley API stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_api=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
