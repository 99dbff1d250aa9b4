//! Main Entrypoint for the Monica API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing session storage: PostgreSQL with migrations, or in-memory.
//! 3. Building the orchestrator over the configured chat model and prompts.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use monica_api::{
    config::Config, db::PgSessionRepository, router::create_router, state::AppState,
    ws::live_generator,
};
use monica_core::{
    Orchestrator,
    llm_client::OpenAICompatibleClient,
    prompts::StagePrompts,
    repository::{InMemorySessionRepository, SessionRepository},
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = ?e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Storage ---
    let repo: Arc<dyn SessionRepository> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let repo = PgSessionRepository::new(pool);
            repo.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Arc::new(repo)
        }
        None => {
            warn!("DATABASE_URL not set; sessions are kept in memory and lost on restart.");
            Arc::new(InMemorySessionRepository::new())
        }
    };

    // --- 4. Initialize Shared Services ---
    let prompts = StagePrompts::load_dir(&config.prompts_path)
        .with_context(|| format!("Failed to load prompts from {}", config.prompts_path.display()))?;

    let api_key = config
        .chat_api_key()
        .context("No API key for the configured provider")?;
    let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = config.provider.api_base() {
        openai_config = openai_config.with_api_base(base);
    }
    info!(provider = ?config.provider, "Using chat provider.");
    let generator = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let orchestrator = Orchestrator::standard(
        repo,
        generator,
        prompts,
        &config.product_name,
        config.generation_timeout,
    )
    .context("Invalid stage registry")?;

    let app_state = Arc::new(AppState {
        orchestrator,
        live: live_generator(&config),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
